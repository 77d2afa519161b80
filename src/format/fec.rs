//! Optional forward-error-correction envelope over the V2 header region
//! (spec §4.5, §6.1). A systematic Reed-Solomon code protects the bytes
//! that matter most — magic, version, policy, slot table — against bit rot
//! that would otherwise turn a single flipped byte into a `Corrupted` open.
//!
//! The header region is split into `shard_count` equal-size data shards;
//! `parity_count` parity shards are computed over them with
//! `reed_solomon_erasure` (GF(2^8)) and appended as the trailer. On open, a
//! structural self-check (§4.5: "magic mismatch or slot-table
//! inconsistency") locates which shard(s) look wrong; those shards are
//! treated as erasures and reconstructed from the rest plus parity, which
//! is exactly what erasure coding (as opposed to blind error correction)
//! needs to know.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

pub const TRAILER_MARKER: &[u8; 4] = b"FEC1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FecError {
    #[error("fec trailer truncated or malformed")]
    MalformedTrailer,
    #[error("too many corrupted shards to reconstruct (need <= {parity_count} erasures, saw {erasures})")]
    TooManyErasures { parity_count: usize, erasures: usize },
    #[error("reed-solomon codec error")]
    Codec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecTrailer {
    pub shard_count: u16,
    pub parity_count: u16,
    pub protected_len: u32,
    pub shard_size: usize,
    pub parity: Vec<u8>,
}

impl FecTrailer {
    pub fn encoded_len(&self) -> usize {
        self.parity.len() + 2 + 2 + 4 + TRAILER_MARKER.len()
    }
}

/// Build the parity trailer for `region` (the header bytes up to but not
/// including the ciphertext).
pub fn build(region: &[u8], shard_count: usize, parity_count: usize) -> Result<FecTrailer, FecError> {
    let shard_size = region.len().div_ceil(shard_count);
    let rs = ReedSolomon::new(shard_count, parity_count).map_err(|_| FecError::Codec)?;

    let mut shards: Vec<Vec<u8>> = Vec::with_capacity(shard_count + parity_count);
    for i in 0..shard_count {
        let start = i * shard_size;
        let end = (start + shard_size).min(region.len());
        let mut shard = vec![0u8; shard_size];
        if start < region.len() {
            shard[..end - start].copy_from_slice(&region[start..end]);
        }
        shards.push(shard);
    }
    for _ in 0..parity_count {
        shards.push(vec![0u8; shard_size]);
    }

    rs.encode(&mut shards).map_err(|_| FecError::Codec)?;

    let mut parity = Vec::with_capacity(parity_count * shard_size);
    for shard in &shards[shard_count..] {
        parity.extend_from_slice(shard);
    }

    Ok(FecTrailer {
        shard_count: shard_count as u16,
        parity_count: parity_count as u16,
        protected_len: region.len() as u32,
        shard_size,
        parity,
    })
}

/// Append `trailer` to `buf`. The marker sits at the very end of the file
/// so a reader can locate and parse the trailer by walking backward from
/// EOF without needing to have successfully parsed the (possibly
/// corrupted) header first — `protected_len` tells it exactly where the
/// header region ends regardless of what's inside it.
pub fn write(buf: &mut Vec<u8>, trailer: &FecTrailer) {
    buf.extend_from_slice(&trailer.parity);
    buf.extend_from_slice(&trailer.shard_count.to_le_bytes());
    buf.extend_from_slice(&trailer.parity_count.to_le_bytes());
    buf.extend_from_slice(&trailer.protected_len.to_le_bytes());
    buf.extend_from_slice(TRAILER_MARKER);
}

/// Look for a trailer anchored at the end of `file_bytes`. Returns the
/// trailer and the offset where it begins (i.e. the end of the ciphertext),
/// or `None` if the file has no FEC envelope at all.
pub fn parse_from_tail(file_bytes: &[u8]) -> Result<Option<FecTrailer>, FecError> {
    let fixed_tail_len = TRAILER_MARKER.len() + 4 + 2 + 2;
    if file_bytes.len() < fixed_tail_len {
        return Ok(None);
    }
    let marker_at = file_bytes.len() - TRAILER_MARKER.len();
    if &file_bytes[marker_at..] != TRAILER_MARKER {
        return Ok(None);
    }

    let protected_len_at = marker_at - 4;
    let parity_count_at = protected_len_at - 2;
    let shard_count_at = parity_count_at - 2;

    let protected_len = u32::from_le_bytes(file_bytes[protected_len_at..protected_len_at + 4].try_into().unwrap());
    let parity_count = u16::from_le_bytes(file_bytes[parity_count_at..parity_count_at + 2].try_into().unwrap());
    let shard_count = u16::from_le_bytes(file_bytes[shard_count_at..shard_count_at + 2].try_into().unwrap());
    if parity_count == 0 || shard_count == 0 {
        return Err(FecError::MalformedTrailer);
    }

    let shard_size = (protected_len as usize).div_ceil(shard_count as usize);
    let parity_len = shard_size * parity_count as usize;
    let trailer_start = shard_count_at.checked_sub(parity_len).ok_or(FecError::MalformedTrailer)?;
    let parity = file_bytes[trailer_start..shard_count_at].to_vec();

    Ok(Some(FecTrailer { shard_count, parity_count, protected_len, shard_size, parity }))
}

/// Attempt to reconstruct `region` in place using the shards named in
/// `bad_shard_indices`. Fails if more shards are bad than `parity_count`
/// can correct.
pub fn recover(
    region: &mut [u8],
    trailer: &FecTrailer,
    bad_shard_indices: &[usize],
) -> Result<(), FecError> {
    if bad_shard_indices.len() > trailer.parity_count as usize {
        return Err(FecError::TooManyErasures {
            parity_count: trailer.parity_count as usize,
            erasures: bad_shard_indices.len(),
        });
    }

    let shard_count = trailer.shard_count as usize;
    let parity_count = trailer.parity_count as usize;
    let shard_size = trailer.shard_size;

    let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(shard_count + parity_count);
    for i in 0..shard_count {
        if bad_shard_indices.contains(&i) {
            shards.push(None);
            continue;
        }
        let start = i * shard_size;
        let end = (start + shard_size).min(region.len());
        let mut shard = vec![0u8; shard_size];
        if start < region.len() {
            shard[..end - start].copy_from_slice(&region[start..end]);
        }
        shards.push(Some(shard));
    }
    for i in 0..parity_count {
        let start = i * shard_size;
        shards.push(Some(trailer.parity[start..start + shard_size].to_vec()));
    }

    let rs = ReedSolomon::new(shard_count, parity_count).map_err(|_| FecError::Codec)?;
    rs.reconstruct(&mut shards).map_err(|_| FecError::Codec)?;

    for (i, shard) in shards.iter().take(shard_count).enumerate() {
        let shard = shard.as_ref().expect("reconstruct fills every shard");
        let start = i * shard_size;
        let end = (start + shard_size).min(region.len());
        if start < region.len() {
            region[start..end].copy_from_slice(&shard[..end - start]);
        }
    }

    Ok(())
}

/// Map an absolute byte offset inside the protected region to its shard
/// index, for turning a structural self-check failure into an erasure list.
pub fn shard_index_for_offset(trailer: &FecTrailer, offset: usize) -> usize {
    (offset / trailer.shard_size).min(trailer.shard_count as usize - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_recover_single_bad_shard() {
        let region: Vec<u8> = (0..200u16).map(|b| (b % 251) as u8).collect();
        let trailer = build(&region, 8, 4).unwrap();

        let mut corrupted = region.clone();
        let bad_idx = 2usize;
        let shard_size = trailer.shard_size;
        let end = ((bad_idx + 1) * shard_size).min(corrupted.len());
        for b in corrupted[bad_idx * shard_size..end].iter_mut() {
            *b ^= 0xFF;
        }

        recover(&mut corrupted, &trailer, &[bad_idx]).unwrap();
        assert_eq!(corrupted, region);
    }

    #[test]
    fn too_many_erasures_fails() {
        let region = vec![7u8; 64];
        let trailer = build(&region, 4, 1).unwrap();
        let mut corrupted = region.clone();
        let err = recover(&mut corrupted, &trailer, &[0, 1]).unwrap_err();
        assert_eq!(err, FecError::TooManyErasures { parity_count: 1, erasures: 2 });
    }

    #[test]
    fn trailer_roundtrips_through_bytes() {
        let region = vec![1u8; 130];
        let trailer = build(&region, 8, 4).unwrap();
        let mut file_bytes = region.clone();
        write(&mut file_bytes, &trailer);
        let parsed = parse_from_tail(&file_bytes).unwrap().unwrap();
        assert_eq!(parsed, trailer);
    }

    #[test]
    fn parse_from_tail_ignores_files_with_no_trailer() {
        let region = vec![9u8; 48];
        assert!(parse_from_tail(&region).unwrap().is_none());
    }
}
