//! Secure memory (spec §4.2): fixed and growable byte buffers that wipe
//! their backing storage on drop and, where the OS permits, lock it out of
//! swap. Failure to lock pages is logged and non-fatal, the same way the
//! corpus's shadow-key vault logs a `tracing::warn!` and keeps going rather
//! than treating it as an error.

use std::fmt;
use zeroize::Zeroize;

/// A fixed-size secret buffer (DEKs, KEKs). Zeroized on drop; copying
/// requires an explicit [`SecureKey::expose`] call, never an implicit
/// `Clone`.
pub struct SecureKey<const N: usize> {
    bytes: [u8; N],
    locked: bool,
}

impl<const N: usize> SecureKey<N> {
    pub fn new(bytes: [u8; N]) -> Self {
        let locked = mlock(bytes.as_ptr() as *const u8, N);
        Self { bytes, locked }
    }

    pub fn zeroed() -> Self {
        Self::new([0u8; N])
    }

    /// Explicit, intentional access to the secret bytes.
    pub fn expose(&self) -> &[u8; N] {
        &self.bytes
    }

    pub fn expose_mut(&mut self) -> &mut [u8; N] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> fmt::Debug for SecureKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureKey").field("len", &N).finish_non_exhaustive()
    }
}

impl<const N: usize> Drop for SecureKey<N> {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            munlock(self.bytes.as_ptr() as *const u8, N);
        }
    }
}

/// A growable secret buffer. Every `resize` wipes the bytes being dropped
/// before the backing allocation changes size.
pub struct SecureBuf {
    bytes: Vec<u8>,
    locked: bool,
}

impl SecureBuf {
    pub fn new() -> Self {
        Self { bytes: Vec::new(), locked: false }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let locked = mlock(bytes.as_ptr(), bytes.len());
        Self { bytes, locked }
    }

    pub fn resize(&mut self, new_len: usize, value: u8) {
        if self.locked {
            munlock(self.bytes.as_ptr(), self.bytes.len());
        }
        // Wipe the tail about to be dropped/shrunk before resizing.
        self.bytes.zeroize();
        self.bytes.resize(new_len, value);
        self.locked = mlock(self.bytes.as_ptr(), self.bytes.len());
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    pub fn expose_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for SecureBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecureBuf {
    fn drop(&mut self) {
        if self.locked {
            munlock(self.bytes.as_ptr(), self.bytes.len());
        }
        self.bytes.zeroize();
    }
}

#[cfg(unix)]
fn mlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return false;
    }
    let rc = unsafe { libc::mlock(ptr as *const libc::c_void, len) };
    if rc != 0 {
        tracing::warn!(target: "towervault::secure", "failed to mlock {len} bytes of secret memory; continuing unlocked");
        false
    } else {
        true
    }
}

#[cfg(unix)]
fn munlock(ptr: *const u8, len: usize) {
    if len == 0 {
        return;
    }
    unsafe {
        let _ = libc::munlock(ptr as *const libc::c_void, len);
    }
}

#[cfg(not(unix))]
fn mlock(_ptr: *const u8, _len: usize) -> bool {
    tracing::warn!(target: "towervault::secure", "page locking is not implemented on this platform; continuing unlocked");
    false
}

#[cfg(not(unix))]
fn munlock(_ptr: *const u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_key_exposes_bytes() {
        let key = SecureKey::new([1u8, 2, 3, 4]);
        assert_eq!(key.expose(), &[1, 2, 3, 4]);
    }

    #[test]
    fn secure_buf_resize_wipes_and_grows() {
        let mut buf = SecureBuf::from_vec(vec![9u8; 8]);
        buf.resize(16, 0);
        assert_eq!(buf.len(), 16);
    }
}
