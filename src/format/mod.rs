//! On-disk vault formats (spec §4.4, §4.5, §6).

pub mod atomic;
pub mod fec;
pub mod v1;
pub mod v2;

pub const MAGIC: &[u8; 4] = b"TWLT";
