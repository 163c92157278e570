//! The `codec` module turns compressed message bodies back into text.

pub mod gzip;

pub use gzip::{CapacityPolicy, Decompressor, decompress};
