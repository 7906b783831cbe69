//! Bit-level codec for E32 image compression: MSB-first bit streams, the
//! canonical Huffman toolkit, and the deflate-style length/distance coder.

pub mod bits;
pub mod deflate;
pub mod huffman;

pub use bits::{BitReader, BitWriter};
pub use deflate::{deflate, inflate};
