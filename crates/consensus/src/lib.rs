//! Network constants, parameters, and shared consensus types.

pub mod constants;
pub mod money;
pub mod params;

pub use params::{
    chain_params, hash256_from_hex, hash256_to_hex, ChainParams, HexError, Network,
};

/// A double-SHA256 digest in internal (little-endian) byte order.
pub type Hash256 = [u8; 32];
