//! Per-network parameters.

use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
    Signet,
}

impl Network {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Self::Mainnet),
            "testnet" | "test" | "testnet3" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            "signet" => Some(Self::Signet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
            Self::Signet => "signet",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Record marker written in front of every block in `blk*.dat` segments.
    pub message_start: [u8; 4],
    pub hash_genesis_block: Hash256,
}

impl ChainParams {
    /// The record marker as read by a little-endian `u32` decoder.
    pub fn archive_magic(&self) -> u32 {
        u32::from_le_bytes(self.message_start)
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            message_start: [0xf9, 0xbe, 0xb4, 0xd9],
            hash_genesis_block: genesis(
                "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            ),
        },
        Network::Testnet => ChainParams {
            network,
            message_start: [0x0b, 0x11, 0x09, 0x07],
            hash_genesis_block: genesis(
                "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            ),
        },
        Network::Regtest => ChainParams {
            network,
            message_start: [0xfa, 0xbf, 0xb5, 0xda],
            hash_genesis_block: genesis(
                "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
            ),
        },
        Network::Signet => ChainParams {
            network,
            message_start: [0x0a, 0x03, 0xcf, 0x40],
            hash_genesis_block: genesis(
                "00000008819873e925422c1ff0f99f7cc9bbb232af63a077a480a3633bee1ef6",
            ),
        },
    }
}

fn genesis(hex: &str) -> Hash256 {
    hash256_from_hex(hex).unwrap_or([0u8; 32])
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (big-endian) hex hash into internal byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }

    if hex.is_empty() {
        return Err(HexError::InvalidLength);
    }

    let mut hex_owned = if hex.len() % 2 == 1 {
        let mut padded = String::with_capacity(hex.len() + 1);
        padded.push('0');
        padded.push_str(hex);
        padded
    } else {
        hex.to_string()
    };

    if hex_owned.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    if hex_owned.len() < 64 {
        let mut padded = String::with_capacity(64);
        for _ in 0..(64 - hex_owned.len()) {
            padded.push('0');
        }
        padded.push_str(&hex_owned);
        hex_owned = padded;
    }

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        let byte = u8::from_str_radix(&hex_owned[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
        *byte_out = byte;
    }
    bytes.reverse();

    Ok(bytes)
}

/// Formats a hash in display order (reversed), as block explorers print it.
pub fn hash256_to_hex(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
