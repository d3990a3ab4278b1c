//! Transaction types and serialization, including the segregated witness
//! extended format.

use blkaudit_consensus::Hash256;

use crate::encoding::{capacity_hint, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

/// Smallest possible serialized input: outpoint, empty script, sequence.
const MIN_TXIN_SIZE: usize = 36 + 1 + 4;
/// Smallest possible serialized output: value and empty script.
const MIN_TXOUT_SIZE: usize = 8 + 1;

const WITNESS_MARKER: u8 = 0x00;
const WITNESS_FLAG: u8 = 0x01;

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// Witness stack; empty for inputs without witness data.
    pub witness: Vec<Vec<u8>>,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
            witness: Vec::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.vin.iter().any(|input| !input.witness.is_empty())
    }

    /// Serialization including witness data when any input carries it.
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_into(&mut encoder, self.has_witness());
        encoder.into_inner()
    }

    /// Legacy serialization with witness data stripped.
    pub fn consensus_encode_without_witness(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_into(&mut encoder, false);
        encoder.into_inner()
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode_without_witness())
    }

    pub fn wtxid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn encode_into(&self, encoder: &mut Encoder, include_witness: bool) {
        encoder.write_i32_le(self.version);
        if include_witness {
            encoder.write_u8(WITNESS_MARKER);
            encoder.write_u8(WITNESS_FLAG);
        }
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        if include_witness {
            for input in &self.vin {
                encoder.write_varint(input.witness.len() as u64);
                for item in &input.witness {
                    encoder.write_var_bytes(item);
                }
            }
        }
        encoder.write_u32_le(self.lock_time);
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, TransactionDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(TransactionDecodeError::Decode(DecodeError::TrailingBytes));
        }
        Ok(tx)
    }

    /// Decodes one transaction, accepting both the legacy and the extended
    /// (marker `0x00`, flag `0x01`) layouts.
    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, TransactionDecodeError> {
        let version = decoder.read_i32_le()?;

        let mut vin = decode_inputs(decoder)?;
        let mut flags = 0u8;
        let vout;
        if vin.is_empty() {
            // An empty input vector is the extended-format marker; the next
            // byte carries the flags, and zero means "no inputs, no outputs".
            flags = decoder.read_u8()?;
            if flags != 0 {
                vin = decode_inputs(decoder)?;
                vout = decode_outputs(decoder)?;
            } else {
                vout = Vec::new();
            }
        } else {
            vout = decode_outputs(decoder)?;
        }

        if flags & WITNESS_FLAG != 0 {
            flags ^= WITNESS_FLAG;
            for input in vin.iter_mut() {
                let items = decoder.read_count()?;
                let mut witness = Vec::with_capacity(capacity_hint(items, decoder, 1));
                for _ in 0..items {
                    witness.push(decoder.read_var_bytes()?);
                }
                input.witness = witness;
            }
            if vin.iter().all(|input| input.witness.is_empty()) {
                return Err(TransactionDecodeError::InvalidTransactionFormat(
                    "superfluous witness record",
                ));
            }
        }
        if flags != 0 {
            return Err(TransactionDecodeError::InvalidTransactionFormat(
                "unknown transaction optional data",
            ));
        }

        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

fn decode_inputs(decoder: &mut Decoder) -> Result<Vec<TxIn>, DecodeError> {
    let count = decoder.read_count()?;
    let mut vin = Vec::with_capacity(capacity_hint(count, decoder, MIN_TXIN_SIZE));
    for _ in 0..count {
        vin.push(TxIn::consensus_decode(decoder)?);
    }
    Ok(vin)
}

fn decode_outputs(decoder: &mut Decoder) -> Result<Vec<TxOut>, DecodeError> {
    let count = decoder.read_count()?;
    let mut vout = Vec::with_capacity(capacity_hint(count, decoder, MIN_TXOUT_SIZE));
    for _ in 0..count {
        vout.push(TxOut::consensus_decode(decoder)?);
    }
    Ok(vout)
}

#[derive(Debug)]
pub enum TransactionDecodeError {
    Decode(DecodeError),
    InvalidTransactionFormat(&'static str),
}

impl From<DecodeError> for TransactionDecodeError {
    fn from(error: DecodeError) -> Self {
        TransactionDecodeError::Decode(error)
    }
}

impl std::fmt::Display for TransactionDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionDecodeError::Decode(error) => write!(f, "{error}"),
            TransactionDecodeError::InvalidTransactionFormat(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TransactionDecodeError {}
