//! Signature hashing for legacy and witness v0 inputs.

use blkaudit_consensus::Hash256;
use blkaudit_primitives::encoding::{Encodable, Encoder};
use blkaudit_primitives::hash::sha256d;
use blkaudit_primitives::transaction::Transaction;

use crate::opcodes::{read_instruction, OP_CODESEPARATOR};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Digest signed by a legacy `SIGHASH_SINGLE` signature whose input has no
/// matching output: the integer one, little-endian.
pub const SIGHASH_SINGLE_NO_OUTPUT: Hash256 = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }

    /// One of ALL, NONE or SINGLE, optionally with ANYONECANPAY.
    pub fn is_defined(self) -> bool {
        let base = self.0 & !SIGHASH_ANYONECANPAY;
        (SIGHASH_ALL..=SIGHASH_SINGLE).contains(&base)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigVersion {
    Base,
    WitnessV0,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SighashError {
    InputIndexOutOfRange { index: usize, inputs: usize },
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange { index, inputs } => {
                write!(f, "input index {index} out of range ({inputs} inputs)")
            }
        }
    }
}

impl std::error::Error for SighashError {}

/// Per-transaction digests shared by every witness v0 input (BIP143).
#[derive(Clone, Debug)]
pub struct PrecomputedTransactionData {
    hash_prevouts: Hash256,
    hash_sequence: Hash256,
    hash_outputs: Hash256,
}

impl PrecomputedTransactionData {
    pub fn new(tx: &Transaction) -> Self {
        let mut prevouts = Encoder::with_capacity(tx.vin.len() * 36);
        let mut sequences = Encoder::with_capacity(tx.vin.len() * 4);
        for input in &tx.vin {
            input.prevout.consensus_encode(&mut prevouts);
            sequences.write_u32_le(input.sequence);
        }
        let mut outputs = Encoder::new();
        for output in &tx.vout {
            output.consensus_encode(&mut outputs);
        }
        Self {
            hash_prevouts: sha256d(&prevouts.into_inner()),
            hash_sequence: sha256d(&sequences.into_inner()),
            hash_outputs: sha256d(&outputs.into_inner()),
        }
    }
}

pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    sighash_type: SighashType,
    sigversion: SigVersion,
    precomputed: Option<&PrecomputedTransactionData>,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange {
            index: input_index,
            inputs: tx.vin.len(),
        });
    }
    match sigversion {
        SigVersion::Base => Ok(legacy_signature_hash(
            tx,
            input_index,
            script_code,
            sighash_type,
        )),
        SigVersion::WitnessV0 => {
            let owned;
            let precomputed = match precomputed {
                Some(data) => data,
                None => {
                    owned = PrecomputedTransactionData::new(tx);
                    &owned
                }
            };
            Ok(witness_v0_signature_hash(
                tx,
                input_index,
                script_code,
                amount,
                sighash_type,
                precomputed,
            ))
        }
    }
}

fn legacy_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Hash256 {
    let base = sighash_type.base_type();
    if base == SIGHASH_SINGLE && input_index >= tx.vout.len() {
        return SIGHASH_SINGLE_NO_OUTPUT;
    }
    let anyone_can_pay = sighash_type.has_anyone_can_pay();

    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);

    let inputs: Vec<usize> = if anyone_can_pay {
        vec![input_index]
    } else {
        (0..tx.vin.len()).collect()
    };
    encoder.write_varint(inputs.len() as u64);
    for index in inputs {
        let input = &tx.vin[index];
        input.prevout.consensus_encode(&mut encoder);
        if index == input_index {
            write_script_code(&mut encoder, script_code);
        } else {
            encoder.write_varint(0);
        }
        if index != input_index && (base == SIGHASH_NONE || base == SIGHASH_SINGLE) {
            encoder.write_u32_le(0);
        } else {
            encoder.write_u32_le(input.sequence);
        }
    }

    match base {
        SIGHASH_NONE => encoder.write_varint(0),
        SIGHASH_SINGLE => {
            encoder.write_varint(input_index as u64 + 1);
            for _ in 0..input_index {
                encoder.write_i64_le(-1);
                encoder.write_varint(0);
            }
            tx.vout[input_index].consensus_encode(&mut encoder);
        }
        _ => {
            encoder.write_varint(tx.vout.len() as u64);
            for output in &tx.vout {
                output.consensus_encode(&mut encoder);
            }
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);
    sha256d(&encoder.into_inner())
}

/// Writes `script_code` with every `OP_CODESEPARATOR` removed.
fn write_script_code(encoder: &mut Encoder, script_code: &[u8]) {
    let mut stripped = Vec::with_capacity(script_code.len());
    let mut pc = 0usize;
    while pc < script_code.len() {
        match read_instruction(script_code, pc) {
            Some(instruction) => {
                if instruction.opcode != OP_CODESEPARATOR {
                    stripped.extend_from_slice(&script_code[pc..instruction.end]);
                }
                pc = instruction.end;
            }
            None => {
                stripped.extend_from_slice(&script_code[pc..]);
                break;
            }
        }
    }
    encoder.write_var_bytes(&stripped);
}

fn witness_v0_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    sighash_type: SighashType,
    precomputed: &PrecomputedTransactionData,
) -> Hash256 {
    let base = sighash_type.base_type();
    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let zero = [0u8; 32];

    let hash_prevouts = if anyone_can_pay {
        zero
    } else {
        precomputed.hash_prevouts
    };
    let hash_sequence = if anyone_can_pay || base == SIGHASH_SINGLE || base == SIGHASH_NONE {
        zero
    } else {
        precomputed.hash_sequence
    };
    let hash_outputs = if base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        precomputed.hash_outputs
    } else if base == SIGHASH_SINGLE && input_index < tx.vout.len() {
        let mut single = Encoder::new();
        tx.vout[input_index].consensus_encode(&mut single);
        sha256d(&single.into_inner())
    } else {
        zero
    };

    let input = &tx.vin[input_index];
    let mut encoder = Encoder::with_capacity(156 + script_code.len());
    encoder.write_i32_le(tx.version);
    encoder.write_hash_le(&hash_prevouts);
    encoder.write_hash_le(&hash_sequence);
    input.prevout.consensus_encode(&mut encoder);
    encoder.write_var_bytes(script_code);
    encoder.write_i64_le(amount);
    encoder.write_u32_le(input.sequence);
    encoder.write_hash_le(&hash_outputs);
    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);
    sha256d(&encoder.into_inner())
}
