//! Standard script templates: classification, witness programs and builders.

use crate::opcodes::{
    OP_0, OP_1, OP_16, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_RETURN,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    P2Wpkh,
    P2Wsh,
    /// Witness program with a version this verifier does not evaluate.
    WitnessUnknown,
    NullData,
    Unknown,
}

impl ScriptType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptType::P2Pk => "p2pk",
            ScriptType::P2Pkh => "p2pkh",
            ScriptType::P2Sh => "p2sh",
            ScriptType::P2Wpkh => "p2wpkh",
            ScriptType::P2Wsh => "p2wsh",
            ScriptType::WitnessUnknown => "witness_unknown",
            ScriptType::NullData => "nulldata",
            ScriptType::Unknown => "nonstandard",
        }
    }
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if let Some((version, program)) = witness_program(script) {
        match (version, program.len()) {
            (0, 20) => ScriptType::P2Wpkh,
            (0, 32) => ScriptType::P2Wsh,
            _ => ScriptType::WitnessUnknown,
        }
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if script.first() == Some(&OP_RETURN) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ (33 | 65)) => len as usize,
        _ => return false,
    };
    script.len() == key_len + 2 && script[script.len() - 1] == OP_CHECKSIG
}

/// Splits a BIP141 witness program into `(version, program)`: a version
/// opcode followed by one direct push of 2 to 40 bytes.
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if !(4..=42).contains(&script.len()) {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    if script[1] as usize + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 0x14]);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

pub fn p2wpkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.extend_from_slice(&[OP_0, 0x14]);
    script.extend_from_slice(pubkey_hash);
    script
}

pub fn p2wsh_script(script_hash: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.extend_from_slice(&[OP_0, 0x20]);
    script.extend_from_slice(script_hash);
    script
}
