//! Script interpreter and validation.

use std::borrow::Cow;

use blkaudit_consensus::constants::{
    LOCKTIME_THRESHOLD, MAX_OPS_PER_SCRIPT, MAX_PUBKEYS_PER_MULTISIG, MAX_SCRIPT_ELEMENT_SIZE,
    MAX_SCRIPT_SIZE, MAX_STACK_SIZE, SEQUENCE_FINAL, SEQUENCE_LOCKTIME_DISABLE_FLAG,
    SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use blkaudit_primitives::hash::{hash160, sha256, sha256d};
use blkaudit_primitives::transaction::Transaction;
use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::{ecdsa::Signature, Message, PublicKey};
use sha1::Sha1;

use crate::num::{ScriptNum, DEFAULT_MAX_NUM_SIZE, LOCKTIME_MAX_NUM_SIZE};
use crate::opcodes::*;
use crate::secp::secp256k1_verify;
use crate::sighash::{
    signature_hash, PrecomputedTransactionData, SigVersion, SighashError, SighashType,
};
use crate::standard::{is_p2sh, p2pkh_script, witness_program};

pub type ScriptFlags = u32;

// Bit positions match libbitcoinconsensus so one flags value drives both verifiers.
pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_DERSIG: ScriptFlags = 1 << 2;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: ScriptFlags = 1 << 7;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: ScriptFlags = 1 << 9;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: ScriptFlags = 1 << 10;
pub const SCRIPT_VERIFY_WITNESS: ScriptFlags = 1 << 11;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: ScriptFlags = 1 << 12;
pub const SCRIPT_VERIFY_MINIMALIF: ScriptFlags = 1 << 13;
pub const SCRIPT_VERIFY_NULLFAIL: ScriptFlags = 1 << 14;
pub const SCRIPT_VERIFY_WITNESS_PUBKEYTYPE: ScriptFlags = 1 << 15;

/// Consensus rules active on mainnet since segwit.
pub const DEFAULT_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH
    | SCRIPT_VERIFY_DERSIG
    | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
    | SCRIPT_VERIFY_CHECKSEQUENCEVERIFY
    | SCRIPT_VERIFY_WITNESS
    | SCRIPT_VERIFY_NULLDUMMY;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptError {
    EvalFalse,
    OpReturn,
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    SigCount,
    PubkeyCount,
    Verify,
    EqualVerify,
    CheckSigVerify,
    CheckMultisigVerify,
    NumEqualVerify,
    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,
    NegativeLockTime,
    UnsatisfiedLockTime,
    NumOverflow,
    NumNotMinimal,
    SigHashType,
    SigDer,
    SigHighS,
    SigNullDummy,
    SigPushOnly,
    MinimalData,
    MinimalIf,
    NullFail,
    PubkeyType,
    CleanStack,
    DiscourageUpgradableNops,
    DiscourageUpgradableWitnessProgram,
    WitnessProgramWrongLength,
    WitnessProgramWitnessEmpty,
    WitnessProgramMismatch,
    WitnessMalleated,
    WitnessMalleatedP2sh,
    WitnessUnexpected,
    WitnessPubkeyType,
    /// The check itself could not run; not a verdict on the spend.
    Sighash(SighashError),
}

impl ScriptError {
    /// True when the error means the verifier could not evaluate the spend,
    /// as opposed to evaluating it and finding it invalid.
    pub fn is_fault(&self) -> bool {
        matches!(self, ScriptError::Sighash(_))
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            ScriptError::EvalFalse => "script evaluated without error but finished with a false/empty top stack element",
            ScriptError::OpReturn => "OP_RETURN was encountered",
            ScriptError::ScriptSize => "script is too big",
            ScriptError::PushSize => "push value size limit exceeded",
            ScriptError::OpCount => "operation limit exceeded",
            ScriptError::StackSize => "stack size limit exceeded",
            ScriptError::SigCount => "signature count negative or greater than pubkey count",
            ScriptError::PubkeyCount => "pubkey count negative or limit exceeded",
            ScriptError::Verify => "script failed an OP_VERIFY operation",
            ScriptError::EqualVerify => "script failed an OP_EQUALVERIFY operation",
            ScriptError::CheckSigVerify => "script failed an OP_CHECKSIGVERIFY operation",
            ScriptError::CheckMultisigVerify => "script failed an OP_CHECKMULTISIGVERIFY operation",
            ScriptError::NumEqualVerify => "script failed an OP_NUMEQUALVERIFY operation",
            ScriptError::BadOpcode => "opcode missing or not understood",
            ScriptError::DisabledOpcode => "attempted to use a disabled opcode",
            ScriptError::InvalidStackOperation => "operation not valid with the current stack size",
            ScriptError::InvalidAltstackOperation => "operation not valid with the current altstack size",
            ScriptError::UnbalancedConditional => "invalid OP_IF construction",
            ScriptError::NegativeLockTime => "negative locktime",
            ScriptError::UnsatisfiedLockTime => "locktime requirement not satisfied",
            ScriptError::NumOverflow => "script number overflow",
            ScriptError::NumNotMinimal => "non-minimally encoded script number",
            ScriptError::SigHashType => "signature hash type missing or not understood",
            ScriptError::SigDer => "non-canonical DER signature",
            ScriptError::SigHighS => "non-canonical signature: S value is unnecessarily high",
            ScriptError::SigNullDummy => "dummy CHECKMULTISIG argument must be zero",
            ScriptError::SigPushOnly => "only push operators allowed in signatures",
            ScriptError::MinimalData => "data push larger than necessary",
            ScriptError::MinimalIf => "OP_IF/NOTIF argument must be minimal",
            ScriptError::NullFail => "signature must be zero for failed CHECK(MULTI)SIG operation",
            ScriptError::PubkeyType => "public key is neither compressed or uncompressed",
            ScriptError::CleanStack => "stack size must be exactly one after execution",
            ScriptError::DiscourageUpgradableNops => "NOPx reserved for soft-fork upgrades",
            ScriptError::DiscourageUpgradableWitnessProgram => {
                "witness version reserved for soft-fork upgrades"
            }
            ScriptError::WitnessProgramWrongLength => "witness program has incorrect length",
            ScriptError::WitnessProgramWitnessEmpty => "witness program was passed an empty witness",
            ScriptError::WitnessProgramMismatch => "witness program hash mismatch",
            ScriptError::WitnessMalleated => "witness requires empty scriptSig",
            ScriptError::WitnessMalleatedP2sh => "witness requires only-redeemscript scriptSig",
            ScriptError::WitnessUnexpected => "witness provided for non-witness script",
            ScriptError::WitnessPubkeyType => "using non-compressed keys in segwit",
            ScriptError::Sighash(err) => return write!(f, "{err}"),
        };
        f.write_str(message)
    }
}

impl std::error::Error for ScriptError {}

impl From<SighashError> for ScriptError {
    fn from(err: SighashError) -> Self {
        ScriptError::Sighash(err)
    }
}

type Stack = Vec<Vec<u8>>;

/// Verifies input `input_index` of `tx` against the locking script and value
/// of the output it spends.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &[u8],
    amount: i64,
    flags: ScriptFlags,
    precomputed: Option<&PrecomputedTransactionData>,
) -> Result<(), ScriptError> {
    let input = tx
        .vin
        .get(input_index)
        .ok_or(SighashError::InputIndexOutOfRange {
            index: input_index,
            inputs: tx.vin.len(),
        })?;
    let checker = TransactionSignatureChecker {
        tx,
        input_index,
        amount,
        precomputed,
    };
    verify_script(
        &input.script_sig,
        script_pubkey,
        &input.witness,
        flags,
        &checker,
    )
}

pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    witness: &[Vec<u8>],
    flags: ScriptFlags,
    checker: &TransactionSignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_SIGPUSHONLY) != 0 && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack = Stack::new();
    eval_script(&mut stack, script_sig, flags, checker, SigVersion::Base)?;
    let stack_copy = if (flags & SCRIPT_VERIFY_P2SH) != 0 {
        stack.clone()
    } else {
        Stack::new()
    };
    eval_script(&mut stack, script_pubkey, flags, checker, SigVersion::Base)?;
    if !top_is_true(&stack) {
        return Err(ScriptError::EvalFalse);
    }

    let mut had_witness = false;
    if (flags & SCRIPT_VERIFY_WITNESS) != 0 {
        if let Some((version, program)) = witness_program(script_pubkey) {
            had_witness = true;
            if !script_sig.is_empty() {
                return Err(ScriptError::WitnessMalleated);
            }
            verify_witness_program(witness, version, program, flags, checker)?;
            stack.truncate(1);
        }
    }

    if (flags & SCRIPT_VERIFY_P2SH) != 0 && is_p2sh(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }
        stack = stack_copy;
        // The scriptSig evaluated to a true top element above, so it is non-empty.
        let redeem_script = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        eval_script(&mut stack, &redeem_script, flags, checker, SigVersion::Base)?;
        if !top_is_true(&stack) {
            return Err(ScriptError::EvalFalse);
        }

        if (flags & SCRIPT_VERIFY_WITNESS) != 0 {
            if let Some((version, program)) = witness_program(&redeem_script) {
                had_witness = true;
                let mut expected_sig = Vec::with_capacity(redeem_script.len() + 1);
                push_data(&mut expected_sig, &redeem_script);
                if script_sig != expected_sig.as_slice() {
                    return Err(ScriptError::WitnessMalleatedP2sh);
                }
                verify_witness_program(witness, version, program, flags, checker)?;
                stack.truncate(1);
            }
        }
    }

    if (flags & SCRIPT_VERIFY_CLEANSTACK) != 0 && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    if (flags & SCRIPT_VERIFY_WITNESS) != 0 && !had_witness && !witness.is_empty() {
        return Err(ScriptError::WitnessUnexpected);
    }

    Ok(())
}

fn verify_witness_program(
    witness: &[Vec<u8>],
    version: u8,
    program: &[u8],
    flags: ScriptFlags,
    checker: &TransactionSignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if version != 0 {
        // Future soft forks define these; until then any spend is valid.
        if (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM) != 0 {
            return Err(ScriptError::DiscourageUpgradableWitnessProgram);
        }
        return Ok(());
    }

    let (script, mut stack): (Cow<'_, [u8]>, Stack) = match program.len() {
        32 => {
            let (witness_script, rest) = witness
                .split_last()
                .ok_or(ScriptError::WitnessProgramWitnessEmpty)?;
            if sha256(witness_script).as_slice() != program {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            (Cow::Borrowed(witness_script.as_slice()), rest.to_vec())
        }
        20 => {
            if witness.len() != 2 {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            let mut pubkey_hash = [0u8; 20];
            pubkey_hash.copy_from_slice(program);
            (Cow::Owned(p2pkh_script(&pubkey_hash)), witness.to_vec())
        }
        _ => return Err(ScriptError::WitnessProgramWrongLength),
    };

    if stack.iter().any(|item| item.len() > MAX_SCRIPT_ELEMENT_SIZE) {
        return Err(ScriptError::PushSize);
    }
    eval_script(&mut stack, &script, flags, checker, SigVersion::WitnessV0)?;
    if stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }
    if !cast_to_bool(&stack[0]) {
        return Err(ScriptError::EvalFalse);
    }
    Ok(())
}

/// Signature and lock-time checks for one input of a spending transaction.
pub struct TransactionSignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    amount: i64,
    precomputed: Option<&'a PrecomputedTransactionData>,
}

impl<'a> TransactionSignatureChecker<'a> {
    pub fn new(
        tx: &'a Transaction,
        input_index: usize,
        amount: i64,
        precomputed: Option<&'a PrecomputedTransactionData>,
    ) -> Self {
        Self {
            tx,
            input_index,
            amount,
            precomputed,
        }
    }

    fn check_ecdsa_signature(
        &self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
        script_code: &[u8],
        sigversion: SigVersion,
    ) -> Result<bool, ScriptError> {
        let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
            return Ok(false);
        };
        let Some((&hash_type, der)) = sig_bytes.split_last() else {
            return Ok(false);
        };
        let sig = match Signature::from_der_lax(der) {
            Ok(sig) => sig,
            Err(_) => {
                blkaudit_log::log_trace!(
                    "unparseable DER signature (len {}): {}",
                    sig_bytes.len(),
                    bytes_to_hex(sig_bytes)
                );
                return Ok(false);
            }
        };
        let mut normalized = sig;
        normalized.normalize_s();

        let sighash = signature_hash(
            self.tx,
            self.input_index,
            script_code,
            self.amount,
            SighashType(u32::from(hash_type)),
            sigversion,
            self.precomputed,
        )?;
        let msg = Message::from_digest(sighash);
        Ok(secp256k1_verify()
            .verify_ecdsa(&msg, &normalized, &pubkey)
            .is_ok())
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        let threshold = i64::from(LOCKTIME_THRESHOLD);
        let tx_lock_time = i64::from(self.tx.lock_time);
        // Height-based and time-based lock times are not comparable.
        if (tx_lock_time < threshold) != (lock_time < threshold) {
            return false;
        }
        if lock_time > tx_lock_time {
            return false;
        }
        // A final input would let the transaction ignore its own lock time.
        self.tx.vin[self.input_index].sequence != SEQUENCE_FINAL
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        let tx_sequence = i64::from(self.tx.vin[self.input_index].sequence);
        if (self.tx.version as u32) < 2 {
            return false;
        }
        if tx_sequence & i64::from(SEQUENCE_LOCKTIME_DISABLE_FLAG) != 0 {
            return false;
        }
        let type_flag = i64::from(SEQUENCE_LOCKTIME_TYPE_FLAG);
        let mask = type_flag | i64::from(SEQUENCE_LOCKTIME_MASK);
        let tx_masked = tx_sequence & mask;
        let script_masked = sequence & mask;
        if (tx_masked < type_flag) != (script_masked < type_flag) {
            return false;
        }
        script_masked <= tx_masked
    }
}

pub fn eval_script(
    stack: &mut Stack,
    script: &[u8],
    flags: ScriptFlags,
    checker: &TransactionSignatureChecker<'_>,
    sigversion: SigVersion,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let require_minimal = (flags & SCRIPT_VERIFY_MINIMALDATA) != 0;
    let mut pc = 0usize;
    let mut code_separator = 0usize;
    let mut exec_stack: Vec<bool> = Vec::new();
    let mut alt_stack = Stack::new();
    let mut op_count = 0usize;

    while pc < script.len() {
        let exec = !exec_stack.contains(&false);
        let instruction = read_instruction(script, pc).ok_or(ScriptError::BadOpcode)?;
        let opcode = instruction.opcode;
        pc = instruction.end;

        if instruction.data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }
        if is_disabled(opcode) {
            return Err(ScriptError::DisabledOpcode);
        }

        if exec && opcode <= OP_PUSHDATA4 {
            if require_minimal && !check_minimal_push(instruction.data, opcode) {
                return Err(ScriptError::MinimalData);
            }
            stack.push(instruction.data.to_vec());
        } else if exec || (OP_IF..=OP_ENDIF).contains(&opcode) {
            match opcode {
                OP_1NEGATE | OP_1..=OP_16 => {
                    let value = i64::from(opcode) - i64::from(OP_1 - 1);
                    stack.push(ScriptNum::new(value).encode());
                }

                OP_NOP => {}
                OP_CHECKLOCKTIMEVERIFY => {
                    if (flags & SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY) == 0 {
                        discourage_nop(flags)?;
                        continue;
                    }
                    let lock_time = ScriptNum::decode(
                        top(stack, 1)?,
                        require_minimal,
                        LOCKTIME_MAX_NUM_SIZE,
                    )?
                    .value();
                    if lock_time < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    if !checker.check_lock_time(lock_time) {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
                OP_CHECKSEQUENCEVERIFY => {
                    if (flags & SCRIPT_VERIFY_CHECKSEQUENCEVERIFY) == 0 {
                        discourage_nop(flags)?;
                        continue;
                    }
                    let sequence = ScriptNum::decode(
                        top(stack, 1)?,
                        require_minimal,
                        LOCKTIME_MAX_NUM_SIZE,
                    )?
                    .value();
                    if sequence < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    if sequence & i64::from(SEQUENCE_LOCKTIME_DISABLE_FLAG) == 0
                        && !checker.check_sequence(sequence)
                    {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
                OP_NOP1 | OP_NOP4..=OP_NOP10 => discourage_nop(flags)?,

                OP_IF | OP_NOTIF => {
                    let mut value = false;
                    if exec {
                        let condition = stack.last().ok_or(ScriptError::UnbalancedConditional)?;
                        if sigversion == SigVersion::WitnessV0
                            && (flags & SCRIPT_VERIFY_MINIMALIF) != 0
                            && (condition.len() > 1
                                || (condition.len() == 1 && condition[0] != 1))
                        {
                            return Err(ScriptError::MinimalIf);
                        }
                        value = cast_to_bool(condition);
                        if opcode == OP_NOTIF {
                            value = !value;
                        }
                        stack.pop();
                    }
                    exec_stack.push(value);
                }
                OP_ELSE => {
                    let current = exec_stack
                        .last_mut()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    *current = !*current;
                }
                OP_ENDIF => {
                    exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                }
                OP_VERIFY => {
                    if !cast_to_bool(top(stack, 1)?) {
                        return Err(ScriptError::Verify);
                    }
                    stack.pop();
                }
                OP_RETURN => return Err(ScriptError::OpReturn),

                OP_TOALTSTACK => {
                    let value = pop(stack)?;
                    alt_stack.push(value);
                }
                OP_FROMALTSTACK => {
                    let value = alt_stack
                        .pop()
                        .ok_or(ScriptError::InvalidAltstackOperation)?;
                    stack.push(value);
                }
                OP_2DROP => {
                    require(stack, 2)?;
                    stack.truncate(stack.len() - 2);
                }
                OP_2DUP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 2..);
                }
                OP_3DUP => {
                    require(stack, 3)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 3..);
                }
                OP_2OVER => {
                    require(stack, 4)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 4..len - 2);
                }
                OP_2ROT => {
                    require(stack, 6)?;
                    let len = stack.len();
                    let first = stack.remove(len - 6);
                    let second = stack.remove(len - 6);
                    stack.push(first);
                    stack.push(second);
                }
                OP_2SWAP => {
                    require(stack, 4)?;
                    let len = stack.len();
                    stack.swap(len - 4, len - 2);
                    stack.swap(len - 3, len - 1);
                }
                OP_IFDUP => {
                    let value = top(stack, 1)?;
                    if cast_to_bool(value) {
                        let value = value.clone();
                        stack.push(value);
                    }
                }
                OP_DEPTH => {
                    let depth = ScriptNum::new(stack.len() as i64).encode();
                    stack.push(depth);
                }
                OP_DROP => {
                    pop(stack)?;
                }
                OP_DUP => {
                    let value = top(stack, 1)?.clone();
                    stack.push(value);
                }
                OP_NIP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.remove(len - 2);
                }
                OP_OVER => {
                    let value = top(stack, 2)?.clone();
                    stack.push(value);
                }
                OP_PICK | OP_ROLL => {
                    require(stack, 2)?;
                    let n = ScriptNum::decode(top(stack, 1)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?
                        .to_i32();
                    stack.pop();
                    if n < 0 || n as usize >= stack.len() {
                        return Err(ScriptError::InvalidStackOperation);
                    }
                    let index = stack.len() - 1 - n as usize;
                    let value = if opcode == OP_ROLL {
                        stack.remove(index)
                    } else {
                        stack[index].clone()
                    };
                    stack.push(value);
                }
                OP_ROT => {
                    require(stack, 3)?;
                    let len = stack.len();
                    stack.swap(len - 3, len - 2);
                    stack.swap(len - 2, len - 1);
                }
                OP_SWAP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.swap(len - 2, len - 1);
                }
                OP_TUCK => {
                    let value = top(stack, 1)?.clone();
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.insert(len - 2, value);
                }
                OP_SIZE => {
                    let size = top(stack, 1)?.len();
                    stack.push(ScriptNum::new(size as i64).encode());
                }

                OP_EQUAL | OP_EQUALVERIFY => {
                    require(stack, 2)?;
                    let right = pop(stack)?;
                    let left = pop(stack)?;
                    let equal = left == right;
                    if opcode == OP_EQUALVERIFY {
                        if !equal {
                            return Err(ScriptError::EqualVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(equal));
                    }
                }

                OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                    let value = ScriptNum::decode(top(stack, 1)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?
                        .value();
                    let result = match opcode {
                        OP_1ADD => value + 1,
                        OP_1SUB => value - 1,
                        OP_NEGATE => -value,
                        OP_ABS => value.abs(),
                        OP_NOT => i64::from(value == 0),
                        _ => i64::from(value != 0),
                    };
                    stack.pop();
                    stack.push(ScriptNum::new(result).encode());
                }
                OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
                | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
                | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                    require(stack, 2)?;
                    let left = ScriptNum::decode(top(stack, 2)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?
                        .value();
                    let right = ScriptNum::decode(top(stack, 1)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?
                        .value();
                    let result = match opcode {
                        OP_ADD => left + right,
                        OP_SUB => left - right,
                        OP_BOOLAND => i64::from(left != 0 && right != 0),
                        OP_BOOLOR => i64::from(left != 0 || right != 0),
                        OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(left == right),
                        OP_NUMNOTEQUAL => i64::from(left != right),
                        OP_LESSTHAN => i64::from(left < right),
                        OP_GREATERTHAN => i64::from(left > right),
                        OP_LESSTHANOREQUAL => i64::from(left <= right),
                        OP_GREATERTHANOREQUAL => i64::from(left >= right),
                        OP_MIN => left.min(right),
                        _ => left.max(right),
                    };
                    stack.truncate(stack.len() - 2);
                    if opcode == OP_NUMEQUALVERIFY {
                        if result == 0 {
                            return Err(ScriptError::NumEqualVerify);
                        }
                    } else {
                        stack.push(ScriptNum::new(result).encode());
                    }
                }
                OP_WITHIN => {
                    require(stack, 3)?;
                    let value = ScriptNum::decode(top(stack, 3)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?;
                    let min = ScriptNum::decode(top(stack, 2)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?;
                    let max = ScriptNum::decode(top(stack, 1)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?;
                    stack.truncate(stack.len() - 3);
                    stack.push(bool_to_vec(min <= value && value < max));
                }

                OP_RIPEMD160 => {
                    let data = pop(stack)?;
                    stack.push(Ripemd160::digest(data).to_vec());
                }
                OP_SHA1 => {
                    let data = pop(stack)?;
                    stack.push(Sha1::digest(data).to_vec());
                }
                OP_SHA256 => {
                    let data = pop(stack)?;
                    stack.push(sha256(&data).to_vec());
                }
                OP_HASH160 => {
                    let data = pop(stack)?;
                    stack.push(hash160(&data).to_vec());
                }
                OP_HASH256 => {
                    let data = pop(stack)?;
                    stack.push(sha256d(&data).to_vec());
                }
                OP_CODESEPARATOR => code_separator = pc,

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    require(stack, 2)?;
                    let sig = top(stack, 2)?;
                    let pubkey = top(stack, 1)?;
                    let mut script_code = Cow::Borrowed(&script[code_separator..]);
                    if sigversion == SigVersion::Base {
                        script_code = find_and_delete(script_code, sig);
                    }
                    check_signature_encoding(sig, flags)?;
                    check_pubkey_encoding(pubkey, flags, sigversion)?;
                    let success =
                        checker.check_ecdsa_signature(sig, pubkey, &script_code, sigversion)?;
                    if !success && (flags & SCRIPT_VERIFY_NULLFAIL) != 0 && !sig.is_empty() {
                        return Err(ScriptError::NullFail);
                    }
                    stack.truncate(stack.len() - 2);
                    if opcode == OP_CHECKSIGVERIFY {
                        if !success {
                            return Err(ScriptError::CheckSigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(success));
                    }
                }
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let success = eval_checkmultisig(
                        stack,
                        &script[code_separator..],
                        flags,
                        checker,
                        sigversion,
                        &mut op_count,
                    )?;
                    if opcode == OP_CHECKMULTISIGVERIFY {
                        if !success {
                            return Err(ScriptError::CheckMultisigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(success));
                    }
                }

                _ => {
                    blkaudit_log::log_trace!("bad opcode 0x{opcode:02x} at offset {}", pc - 1);
                    return Err(ScriptError::BadOpcode);
                }
            }
        }

        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

/// Evaluates `OP_CHECKMULTISIG`, consuming its operands (including the extra
/// dummy element) and returning whether enough signatures matched.
fn eval_checkmultisig(
    stack: &mut Stack,
    script_code: &[u8],
    flags: ScriptFlags,
    checker: &TransactionSignatureChecker<'_>,
    sigversion: SigVersion,
    op_count: &mut usize,
) -> Result<bool, ScriptError> {
    let require_minimal = (flags & SCRIPT_VERIFY_MINIMALDATA) != 0;

    let mut i = 1usize;
    let key_count = ScriptNum::decode(top(stack, i)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?
        .to_i32();
    if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
        return Err(ScriptError::PubkeyCount);
    }
    let mut keys_left = key_count as usize;
    *op_count += keys_left;
    if *op_count > MAX_OPS_PER_SCRIPT {
        return Err(ScriptError::OpCount);
    }
    i += 1;
    let mut ikey = i;
    // Depth of the last non-signature element, for NULLFAIL cleanup.
    let mut ikey2 = keys_left + 2;
    i += keys_left;

    let sig_count = ScriptNum::decode(top(stack, i)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?
        .to_i32();
    if sig_count < 0 || sig_count > key_count {
        return Err(ScriptError::SigCount);
    }
    let mut sigs_left = sig_count as usize;
    i += 1;
    let mut isig = i;
    i += sigs_left;
    // One extra element below the signatures is consumed as the dummy.
    require(stack, i)?;

    let mut script_code = Cow::Borrowed(script_code);
    if sigversion == SigVersion::Base {
        for k in 0..sigs_left {
            script_code = find_and_delete(script_code, top(stack, isig + k)?);
        }
    }

    let mut success = true;
    while success && sigs_left > 0 {
        let sig = top(stack, isig)?;
        let pubkey = top(stack, ikey)?;
        check_signature_encoding(sig, flags)?;
        check_pubkey_encoding(pubkey, flags, sigversion)?;
        if checker.check_ecdsa_signature(sig, pubkey, &script_code, sigversion)? {
            isig += 1;
            sigs_left -= 1;
        }
        ikey += 1;
        keys_left -= 1;
        if sigs_left > keys_left {
            success = false;
        }
    }

    while i > 1 {
        i -= 1;
        if !success
            && (flags & SCRIPT_VERIFY_NULLFAIL) != 0
            && ikey2 == 0
            && !top(stack, 1)?.is_empty()
        {
            return Err(ScriptError::NullFail);
        }
        ikey2 = ikey2.saturating_sub(1);
        stack.pop();
    }

    let dummy = pop(stack)?;
    if (flags & SCRIPT_VERIFY_NULLDUMMY) != 0 && !dummy.is_empty() {
        return Err(ScriptError::SigNullDummy);
    }
    Ok(success)
}

fn discourage_nop(flags: ScriptFlags) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS) != 0 {
        return Err(ScriptError::DiscourageUpgradableNops);
    }
    Ok(())
}

fn require(stack: &Stack, depth: usize) -> Result<(), ScriptError> {
    if stack.len() < depth {
        return Err(ScriptError::InvalidStackOperation);
    }
    Ok(())
}

/// Element `depth` positions from the top; `1` is the top itself.
fn top(stack: &Stack, depth: usize) -> Result<&Vec<u8>, ScriptError> {
    require(stack, depth)?;
    Ok(&stack[stack.len() - depth])
}

fn pop(stack: &mut Stack) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::InvalidStackOperation)
}

fn top_is_true(stack: &Stack) -> bool {
    stack.last().is_some_and(|value| cast_to_bool(value))
}

fn bool_to_vec(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

pub fn cast_to_bool(data: &[u8]) -> bool {
    for (index, byte) in data.iter().enumerate() {
        if *byte != 0 {
            // Negative zero is false.
            return !(index == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

/// Removes every push of `sig` that starts on an instruction boundary.
fn find_and_delete<'s>(script: Cow<'s, [u8]>, sig: &[u8]) -> Cow<'s, [u8]> {
    let mut pattern = Vec::with_capacity(sig.len() + 5);
    push_data(&mut pattern, sig);

    let mut result = Vec::with_capacity(script.len());
    let mut found = false;
    let mut pc = 0usize;
    let mut copied_until = 0usize;
    loop {
        result.extend_from_slice(&script[copied_until..pc]);
        while script.len() - pc >= pattern.len() && script[pc..pc + pattern.len()] == pattern[..] {
            pc += pattern.len();
            found = true;
        }
        copied_until = pc;
        if pc >= script.len() {
            break;
        }
        match read_instruction(&script, pc) {
            Some(instruction) => pc = instruction.end,
            None => break,
        }
    }

    if !found {
        return script;
    }
    result.extend_from_slice(&script[copied_until..]);
    Cow::Owned(result)
}

fn check_minimal_push(data: &[u8], opcode: u8) -> bool {
    if data.is_empty() {
        return opcode == OP_0;
    }
    if data.len() == 1 && (1..=16).contains(&data[0]) {
        return false;
    }
    if data.len() == 1 && data[0] == 0x81 {
        return false;
    }
    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 255 {
        return opcode == OP_PUSHDATA1;
    }
    if data.len() <= 65535 {
        return opcode == OP_PUSHDATA2;
    }
    true
}

fn check_signature_encoding(sig: &[u8], flags: ScriptFlags) -> Result<(), ScriptError> {
    // An empty signature is the canonical way to fail a CHECK(MULTI)SIG.
    if sig.is_empty() {
        return Ok(());
    }
    let strict = SCRIPT_VERIFY_DERSIG | SCRIPT_VERIFY_LOW_S | SCRIPT_VERIFY_STRICTENC;
    if (flags & strict) != 0 && !is_valid_signature_encoding(sig) {
        return Err(ScriptError::SigDer);
    }
    if (flags & SCRIPT_VERIFY_LOW_S) != 0 && !is_low_s(sig)? {
        return Err(ScriptError::SigHighS);
    }
    if (flags & SCRIPT_VERIFY_STRICTENC) != 0 {
        let hash_type = SighashType(u32::from(sig[sig.len() - 1]));
        if !hash_type.is_defined() {
            return Err(ScriptError::SigHashType);
        }
    }
    Ok(())
}

fn is_low_s(sig: &[u8]) -> Result<bool, ScriptError> {
    let der = &sig[..sig.len() - 1];
    let parsed = Signature::from_der_lax(der).map_err(|_| ScriptError::SigDer)?;
    let mut normalized = parsed;
    normalized.normalize_s();
    Ok(normalized == parsed)
}

fn check_pubkey_encoding(
    pubkey: &[u8],
    flags: ScriptFlags,
    sigversion: SigVersion,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_STRICTENC) != 0 && !is_compressed_or_uncompressed_pubkey(pubkey) {
        return Err(ScriptError::PubkeyType);
    }
    if (flags & SCRIPT_VERIFY_WITNESS_PUBKEYTYPE) != 0
        && sigversion == SigVersion::WitnessV0
        && !(pubkey.len() == 33 && (pubkey[0] == 0x02 || pubkey[0] == 0x03))
    {
        return Err(ScriptError::WitnessPubkeyType);
    }
    Ok(())
}

fn is_compressed_or_uncompressed_pubkey(pubkey: &[u8]) -> bool {
    match pubkey.len() {
        33 => pubkey[0] == 0x02 || pubkey[0] == 0x03,
        65 => pubkey[0] == 0x04,
        _ => false,
    }
}

/// Strict DER check from BIP66, including the trailing hash type byte.
fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    // 0x30 [total-length] 0x02 [R-length] [R] 0x02 [S-length] [S] [sighash]
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 || sig[1] as usize != sig.len() - 3 {
        return false;
    }
    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;
    if len_r + len_s + 7 != sig.len() {
        return false;
    }

    if sig[2] != 0x02 || len_r == 0 || sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && sig[5] & 0x80 == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 || len_s == 0 || sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && sig[len_r + 7] & 0x80 == 0 {
        return false;
    }
    true
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blkaudit_primitives::outpoint::OutPoint;
    use blkaudit_primitives::transaction::{TxIn, TxOut};

    // Small-integer push opcodes (OP_1 + n - 1) used by the tests below.
    const OP_2: u8 = OP_1 + 1;
    const OP_3: u8 = OP_1 + 2;
    const OP_5: u8 = OP_1 + 4;
    const OP_7: u8 = OP_1 + 6;

    fn dummy_tx() -> Transaction {
        Transaction {
            version: 2,
            vin: vec![TxIn {
                prevout: OutPoint::new([9u8; 32], 0),
                script_sig: Vec::new(),
                sequence: 0xffff_fffe,
                witness: Vec::new(),
            }],
            vout: vec![TxOut {
                value: 1,
                script_pubkey: vec![OP_1],
            }],
            lock_time: 100,
        }
    }

    fn run(script: &[u8], flags: ScriptFlags) -> Result<Stack, ScriptError> {
        let tx = dummy_tx();
        let checker = TransactionSignatureChecker::new(&tx, 0, 1, None);
        let mut stack = Stack::new();
        eval_script(&mut stack, script, flags, &checker, SigVersion::Base)?;
        Ok(stack)
    }

    #[test]
    fn arithmetic_and_comparison() {
        let stack = run(&[OP_2, OP_3, OP_ADD, OP_5, OP_NUMEQUAL], 0).expect("eval");
        assert_eq!(stack, vec![vec![1]]);
        let stack = run(&[OP_1, OP_3, OP_SUB], 0).expect("eval");
        assert_eq!(stack, vec![vec![0x82]]);
        let stack = run(&[OP_3, OP_2, OP_5, OP_WITHIN], 0).expect("eval");
        assert_eq!(stack, vec![vec![1]]);
    }

    #[test]
    fn conditionals_skip_unexecuted_branch() {
        let script = [OP_0, OP_IF, OP_RETURN, OP_ELSE, OP_7, OP_ENDIF];
        assert_eq!(run(&script, 0).expect("eval"), vec![vec![7]]);
        assert_eq!(
            run(&[OP_1, OP_IF, OP_1], 0),
            Err(ScriptError::UnbalancedConditional)
        );
        assert_eq!(run(&[OP_ENDIF], 0), Err(ScriptError::UnbalancedConditional));
    }

    #[test]
    fn disabled_opcode_fails_even_unexecuted() {
        let script = [OP_0, OP_IF, OP_CAT, OP_ENDIF];
        assert_eq!(run(&script, 0), Err(ScriptError::DisabledOpcode));
    }

    #[test]
    fn stack_manipulation() {
        let stack = run(&[OP_1, OP_2, OP_3, OP_ROT], 0).expect("eval");
        assert_eq!(stack, vec![vec![2], vec![3], vec![1]]);
        let stack = run(&[OP_1, OP_2, OP_3, OP_2, OP_ROLL], 0).expect("eval");
        assert_eq!(stack, vec![vec![2], vec![3], vec![1]]);
        let stack = run(&[OP_1, OP_2, OP_TUCK], 0).expect("eval");
        assert_eq!(stack, vec![vec![2], vec![1], vec![2]]);
        assert_eq!(run(&[OP_1, OP_5, OP_PICK], 0), Err(ScriptError::InvalidStackOperation));
        assert_eq!(run(&[OP_FROMALTSTACK], 0), Err(ScriptError::InvalidAltstackOperation));
    }

    #[test]
    fn minimal_data_enforced_with_flag() {
        let script = [0x01, 0x05];
        assert!(run(&script, 0).is_ok());
        assert_eq!(
            run(&script, SCRIPT_VERIFY_MINIMALDATA),
            Err(ScriptError::MinimalData)
        );
    }

    #[test]
    fn locktime_checks() {
        let ok = [0x01, 0x64, OP_CHECKLOCKTIMEVERIFY];
        assert!(run(&ok, SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY).is_ok());
        let too_high = [0x01, 0x65, OP_CHECKLOCKTIMEVERIFY];
        assert_eq!(
            run(&too_high, SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY),
            Err(ScriptError::UnsatisfiedLockTime)
        );
        assert!(run(&too_high, 0).is_ok());
        assert_eq!(
            run(&too_high, SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS),
            Err(ScriptError::DiscourageUpgradableNops)
        );
        assert_eq!(
            run(&[OP_1NEGATE, OP_CHECKSEQUENCEVERIFY], SCRIPT_VERIFY_CHECKSEQUENCEVERIFY),
            Err(ScriptError::NegativeLockTime)
        );
    }

    #[test]
    fn find_and_delete_matches_on_instruction_boundaries() {
        let sig = [0xaa, 0xbb];
        let script = [0x02, 0xaa, 0xbb, OP_DUP, 0x03, 0x02, 0xaa, 0xbb];
        let result = find_and_delete(Cow::Borrowed(&script[..]), &sig);
        assert_eq!(&result[..], &[OP_DUP, 0x03, 0x02, 0xaa, 0xbb]);

        let untouched = [OP_DUP];
        assert!(matches!(
            find_and_delete(Cow::Borrowed(&untouched[..]), &sig),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn strict_der_rules() {
        let mut sig = vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01, 0x01];
        assert!(is_valid_signature_encoding(&sig));
        sig[4] = 0x81;
        assert!(!is_valid_signature_encoding(&sig));
        assert!(!is_valid_signature_encoding(&[0x30, 0x00]));
    }

    #[test]
    fn empty_multisig_consumes_dummy() {
        let stack = run(&[OP_0, OP_0, OP_0, OP_CHECKMULTISIG], 0).expect("eval");
        assert_eq!(stack, vec![vec![1]]);
        assert_eq!(
            run(&[OP_1, OP_0, OP_0, OP_CHECKMULTISIG], SCRIPT_VERIFY_NULLDUMMY),
            Err(ScriptError::SigNullDummy)
        );
    }

    #[test]
    fn unknown_witness_version_passes() {
        let tx = dummy_tx();
        let mut program = vec![OP_1, 0x20];
        program.extend_from_slice(&[0x42; 32]);
        let result = verify_input(
            &tx,
            0,
            &program,
            1,
            DEFAULT_SCRIPT_VERIFY_FLAGS,
            None,
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn out_of_range_input_is_fault() {
        let tx = dummy_tx();
        let err = verify_input(&tx, 3, &[OP_1], 1, DEFAULT_SCRIPT_VERIFY_FLAGS, None)
            .expect_err("index out of range");
        assert!(err.is_fault());
    }
}
