//! Script verification and sighash.

pub mod interpreter;
pub mod num;
pub mod opcodes;
mod secp;
pub mod sighash;
pub mod standard;

pub use interpreter::{
    verify_input, verify_script, ScriptError, ScriptFlags, TransactionSignatureChecker,
    DEFAULT_SCRIPT_VERIFY_FLAGS,
};
pub use sighash::{PrecomputedTransactionData, SigVersion, SighashType};
pub use standard::{classify_script_pubkey, ScriptType};
