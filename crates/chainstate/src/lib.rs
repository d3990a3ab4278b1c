//! UTXO set, resume checkpoint, chain ordering and dual script verification.

pub mod auditor;
pub mod builder;
pub mod checkpoint;
pub mod processor;
pub mod utxo;
pub mod verifier;

pub use auditor::{Auditor, ChainStateError};
pub use checkpoint::{Checkpoint, Cursor};
pub use utxo::{OutputRecord, UtxoStats};
pub use verifier::{DualVerifier, ScriptOracle, Verdict};
