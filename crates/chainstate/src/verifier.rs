//! Dual script verification: every resolvable spend is checked by each
//! configured oracle and the verdicts are logged, never enforced.

use std::cell::OnceCell;

use blkaudit_consensus::{hash256_to_hex, Hash256};
use blkaudit_primitives::transaction::Transaction;
use blkaudit_script::interpreter::{verify_input, ScriptFlags};
use blkaudit_script::sighash::PrecomputedTransactionData;
use blkaudit_script::standard::classify_script_pubkey;

use crate::utxo::OutputRecord;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Accepted,
    /// The oracle evaluated the spend and found it invalid.
    Rejected(String),
    /// The oracle could not evaluate the spend.
    Errored(String),
}

/// A spending transaction plus data derived from it once and shared by all of
/// its inputs and oracles.
pub struct SpendingTransaction<'a> {
    tx: &'a Transaction,
    txid: Hash256,
    serialized: OnceCell<Vec<u8>>,
    precomputed: OnceCell<PrecomputedTransactionData>,
}

impl<'a> SpendingTransaction<'a> {
    pub fn new(tx: &'a Transaction, txid: Hash256) -> Self {
        Self {
            tx,
            txid,
            serialized: OnceCell::new(),
            precomputed: OnceCell::new(),
        }
    }

    pub fn tx(&self) -> &'a Transaction {
        self.tx
    }

    pub fn txid(&self) -> &Hash256 {
        &self.txid
    }

    /// Network serialization, witness included when present.
    pub fn serialized(&self) -> &[u8] {
        self.serialized.get_or_init(|| self.tx.consensus_encode())
    }

    pub fn precomputed(&self) -> &PrecomputedTransactionData {
        self.precomputed
            .get_or_init(|| PrecomputedTransactionData::new(self.tx))
    }
}

pub trait ScriptOracle {
    fn name(&self) -> &'static str;

    fn verify(
        &self,
        spend: &SpendingTransaction<'_>,
        input_index: usize,
        prevout: &OutputRecord,
    ) -> Verdict;
}

/// The in-process interpreter from `blkaudit-script`.
pub struct InterpreterOracle {
    flags: ScriptFlags,
}

impl InterpreterOracle {
    pub fn new(flags: ScriptFlags) -> Self {
        Self { flags }
    }
}

impl ScriptOracle for InterpreterOracle {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn verify(
        &self,
        spend: &SpendingTransaction<'_>,
        input_index: usize,
        prevout: &OutputRecord,
    ) -> Verdict {
        match verify_input(
            spend.tx(),
            input_index,
            &prevout.script_pubkey,
            prevout.value,
            self.flags,
            Some(spend.precomputed()),
        ) {
            Ok(()) => Verdict::Accepted,
            Err(err) if err.is_fault() => Verdict::Errored(err.to_string()),
            Err(err) => Verdict::Rejected(err.to_string()),
        }
    }
}

/// Bitcoin Core's `libbitcoinconsensus`, linked through the
/// `bitcoinconsensus` crate.
#[cfg(feature = "libconsensus")]
pub struct LibConsensusOracle {
    flags: u32,
}

#[cfg(feature = "libconsensus")]
impl LibConsensusOracle {
    pub fn new(flags: u32) -> Self {
        Self { flags }
    }
}

#[cfg(feature = "libconsensus")]
impl ScriptOracle for LibConsensusOracle {
    fn name(&self) -> &'static str {
        "libconsensus"
    }

    fn verify(
        &self,
        spend: &SpendingTransaction<'_>,
        input_index: usize,
        prevout: &OutputRecord,
    ) -> Verdict {
        let Ok(amount) = u64::try_from(prevout.value) else {
            return Verdict::Errored(format!("negative amount {}", prevout.value));
        };
        match bitcoinconsensus::verify_with_flags(
            &prevout.script_pubkey,
            amount,
            spend.serialized(),
            input_index,
            self.flags,
        ) {
            Ok(()) => Verdict::Accepted,
            Err(bitcoinconsensus::Error::ERR_SCRIPT) => {
                Verdict::Rejected("script verification failed".to_string())
            }
            Err(err) => Verdict::Errored(format!("{err:?}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OracleCounters {
    pub accepted: u64,
    pub rejected: u64,
    pub errored: u64,
}

impl OracleCounters {
    fn record(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Accepted => self.accepted += 1,
            Verdict::Rejected(_) => self.rejected += 1,
            Verdict::Errored(_) => self.errored += 1,
        }
    }
}

/// Runs every configured oracle on each spend and logs what they report.
pub struct DualVerifier {
    oracles: Vec<Box<dyn ScriptOracle>>,
    counters: Vec<OracleCounters>,
}

impl DualVerifier {
    pub fn new(oracles: Vec<Box<dyn ScriptOracle>>) -> Self {
        let counters = vec![OracleCounters::default(); oracles.len()];
        Self { oracles, counters }
    }

    /// No oracles; spends are applied without any script checks.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn oracle_names(&self) -> Vec<&'static str> {
        self.oracles.iter().map(|oracle| oracle.name()).collect()
    }

    pub fn counters(&self) -> impl Iterator<Item = (&'static str, OracleCounters)> + '_ {
        self.oracles
            .iter()
            .zip(self.counters.iter())
            .map(|(oracle, counters)| (oracle.name(), *counters))
    }

    pub fn verify(
        &mut self,
        spend: &SpendingTransaction<'_>,
        input_index: usize,
        prevout: &OutputRecord,
    ) {
        for (oracle, counters) in self.oracles.iter().zip(self.counters.iter_mut()) {
            let verdict = oracle.verify(spend, input_index, prevout);
            counters.record(&verdict);
            match &verdict {
                Verdict::Accepted => {}
                Verdict::Rejected(reason) => {
                    blkaudit_log::log_warn!(
                        "{} rejected input {} of tx {} ({} output): {}",
                        oracle.name(),
                        input_index,
                        hash256_to_hex(spend.txid()),
                        classify_script_pubkey(&prevout.script_pubkey).as_str(),
                        reason
                    );
                }
                Verdict::Errored(fault) => {
                    blkaudit_log::log_error!(
                        "{} failed to verify input {} of tx {} ({} output): {}",
                        oracle.name(),
                        input_index,
                        hash256_to_hex(spend.txid()),
                        classify_script_pubkey(&prevout.script_pubkey).as_str(),
                        fault
                    );
                }
            }
        }
    }
}
