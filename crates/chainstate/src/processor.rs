//! Applies accepted blocks to the UTXO set and routes every spend through the
//! dual verifier.

use blkaudit_consensus::hash256_to_hex;
use blkaudit_consensus::money::money_range;
use blkaudit_primitives::block::Block;
use blkaudit_primitives::outpoint::OutPoint;
use blkaudit_primitives::transaction::Transaction;
use blkaudit_storage::{KeyValueStore, StoreError};

use crate::utxo::{OutputRecord, UtxoStore};
use crate::verifier::{DualVerifier, SpendingTransaction};

/// Running totals for the current process; not persisted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProcessingContext {
    pub blocks: u64,
    pub transactions: u64,
    pub outputs_created: u64,
    pub verified_inputs: u64,
    pub missing_outputs: u64,
    pub coinbase_inputs: u64,
}

pub struct TransactionProcessor {
    verifier: DualVerifier,
}

impl TransactionProcessor {
    pub fn new(verifier: DualVerifier) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &DualVerifier {
        &self.verifier
    }

    pub fn apply_block<S: KeyValueStore>(
        &mut self,
        utxos: &mut UtxoStore<S>,
        block: &Block,
        context: &mut ProcessingContext,
    ) -> Result<(), StoreError> {
        for tx in &block.transactions {
            self.apply_transaction(utxos, tx, context)?;
        }
        context.blocks += 1;
        Ok(())
    }

    /// Inserts every output of `tx`, then resolves its inputs in order. Outputs
    /// go first so a spend of an output created earlier in the same block
    /// resolves.
    pub fn apply_transaction<S: KeyValueStore>(
        &mut self,
        utxos: &mut UtxoStore<S>,
        tx: &Transaction,
        context: &mut ProcessingContext,
    ) -> Result<(), StoreError> {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();

        for (index, output) in tx.vout.iter().enumerate() {
            let outpoint = OutPoint::new(txid, index as u32);
            // Two early coinbases share a txid with an unspent predecessor.
            if is_coinbase && utxos.remove(&outpoint)? {
                blkaudit_log::log_warn!(
                    "coinbase output {}:{} replaces an unspent duplicate",
                    hash256_to_hex(&txid),
                    index
                );
            }
            if !money_range(output.value) {
                blkaudit_log::log_warn!(
                    "output {}:{} carries out-of-range value {}",
                    hash256_to_hex(&txid),
                    index,
                    output.value
                );
            }
            utxos.put(
                &outpoint,
                OutputRecord {
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                },
            );
            context.outputs_created += 1;
        }

        let spend = SpendingTransaction::new(tx, txid);
        for (input_index, input) in tx.vin.iter().enumerate() {
            if input.prevout.is_null() {
                context.coinbase_inputs += 1;
                continue;
            }
            match utxos.take(&input.prevout)? {
                Some(prevout) => {
                    self.verifier.verify(&spend, input_index, &prevout);
                    context.verified_inputs += 1;
                }
                None => {
                    context.missing_outputs += 1;
                    blkaudit_log::log_warn!(
                        "missing output {}:{} spent by input {} of tx {}",
                        hash256_to_hex(&input.prevout.hash),
                        input.prevout.index,
                        input_index,
                        hash256_to_hex(&txid)
                    );
                }
            }
        }

        context.transactions += 1;
        Ok(())
    }
}
