use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blkaudit_chainstate::verifier::SpendingTransaction;
use blkaudit_chainstate::{
    Auditor, ChainStateError, Cursor, DualVerifier, OutputRecord, ScriptOracle, UtxoStats,
    Verdict,
};
use blkaudit_consensus::Hash256;
use blkaudit_primitives::block::{Block, BlockHeader};
use blkaudit_primitives::outpoint::OutPoint;
use blkaudit_primitives::transaction::{Transaction, TxIn, TxOut};
use blkaudit_storage::memory::MemoryStore;
use blkaudit_storage::{
    Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch,
};

fn coinbase(tag: u32, values: &[i64]) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: tag.to_le_bytes().to_vec(),
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vout: values
            .iter()
            .map(|value| TxOut {
                value: *value,
                script_pubkey: vec![0x51],
            })
            .collect(),
        lock_time: 0,
    }
}

fn spend(prevouts: &[OutPoint], values: &[i64]) -> Transaction {
    Transaction {
        version: 1,
        vin: prevouts
            .iter()
            .map(|prevout| TxIn {
                prevout: *prevout,
                script_sig: Vec::new(),
                sequence: u32::MAX,
                witness: Vec::new(),
            })
            .collect(),
        vout: values
            .iter()
            .map(|value| TxOut {
                value: *value,
                script_pubkey: vec![0x51],
            })
            .collect(),
        lock_time: 0,
    }
}

fn block(prev: Hash256, nonce: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_block: prev,
            merkle_root: [0; 32],
            time: 1_231_006_505 + nonce,
            bits: 0x1d00_ffff,
            nonce,
        },
        transactions,
    }
}

/// A linear chain of `len` blocks; each block after the first spends output 0
/// of the previous coinbase and creates two outputs.
fn chain(len: u32) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut prev = [0u8; 32];
    for height in 0..len {
        let cb = coinbase(height, &[50, 0]);
        let mut txs = vec![cb];
        if let Some(parent) = blocks.last() {
            let parent_cb = parent.transactions[0].txid();
            txs.push(spend(&[OutPoint::new(parent_cb, 0)], &[30, 20]));
        }
        let next = block(prev, height, txs);
        prev = next.hash();
        blocks.push(next);
    }
    blocks
}

fn open(store: Arc<MemoryStore>) -> Auditor<Arc<MemoryStore>> {
    Auditor::open(store, DualVerifier::disabled()).expect("open")
}

fn utxo_rows(store: &MemoryStore) -> Vec<(Vec<u8>, Vec<u8>)> {
    store.scan_prefix(Column::Utxo, &[]).expect("scan")
}

#[test]
fn genesis_then_spend() {
    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(Arc::clone(&store));

    let genesis_cb = coinbase(0, &[50, 0]);
    let genesis_txid = genesis_cb.txid();
    let genesis = block([0; 32], 0, vec![genesis_cb]);
    assert_eq!(auditor.process_block(genesis.clone()).expect("apply"), 1);
    assert_eq!(auditor.stats().count, 2);

    let spent = OutPoint::new(genesis_txid, 0);
    let next = block(genesis.hash(), 1, vec![spend(&[spent], &[49])]);
    auditor.process_block(next.clone()).expect("apply");
    assert_eq!(auditor.stats().count, 2);
    assert_eq!(auditor.utxos().get(&spent).expect("get"), None);
    assert_eq!(
        auditor
            .utxos()
            .get(&OutPoint::new(genesis_txid, 1))
            .expect("get"),
        Some(OutputRecord {
            value: 0,
            script_pubkey: vec![0x51]
        })
    );
    assert_eq!(auditor.tip(), Some(next.hash()));
}

#[test]
fn set_size_changes_by_created_minus_consumed() {
    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(Arc::clone(&store));
    let base = coinbase(0, &[10, 20, 30]);
    let base_txid = base.txid();
    let genesis = block([0; 32], 0, vec![base]);
    auditor.process_block(genesis.clone()).expect("apply");
    let before = auditor.stats().count;

    // N = 1 (coinbase) + 4, M = 2.
    let consumed = [OutPoint::new(base_txid, 0), OutPoint::new(base_txid, 2)];
    let next = block(
        genesis.hash(),
        1,
        vec![coinbase(1, &[50]), spend(&consumed, &[1, 2, 3, 4])],
    );
    auditor.process_block(next).expect("apply");
    assert_eq!(auditor.stats().count, before + 5 - 2);
    for id in consumed {
        assert_eq!(auditor.utxos().get(&id).expect("get"), None);
    }
}

#[test]
fn spend_within_same_block_resolves() {
    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(Arc::clone(&store));
    let cb = coinbase(0, &[50]);
    let cb_txid = cb.txid();
    let parent = spend(&[OutPoint::new(cb_txid, 0)], &[40]);
    let child = spend(&[OutPoint::new(parent.txid(), 0)], &[30]);
    auditor
        .process_block(block([0; 32], 0, vec![cb, parent, child]))
        .expect("apply");
    assert_eq!(auditor.context().missing_outputs, 0);
    assert_eq!(auditor.context().verified_inputs, 2);
    assert_eq!(auditor.stats(), UtxoStats { count: 1, total_value: 30 });
}

#[test]
fn missing_output_is_logged_and_ignored() {
    blkaudit_log::enable_capture(1024);
    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(Arc::clone(&store));
    let genesis = block([0; 32], 0, vec![coinbase(0, &[50])]);
    auditor.process_block(genesis.clone()).expect("apply");
    let before = auditor.stats();

    let unknown = OutPoint::new([0xee; 32], 3);
    let tx = spend(&[unknown], &[]);
    auditor
        .process_block(block(genesis.hash(), 1, vec![tx]))
        .expect("apply");

    assert_eq!(auditor.stats(), before);
    assert_eq!(auditor.context().missing_outputs, 1);
    let events = blkaudit_log::captured_on_current_thread();
    assert!(events
        .iter()
        .any(|event| event.level == blkaudit_log::Level::Warn
            && event.msg.starts_with("missing output")));
}

struct CountingOracle(Arc<AtomicUsize>);

impl ScriptOracle for CountingOracle {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn verify(&self, _: &SpendingTransaction<'_>, _: usize, _: &OutputRecord) -> Verdict {
        self.0.fetch_add(1, Ordering::SeqCst);
        Verdict::Accepted
    }
}

#[test]
fn coinbase_inputs_skip_lookup_and_verification() {
    let calls = Arc::new(AtomicUsize::new(0));
    let verifier = DualVerifier::new(vec![Box::new(CountingOracle(Arc::clone(&calls)))]);
    let store = Arc::new(MemoryStore::new());
    let mut auditor = Auditor::open(Arc::clone(&store), verifier).expect("open");

    for block in chain(3) {
        auditor.process_block(block).expect("apply");
    }
    let context = auditor.context();
    assert_eq!(context.coinbase_inputs, 3);
    assert_eq!(context.missing_outputs, 0);
    assert_eq!(context.verified_inputs, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let counters: Vec<_> = auditor.verifier().counters().collect();
    assert_eq!(counters[0].1.accepted, 2);
}

#[test]
fn reordering_is_transparent() {
    let blocks = chain(6);

    let ordered_store = Arc::new(MemoryStore::new());
    let mut ordered = open(Arc::clone(&ordered_store));
    for block in blocks.iter().cloned() {
        ordered.process_block(block).expect("apply");
    }
    ordered.commit().expect("commit");

    let shuffled_store = Arc::new(MemoryStore::new());
    let mut shuffled = open(Arc::clone(&shuffled_store));
    for index in [0usize, 3, 2, 5, 1, 4] {
        shuffled.process_block(blocks[index].clone()).expect("apply");
    }
    shuffled.commit().expect("commit");

    assert_eq!(shuffled.tip(), ordered.tip());
    assert_eq!(shuffled.orphan_count(), 0);
    assert_eq!(shuffled.stats(), ordered.stats());
    assert_eq!(utxo_rows(&shuffled_store), utxo_rows(&ordered_store));
}

#[test]
fn child_before_parent_is_spliced() {
    let blocks = chain(3);
    let (a, b, c) = (blocks[0].clone(), blocks[1].clone(), blocks[2].clone());
    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(Arc::clone(&store));

    assert_eq!(auditor.process_block(a).expect("apply"), 1);
    assert_eq!(auditor.process_block(c.clone()).expect("apply"), 0);
    assert_eq!(auditor.orphan_count(), 1);
    assert_eq!(auditor.process_block(b).expect("apply"), 2);
    assert_eq!(auditor.orphan_count(), 0);
    assert_eq!(auditor.tip(), Some(c.hash()));
}

#[test]
fn commit_persists_cursor_tip_and_stats() {
    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(Arc::clone(&store));
    for block in chain(2) {
        auditor.process_block(block).expect("apply");
    }
    auditor.advance_cursor(0, 2);
    let checkpoint = auditor.commit().expect("commit");
    drop(auditor);

    let reopened = open(Arc::clone(&store));
    assert_eq!(reopened.committed(), Some(checkpoint));
    assert_eq!(reopened.cursor(), checkpoint.cursor);
    assert_eq!(reopened.tip(), checkpoint.tip);
    assert_eq!(reopened.stats(), checkpoint.stats);
    assert_eq!(
        store.len(Column::Utxo).expect("len") as u64,
        checkpoint.stats.count
    );
}

/// Memory store whose next `failing_writes` batches are refused.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_writes: Arc<AtomicUsize>,
}

impl KeyValueStore for FlakyStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(column, key, value)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.inner.scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.inner.for_each_prefix(column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let refused = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StoreError::Backend("write refused".to_string()));
        }
        self.inner.write_batch(batch)
    }
}

#[test]
fn failed_commit_keeps_mutations_for_retry() {
    let inner = Arc::new(MemoryStore::new());
    let failing_writes = Arc::new(AtomicUsize::new(0));
    let store = FlakyStore {
        inner: Arc::clone(&inner),
        failing_writes: Arc::clone(&failing_writes),
    };
    let mut auditor = Auditor::open(store, DualVerifier::disabled()).expect("open");
    let blocks = chain(3);
    auditor.process_block(blocks[0].clone()).expect("apply");
    assert_eq!(auditor.process_block(blocks[2].clone()).expect("apply"), 0);
    auditor.advance_cursor(0, 2);

    failing_writes.store(1, Ordering::SeqCst);
    assert!(auditor.commit().is_err());
    assert!(auditor.committed().is_none());
    assert!(utxo_rows(&inner).is_empty());

    let checkpoint = auditor.commit().expect("retry");
    assert_eq!(checkpoint.cursor, Cursor::new(0, 2));
    drop(auditor);

    let reopened = open(Arc::clone(&inner));
    assert_eq!(reopened.cursor(), Cursor::new(0, 2));
    assert_eq!(reopened.tip(), Some(blocks[0].hash()));
    assert_eq!(reopened.orphan_count(), 1);
    assert_eq!(reopened.stats().count, 2);
    assert_eq!(utxo_rows(&inner).len() as u64, reopened.stats().count);
}

#[test]
fn rewind_behind_committed_blocks_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let blocks = chain(3);
    {
        let mut auditor = open(Arc::clone(&store));
        for (index, block) in blocks.iter().enumerate() {
            auditor.process_block(block.clone()).expect("apply");
            auditor.advance_cursor(0, index as u32 + 1);
        }
        auditor.commit().expect("commit");
    }

    let mut auditor = open(Arc::clone(&store));
    match auditor.set_cursor(Cursor::new(0, 0)) {
        Err(ChainStateError::Rewind {
            requested,
            committed,
        }) => {
            assert_eq!(requested, Cursor::new(0, 0));
            assert_eq!(committed, Cursor::new(0, 3));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(auditor.cursor(), Cursor::new(0, 3));
    assert_eq!(auditor.orphan_count(), 0);

    auditor.set_cursor(Cursor::new(2, 0)).expect("forward");
    assert_eq!(auditor.cursor(), Cursor::new(2, 0));
}

#[test]
fn rewind_is_allowed_before_any_block_is_committed() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut auditor = open(Arc::clone(&store));
        auditor.advance_cursor(1, 0);
        auditor.commit().expect("commit");
    }
    let mut auditor = open(Arc::clone(&store));
    auditor.set_cursor(Cursor::new(0, 0)).expect("nothing applied yet");
    assert_eq!(auditor.cursor(), Cursor::new(0, 0));
}

#[cfg(feature = "libconsensus")]
mod dual {
    use super::*;
    use blkaudit_chainstate::verifier::{InterpreterOracle, LibConsensusOracle};
    use blkaudit_primitives::hash::hash160;
    use blkaudit_script::interpreter::DEFAULT_SCRIPT_VERIFY_FLAGS;
    use blkaudit_script::opcodes::push_data;
    use blkaudit_script::standard::p2pkh_script;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    #[test]
    fn malformed_signature_rejected_by_both_oracles() {
        blkaudit_log::enable_capture(1024);
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x22; 32]).expect("key");
        let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize();

        let mut cb = coinbase(0, &[5_000]);
        cb.vout[0].script_pubkey = p2pkh_script(&hash160(&pubkey));
        let funding = OutPoint::new(cb.txid(), 0);
        let genesis = block([0; 32], 0, vec![cb]);

        let mut bad = spend(&[funding], &[4_000]);
        let mut script_sig = Vec::new();
        push_data(&mut script_sig, &[0x30, 0x02, 0x01, 0x00, 0x01]);
        push_data(&mut script_sig, &pubkey);
        bad.vin[0].script_sig = script_sig;
        let next = block(genesis.hash(), 1, vec![bad]);

        let verifier = DualVerifier::new(vec![
            Box::new(InterpreterOracle::new(DEFAULT_SCRIPT_VERIFY_FLAGS)),
            Box::new(LibConsensusOracle::new(DEFAULT_SCRIPT_VERIFY_FLAGS)),
        ]);
        let store = Arc::new(MemoryStore::new());
        let mut auditor = Auditor::open(Arc::clone(&store), verifier).expect("open");
        auditor.process_block(genesis).expect("apply");
        auditor.process_block(next).expect("apply");

        let rejections: Vec<_> = blkaudit_log::captured_on_current_thread()
            .into_iter()
            .filter(|event| {
                event.level == blkaudit_log::Level::Warn && event.msg.contains(" rejected input ")
            })
            .collect();
        assert_eq!(rejections.len(), 2);
        assert!(rejections[0].msg.starts_with("interpreter"));
        assert!(rejections[1].msg.starts_with("libconsensus"));

        assert_eq!(auditor.utxos().get(&funding).expect("get"), None);
        for (_, counters) in auditor.verifier().counters() {
            assert_eq!(counters.rejected, 1);
        }
    }
}
