use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blkaudit::archive::segment_path;
use blkaudit::import::{run_import, ImportOutcome, ImportSettings};
use blkaudit_chainstate::{Auditor, Cursor, DualVerifier};
use blkaudit_consensus::Hash256;
use blkaudit_primitives::block::{Block, BlockHeader};
use blkaudit_primitives::outpoint::OutPoint;
use blkaudit_primitives::transaction::{Transaction, TxIn, TxOut};
use blkaudit_storage::memory::MemoryStore;
use blkaudit_storage::{
    Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch,
};
use tokio::sync::watch;

const MAGIC: u32 = 0xD9B4_BEF9;

fn chain(len: u32) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut prev: Hash256 = [0; 32];
    for height in 0..len {
        let mut transactions = vec![Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: height.to_le_bytes().to_vec(),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }];
        if let Some(parent) = blocks.last() {
            transactions.push(Transaction {
                version: 1,
                vin: vec![TxIn {
                    prevout: OutPoint::new(parent.transactions[0].txid(), 0),
                    script_sig: Vec::new(),
                    sequence: u32::MAX,
                    witness: Vec::new(),
                }],
                vout: vec![TxOut {
                    value: 50,
                    script_pubkey: vec![0x51],
                }],
                lock_time: 0,
            });
        }
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block: prev,
                merkle_root: [0; 32],
                time: 1_400_000_000 + height,
                bits: 0x207f_ffff,
                nonce: height,
            },
            transactions,
        };
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

fn write_segment(prefix: &Path, index: u32, blocks: &[&Block], zero_tail: bool) {
    let mut bytes = Vec::new();
    for block in blocks {
        let payload = block.consensus_encode();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
    }
    if zero_tail {
        bytes.extend_from_slice(&[0u8; 256]);
    }
    std::fs::write(segment_path(prefix, index), bytes).expect("write segment");
}

fn settings(prefix: PathBuf, end_segment: Option<u32>) -> ImportSettings {
    ImportSettings {
        blocks_prefix: prefix,
        magic: MAGIC,
        end_segment,
        commit_interval: 2,
        queue: 2,
        status_interval: Duration::ZERO,
    }
}

fn open(store: &Arc<MemoryStore>) -> Auditor<Arc<MemoryStore>> {
    Auditor::open(Arc::clone(store), DualVerifier::disabled()).expect("open")
}

#[test]
fn imports_out_of_order_segments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(5);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[2], &blocks[1]], false);
    write_segment(&prefix, 1, &[&blocks[3], &blocks[4]], true);

    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(&store);
    let (_tx, shutdown) = watch::channel(false);
    let summary = run_import(&mut auditor, &settings(prefix, None), &shutdown).expect("import");

    assert_eq!(summary.outcome, ImportOutcome::Completed);
    assert_eq!(summary.blocks_read, 5);
    assert_eq!(summary.blocks_applied, 5);
    assert_eq!(summary.segments_finished, 2);
    assert_eq!(summary.cursor, Cursor::new(2, 0));
    assert_eq!(auditor.tip(), Some(blocks[4].hash()));
    assert_eq!(auditor.orphan_count(), 0);
    assert_eq!(auditor.stats().count, 5);
    assert_eq!(auditor.context().missing_outputs, 0);
    assert_eq!(auditor.committed().map(|cp| cp.cursor), Some(Cursor::new(2, 0)));
}

#[test]
fn end_bound_then_resume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(4);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[1]], false);
    write_segment(&prefix, 1, &[&blocks[2], &blocks[3]], false);
    let store = Arc::new(MemoryStore::new());
    let (_tx, shutdown) = watch::channel(false);

    {
        let mut auditor = open(&store);
        let summary = run_import(&mut auditor, &settings(prefix.clone(), Some(0)), &shutdown)
            .expect("import");
        assert_eq!(summary.outcome, ImportOutcome::Completed);
        assert_eq!(summary.cursor, Cursor::new(1, 0));
        assert_eq!(auditor.tip(), Some(blocks[1].hash()));
    }

    let mut auditor = open(&store);
    assert_eq!(auditor.cursor(), Cursor::new(1, 0));
    let summary = run_import(&mut auditor, &settings(prefix, None), &shutdown).expect("import");
    assert_eq!(summary.blocks_read, 2);
    assert_eq!(auditor.tip(), Some(blocks[3].hash()));
    assert_eq!(auditor.context().missing_outputs, 0);
}

#[test]
fn shutdown_stops_before_reading() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(2);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[1]], false);

    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(&store);
    let (_tx, shutdown) = watch::channel(true);
    let summary = run_import(&mut auditor, &settings(prefix, None), &shutdown).expect("import");
    assert_eq!(summary.outcome, ImportOutcome::Shutdown);
    assert_eq!(summary.blocks_read, 0);
    assert_eq!(summary.cursor, Cursor::new(0, 0));
    assert!(auditor.committed().is_some());
}

#[test]
fn corrupt_record_fails_after_committing_progress() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(2);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[1]], false);
    let path = segment_path(&prefix, 0);
    let mut bytes = std::fs::read(&path).expect("read");
    bytes.extend_from_slice(&0x0709_110Bu32.to_le_bytes());
    bytes.extend_from_slice(&[4, 0, 0, 0, 1, 2, 3, 4]);
    std::fs::write(&path, bytes).expect("write");

    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(&store);
    let (_tx, shutdown) = watch::channel(false);
    let err = run_import(&mut auditor, &settings(prefix, None), &shutdown)
        .expect_err("bad marker is fatal");
    assert!(err.contains("bad record marker"), "{err}");

    drop(auditor);
    let reopened = open(&store);
    assert_eq!(reopened.cursor(), Cursor::new(0, 2));
    assert_eq!(reopened.tip(), Some(blocks[1].hash()));
}

#[test]
fn undecodable_payload_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let mut bytes = MAGIC.to_le_bytes().to_vec();
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(&[1, 2, 3]);
    std::fs::write(segment_path(&prefix, 0), bytes).expect("write");

    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(&store);
    let (_tx, shutdown) = watch::channel(false);
    let err = run_import(&mut auditor, &settings(prefix, None), &shutdown)
        .expect_err("garbage payload");
    assert!(err.contains("does not decode"), "{err}");
    assert_eq!(auditor.committed().map(|cp| cp.cursor), Some(Cursor::new(0, 0)));
}

#[test]
fn skip_override_starts_mid_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(3);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[1], &blocks[2]], false);

    let store = Arc::new(MemoryStore::new());
    let mut auditor = open(&store);
    auditor.set_cursor(Cursor::new(0, 1)).expect("fresh store accepts any start");
    let (_tx, shutdown) = watch::channel(false);
    let summary = run_import(&mut auditor, &settings(prefix, None), &shutdown).expect("import");

    assert_eq!(summary.blocks_read, 2);
    assert_eq!(auditor.tip(), Some(blocks[2].hash()));
    // The first applied block spends an output of the skipped one.
    assert_eq!(auditor.context().missing_outputs, 1);
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

fn open_flaky(store: &Arc<MemoryStore>, failing_writes: usize) -> Auditor<FlakyStore> {
    let flaky = FlakyStore {
        inner: Arc::clone(store),
        failing_writes: Arc::new(AtomicUsize::new(0)),
    };
    let armed = Arc::clone(&flaky.failing_writes);
    let auditor = Auditor::open(flaky, DualVerifier::disabled()).expect("open");
    armed.store(failing_writes, Ordering::SeqCst);
    auditor
}

#[test]
fn failed_cadence_commit_is_retried_on_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(4);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[1], &blocks[2], &blocks[3]], false);
    let store = Arc::new(MemoryStore::new());
    let (_tx, shutdown) = watch::channel(false);

    {
        let mut auditor = open_flaky(&store, 1);
        let err = run_import(&mut auditor, &settings(prefix.clone(), None), &shutdown)
            .expect_err("cadence commit refused");
        assert!(err.contains("commit at segment 0 record 2 failed"), "{err}");
    }

    let mut auditor = open(&store);
    assert_eq!(auditor.cursor(), Cursor::new(0, 2));
    assert_eq!(auditor.tip(), Some(blocks[1].hash()));
    let rows = store.scan_prefix(Column::Utxo, &[]).expect("scan");
    assert_eq!(rows.len() as u64, auditor.stats().count);
    assert_eq!(auditor.stats().count, 2);

    let summary = run_import(&mut auditor, &settings(prefix, None), &shutdown).expect("import");
    assert_eq!(summary.blocks_read, 2);
    assert_eq!(auditor.tip(), Some(blocks[3].hash()));
    assert_eq!(auditor.context().missing_outputs, 0);
}

#[test]
fn refused_final_commit_leaves_previous_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("blk");
    let blocks = chain(2);
    write_segment(&prefix, 0, &[&blocks[0], &blocks[1]], false);
    let store = Arc::new(MemoryStore::new());
    let (_tx, shutdown) = watch::channel(false);

    {
        let mut auditor = open_flaky(&store, usize::MAX);
        let err = run_import(&mut auditor, &settings(prefix, None), &shutdown)
            .expect_err("every commit refused");
        assert!(err.contains("write refused"), "{err}");
        assert!(auditor.committed().is_none());
    }

    let auditor = open(&store);
    assert!(auditor.committed().is_none());
    assert_eq!(auditor.cursor(), Cursor::new(0, 0));
    assert_eq!(auditor.tip(), None);
    assert!(store.scan_prefix(Column::Utxo, &[]).expect("scan").is_empty());
}
