use blkaudit_chainstate::checkpoint::Cursor;
use blkaudit_chainstate::{Auditor, DualVerifier};
use blkaudit_consensus::Hash256;
use blkaudit_primitives::block::{Block, BlockHeader};
use blkaudit_primitives::outpoint::OutPoint;
use blkaudit_primitives::transaction::{Transaction, TxIn, TxOut};
use blkaudit_storage::fjall::FjallStore;
use blkaudit_storage::{Column, KeyValueStore};

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
                version: 2,
                vin: vec![TxIn {
                    prevout: OutPoint::new(parent.transactions[0].txid(), 0),
                    script_sig: Vec::new(),
                    sequence: u32::MAX,
                    witness: Vec::new(),
                }],
                vout: vec![
                    TxOut {
                        value: 20,
                        script_pubkey: vec![0x51],
                    },
                    TxOut {
                        value: 30,
                        script_pubkey: vec![0x52],
                    },
                ],
                lock_time: 0,
            });
        }
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block: prev,
                merkle_root: [0; 32],
                time: 1_300_000_000 + height,
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

fn open(path: &std::path::Path) -> Auditor<FjallStore> {
    let store = FjallStore::open(path).expect("open store");
    Auditor::open(store, DualVerifier::disabled()).expect("open auditor")
}

fn utxo_rows(auditor: &Auditor<FjallStore>) -> Vec<(Vec<u8>, Vec<u8>)> {
    auditor
        .utxos()
        .store()
        .scan_prefix(Column::Utxo, &[])
        .expect("scan")
}

#[test]
fn crash_resumes_from_last_commit() {
    let blocks = chain(8);

    let reference_dir = tempfile::tempdir().expect("tempdir");
    let (reference_rows, reference_stats, reference_tip) = {
        let mut auditor = open(reference_dir.path());
        for (index, block) in blocks.iter().enumerate() {
            auditor.process_block(block.clone()).expect("apply");
            auditor.advance_cursor(0, index as u32 + 1);
        }
        auditor.commit().expect("commit");
        (utxo_rows(&auditor), auditor.stats(), auditor.tip())
    };

    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut auditor = open(dir.path());
        for (index, block) in blocks[..5].iter().enumerate() {
            auditor.process_block(block.clone()).expect("apply");
            auditor.advance_cursor(0, index as u32 + 1);
        }
        auditor.commit().expect("commit");
        // Applied but never committed: lost on drop.
        for (index, block) in blocks[5..7].iter().enumerate() {
            auditor.process_block(block.clone()).expect("apply");
            auditor.advance_cursor(0, index as u32 + 6);
        }
        assert_eq!(auditor.uncommitted_blocks(), 2);
    }

    let mut auditor = open(dir.path());
    assert_eq!(auditor.cursor(), Cursor::new(0, 5));
    assert_eq!(auditor.tip(), Some(blocks[4].hash()));
    assert_eq!(auditor.stats().count, 9);
    for block in &blocks[5..] {
        assert_eq!(auditor.process_block(block.clone()).expect("apply"), 1);
    }
    auditor.advance_cursor(0, 8);
    auditor.commit().expect("commit");

    assert_eq!(auditor.stats(), reference_stats);
    assert_eq!(auditor.tip(), reference_tip);
    assert_eq!(utxo_rows(&auditor), reference_rows);
}

#[test]
fn orphan_buffer_survives_restart() {
    let blocks = chain(4);
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut auditor = open(dir.path());
        auditor.process_block(blocks[0].clone()).expect("apply");
        assert_eq!(auditor.process_block(blocks[3].clone()).expect("apply"), 0);
        assert_eq!(auditor.process_block(blocks[2].clone()).expect("apply"), 0);
        auditor.advance_cursor(0, 3);
        auditor.commit().expect("commit");
    }

    let mut auditor = open(dir.path());
    assert_eq!(auditor.orphan_count(), 2);
    assert_eq!(auditor.process_block(blocks[1].clone()).expect("apply"), 3);
    assert_eq!(auditor.tip(), Some(blocks[3].hash()));
    auditor.commit().expect("commit");
    assert!(auditor
        .utxos()
        .store()
        .scan_prefix(Column::Orphan, &[])
        .expect("scan")
        .is_empty());
}

#[test]
fn created_and_spent_between_commits_never_reaches_store() {
    let blocks = chain(3);
    let dir = tempfile::tempdir().expect("tempdir");
    let mut auditor = open(dir.path());
    for block in &blocks {
        auditor.process_block(block.clone()).expect("apply");
    }
    auditor.commit().expect("commit");

    // Coinbase 0 and 1 outputs were both spent before the commit.
    let spent = OutPoint::new(blocks[0].transactions[0].txid(), 0);
    assert_eq!(auditor.utxos().get(&spent).expect("get"), None);
    assert_eq!(utxo_rows(&auditor).len() as u64, auditor.stats().count);
    assert_eq!(auditor.stats().count, 5);
    assert_eq!(auditor.stats().total_value, 150);
}
