//! Ties the UTXO store, chain builder and processor together behind one
//! commit boundary.

use blkaudit_consensus::{hash256_to_hex, Hash256};
use blkaudit_primitives::block::{Block, BlockDecodeError};
use blkaudit_storage::{KeyValueStore, StoreError, WriteBatch};

use crate::builder::{load_orphans, ChainBuilder};
use crate::checkpoint::{ensure_schema, load_checkpoint, stage_checkpoint, Checkpoint, Cursor};
use crate::processor::{ProcessingContext, TransactionProcessor};
use crate::utxo::{UtxoStats, UtxoStore};
use crate::verifier::DualVerifier;

#[derive(Debug)]
pub enum ChainStateError {
    Store(StoreError),
    Decode(BlockDecodeError),
    CorruptState(&'static str),
    SchemaMismatch { found: u32, expected: u32 },
    Rewind { requested: Cursor, committed: Cursor },
}

impl std::fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::Decode(err) => write!(f, "{err}"),
            ChainStateError::CorruptState(what) => write!(f, "corrupt {what} entry in store"),
            ChainStateError::SchemaMismatch { found, expected } => write!(
                f,
                "store schema version {found} does not match expected version {expected}"
            ),
            ChainStateError::Rewind {
                requested,
                committed,
            } => write!(
                f,
                "cannot restart at {requested}: the store already holds state committed at {committed}; use a fresh data directory to re-read earlier records"
            ),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

impl From<BlockDecodeError> for ChainStateError {
    fn from(err: BlockDecodeError) -> Self {
        ChainStateError::Decode(err)
    }
}

pub struct Auditor<S> {
    utxos: UtxoStore<S>,
    builder: ChainBuilder,
    processor: TransactionProcessor,
    context: ProcessingContext,
    cursor: Cursor,
    committed: Option<Checkpoint>,
    uncommitted_blocks: u64,
}

impl<S: KeyValueStore> Auditor<S> {
    /// Opens `store`, restoring the committed cursor, tip, statistics and
    /// orphan buffer.
    pub fn open(store: S, verifier: DualVerifier) -> Result<Self, ChainStateError> {
        ensure_schema(&store)?;
        let committed = load_checkpoint(&store)?;
        let orphans = load_orphans(&store)?;
        let checkpoint = committed.unwrap_or_default();

        if committed.is_some() {
            blkaudit_log::log_info!(
                "Resuming at {} (tip {}, {} utxos, {} orphans)",
                checkpoint.cursor,
                checkpoint
                    .tip
                    .as_ref()
                    .map(hash256_to_hex)
                    .unwrap_or_else(|| "none".to_string()),
                checkpoint.stats.count,
                orphans.len()
            );
        }

        Ok(Self {
            utxos: UtxoStore::new(store, checkpoint.stats),
            builder: ChainBuilder::restore(checkpoint.tip, orphans),
            processor: TransactionProcessor::new(verifier),
            context: ProcessingContext::default(),
            cursor: checkpoint.cursor,
            committed,
            uncommitted_blocks: 0,
        })
    }

    /// The last committed checkpoint, if the store was ever committed.
    pub fn committed(&self) -> Option<Checkpoint> {
        self.committed
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Moves the resume point without touching the store, for operator
    /// overrides. Refuses to move behind the committed cursor once blocks
    /// were applied or buffered, since those would be read a second time.
    pub fn set_cursor(&mut self, cursor: Cursor) -> Result<(), ChainStateError> {
        if let Some(committed) = self.committed {
            let holds_blocks = committed.tip.is_some() || self.builder.orphan_count() > 0;
            if holds_blocks && cursor < committed.cursor {
                return Err(ChainStateError::Rewind {
                    requested: cursor,
                    committed: committed.cursor,
                });
            }
        }
        self.cursor = cursor;
        Ok(())
    }

    /// Records that `blocks_consumed` records of `segment` have been handed to
    /// [`Auditor::process_block`]. Held in memory until the next commit.
    pub fn advance_cursor(&mut self, segment: u32, blocks_consumed: u32) {
        self.cursor = Cursor::new(segment, blocks_consumed);
    }

    /// Feeds one block through the chain builder. Returns how many blocks
    /// were applied as a result (zero when it was buffered).
    pub fn process_block(&mut self, block: Block) -> Result<usize, ChainStateError> {
        let Self {
            utxos,
            builder,
            processor,
            context,
            ..
        } = self;
        let applied = builder.accept(block, |block| processor.apply_block(utxos, block, context))?;
        self.uncommitted_blocks += applied as u64;
        Ok(applied)
    }

    /// Atomically writes every mutation since the previous commit together
    /// with the cursor, tip, statistics and orphan snapshot. On failure the
    /// pending mutations are kept, so a later commit writes them again.
    pub fn commit(&mut self) -> Result<Checkpoint, ChainStateError> {
        let mut batch = WriteBatch::with_capacity(self.utxos.pending_len() + 8);
        self.utxos.stage(&mut batch);
        self.builder.stage_orphans(&mut batch);
        let checkpoint = Checkpoint {
            cursor: self.cursor,
            tip: self.builder.tip(),
            stats: self.utxos.stats(),
        };
        stage_checkpoint(&mut batch, &checkpoint);

        let store = self.utxos.store();
        store.write_batch(&batch)?;
        store.persist()?;
        self.utxos.clear_pending();
        self.builder.mark_snapshotted();

        blkaudit_log::log_debug!(
            "Committed {} ops at {} ({} blocks since previous commit)",
            batch.len(),
            checkpoint.cursor,
            self.uncommitted_blocks
        );
        self.committed = Some(checkpoint);
        self.uncommitted_blocks = 0;
        Ok(checkpoint)
    }

    /// Blocks applied since the last commit.
    pub fn uncommitted_blocks(&self) -> u64 {
        self.uncommitted_blocks
    }

    pub fn tip(&self) -> Option<Hash256> {
        self.builder.tip()
    }

    pub fn orphan_count(&self) -> usize {
        self.builder.orphan_count()
    }

    pub fn stats(&self) -> UtxoStats {
        self.utxos.stats()
    }

    pub fn utxos(&self) -> &UtxoStore<S> {
        &self.utxos
    }

    pub fn context(&self) -> &ProcessingContext {
        &self.context
    }

    pub fn verifier(&self) -> &DualVerifier {
        self.processor.verifier()
    }
}
