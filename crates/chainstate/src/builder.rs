//! Orders blocks into a single chain: blocks extending the tip are applied at
//! once, the rest wait in an orphan buffer keyed by their parent hash.

use std::collections::{HashMap, HashSet, VecDeque};

use blkaudit_consensus::Hash256;
use blkaudit_primitives::block::Block;
use blkaudit_storage::{Column, KeyValueStore, WriteBatch};

use crate::auditor::ChainStateError;

struct Orphan {
    hash: Hash256,
    sequence: u64,
    block: Block,
}

#[derive(Default)]
pub struct ChainBuilder {
    tip: Option<Hash256>,
    orphans: HashMap<Hash256, VecDeque<Orphan>>,
    orphan_count: usize,
    next_sequence: u64,
    /// Buffered since the last snapshot.
    unsaved: HashSet<Hash256>,
    /// Left the buffer since the last snapshot but still present in it.
    released: Vec<Hash256>,
}

impl ChainBuilder {
    pub fn new(tip: Option<Hash256>) -> Self {
        Self {
            tip,
            ..Self::default()
        }
    }

    /// Rebuilds the builder from a committed tip and orphan snapshot.
    pub fn restore(tip: Option<Hash256>, orphans: Vec<(u64, Block)>) -> Self {
        let mut builder = Self::new(tip);
        let mut orphans = orphans;
        orphans.sort_by_key(|(sequence, _)| *sequence);
        for (sequence, block) in orphans {
            builder.next_sequence = builder.next_sequence.max(sequence + 1);
            builder.insert(Orphan {
                hash: block.hash(),
                sequence,
                block,
            });
        }
        builder
    }

    pub fn tip(&self) -> Option<Hash256> {
        self.tip
    }

    pub fn orphan_count(&self) -> usize {
        self.orphan_count
    }

    pub fn is_buffered(&self, hash: &Hash256) -> bool {
        self.orphans
            .values()
            .any(|queue| queue.iter().any(|orphan| &orphan.hash == hash))
    }

    /// Takes one block in arrival order. Applies it if it extends the tip
    /// (or no tip exists yet), then applies any buffered descendants that now
    /// connect, oldest arrival first. Returns the number of blocks applied.
    pub fn accept<E>(
        &mut self,
        block: Block,
        mut apply: impl FnMut(&Block) -> Result<(), E>,
    ) -> Result<usize, E> {
        let hash = block.hash();
        let extends_tip = match self.tip {
            None => true,
            Some(tip) => block.header.prev_block == tip,
        };
        if !extends_tip {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.unsaved.insert(hash);
            self.insert(Orphan {
                hash,
                sequence,
                block,
            });
            return Ok(0);
        }

        apply(&block)?;
        self.tip = Some(hash);
        let mut applied = 1;

        let mut tip = hash;
        while let Some(orphan) = self.pop_child(tip) {
            apply(&orphan.block)?;
            tip = orphan.hash;
            self.tip = Some(tip);
            applied += 1;
        }
        Ok(applied)
    }

    /// Writes orphan buffer changes since the previous snapshot into `batch`.
    /// They stay pending until [`ChainBuilder::mark_snapshotted`].
    pub fn stage_orphans(&self, batch: &mut WriteBatch) {
        for hash in &self.released {
            batch.delete(Column::Orphan, *hash);
        }
        if self.unsaved.is_empty() {
            return;
        }
        for orphan in self.orphans.values().flatten() {
            if self.unsaved.contains(&orphan.hash) {
                let mut value = orphan.sequence.to_le_bytes().to_vec();
                value.extend_from_slice(&orphan.block.consensus_encode());
                batch.put(Column::Orphan, orphan.hash, value);
            }
        }
    }

    /// Forgets the pending buffer changes once their batch is stored.
    pub fn mark_snapshotted(&mut self) {
        self.released.clear();
        self.unsaved.clear();
    }

    fn insert(&mut self, orphan: Orphan) {
        self.orphans
            .entry(orphan.block.header.prev_block)
            .or_default()
            .push_back(orphan);
        self.orphan_count += 1;
    }

    fn pop_child(&mut self, parent: Hash256) -> Option<Orphan> {
        let queue = self.orphans.get_mut(&parent)?;
        let orphan = queue.pop_front()?;
        if queue.is_empty() {
            self.orphans.remove(&parent);
        }
        self.orphan_count -= 1;
        if !self.unsaved.remove(&orphan.hash) {
            self.released.push(orphan.hash);
        }
        Some(orphan)
    }
}

/// Reads the orphan snapshot as `(arrival sequence, block)` pairs.
pub fn load_orphans<S: KeyValueStore>(store: &S) -> Result<Vec<(u64, Block)>, ChainStateError> {
    let mut orphans = Vec::new();
    for (key, value) in store.scan_prefix(Column::Orphan, &[])? {
        if value.len() < 8 {
            return Err(ChainStateError::CorruptState("orphan"));
        }
        let mut sequence = [0u8; 8];
        sequence.copy_from_slice(&value[..8]);
        let block = Block::consensus_decode(&value[8..])?;
        if block.hash().as_slice() != key.as_slice() {
            return Err(ChainStateError::CorruptState("orphan"));
        }
        orphans.push((u64::from_le_bytes(sequence), block));
    }
    Ok(orphans)
}
