//! Resume cursor and the metadata committed alongside UTXO mutations.

use blkaudit_consensus::Hash256;
use blkaudit_storage::{Column, KeyValueStore, WriteBatch};

use crate::auditor::ChainStateError;
use crate::utxo::UtxoStats;

pub const META_RESUME_SEGMENT_KEY: &[u8] = b"resume_segment";
pub const META_RESUME_SKIP_KEY: &[u8] = b"resume_skip";
pub const META_CHAIN_TIP_KEY: &[u8] = b"chain_tip";
pub const META_UTXO_STATS_KEY: &[u8] = b"utxo_stats_v1";
pub const META_SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub const SCHEMA_VERSION: u32 = 1;

/// Position in the archive: segment index and records already consumed in it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Cursor {
    pub segment: u32,
    pub skip: u32,
}

impl Cursor {
    pub fn new(segment: u32, skip: u32) -> Self {
        Self { segment, skip }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "segment {} record {}", self.segment, self.skip)
    }
}

/// Everything the `meta` column records about a commit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checkpoint {
    pub cursor: Cursor,
    pub tip: Option<Hash256>,
    pub stats: UtxoStats,
}

/// Reads the committed checkpoint; `None` on a store that was never committed.
pub fn load_checkpoint<S: KeyValueStore>(store: &S) -> Result<Option<Checkpoint>, ChainStateError> {
    let Some(segment) = read_u32(store, META_RESUME_SEGMENT_KEY)? else {
        return Ok(None);
    };
    let skip = read_u32(store, META_RESUME_SKIP_KEY)?.unwrap_or(0);
    let tip = match store.get(Column::Meta, META_CHAIN_TIP_KEY)? {
        Some(bytes) => Some(
            <Hash256>::try_from(bytes.as_slice())
                .map_err(|_| ChainStateError::CorruptState("chain_tip"))?,
        ),
        None => None,
    };
    let stats = match store.get(Column::Meta, META_UTXO_STATS_KEY)? {
        Some(bytes) => {
            UtxoStats::decode(&bytes).ok_or(ChainStateError::CorruptState("utxo_stats_v1"))?
        }
        None => UtxoStats::default(),
    };
    Ok(Some(Checkpoint {
        cursor: Cursor::new(segment, skip),
        tip,
        stats,
    }))
}

pub fn stage_checkpoint(batch: &mut WriteBatch, checkpoint: &Checkpoint) {
    batch.put(
        Column::Meta,
        META_RESUME_SEGMENT_KEY,
        checkpoint.cursor.segment.to_le_bytes(),
    );
    batch.put(
        Column::Meta,
        META_RESUME_SKIP_KEY,
        checkpoint.cursor.skip.to_le_bytes(),
    );
    match checkpoint.tip {
        Some(tip) => batch.put(Column::Meta, META_CHAIN_TIP_KEY, tip),
        None => batch.delete(Column::Meta, META_CHAIN_TIP_KEY),
    }
    batch.put(Column::Meta, META_UTXO_STATS_KEY, checkpoint.stats.encode());
}

/// Stamps a fresh store with [`SCHEMA_VERSION`] and rejects stores written
/// with a different layout.
pub fn ensure_schema<S: KeyValueStore>(store: &S) -> Result<(), ChainStateError> {
    match read_u32(store, META_SCHEMA_VERSION_KEY)? {
        Some(SCHEMA_VERSION) => Ok(()),
        Some(found) => Err(ChainStateError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        }),
        None => {
            let mut batch = WriteBatch::new();
            batch.put(
                Column::Meta,
                META_SCHEMA_VERSION_KEY,
                SCHEMA_VERSION.to_le_bytes(),
            );
            store.write_batch(&batch)?;
            Ok(())
        }
    }
}

fn read_u32<S: KeyValueStore>(store: &S, key: &'static [u8]) -> Result<Option<u32>, ChainStateError> {
    let Some(bytes) = store.get(Column::Meta, key)? else {
        return Ok(None);
    };
    let bytes: [u8; 4] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ChainStateError::CorruptState(meta_key_name(key)))?;
    Ok(Some(u32::from_le_bytes(bytes)))
}

fn meta_key_name(key: &'static [u8]) -> &'static str {
    std::str::from_utf8(key).unwrap_or("meta")
}
