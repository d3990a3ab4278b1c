//! UTXO set backed by the storage trait, with an in-memory overlay of the
//! mutations made since the last commit.

use std::collections::HashMap;

use blkaudit_primitives::encoding::{DecodeError, Decoder, Encoder};
use blkaudit_primitives::outpoint::OutPoint;
use blkaudit_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const OUTPOINT_KEY_LEN: usize = 36;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputRecord {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl OutputRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(9 + self.script_pubkey.len());
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

/// `txid ‖ index (LE)`, the `utxo` column key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Size and total value of the set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UtxoStats {
    pub count: u64,
    pub total_value: i64,
}

impl UtxoStats {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.count.to_le_bytes());
        out[8..].copy_from_slice(&self.total_value.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[..8]);
        let mut total_value = [0u8; 8];
        total_value.copy_from_slice(&bytes[8..]);
        Some(Self {
            count: u64::from_le_bytes(count),
            total_value: i64::from_le_bytes(total_value),
        })
    }

    fn add(&mut self, record: &OutputRecord) {
        self.count += 1;
        self.total_value = self.total_value.saturating_add(record.value);
    }

    fn sub(&mut self, record: &OutputRecord) {
        self.count = self.count.saturating_sub(1);
        self.total_value = self.total_value.saturating_sub(record.value);
    }
}

#[derive(Clone, Debug)]
struct Pending {
    /// `None` marks a spent output.
    record: Option<OutputRecord>,
    /// Created since the last commit, so the backing store has never seen it.
    fresh: bool,
}

pub struct UtxoStore<S> {
    store: S,
    overlay: HashMap<OutPointKey, Pending>,
    stats: UtxoStats,
}

impl<S> UtxoStore<S> {
    pub fn new(store: S, stats: UtxoStats) -> Self {
        Self {
            store,
            overlay: HashMap::new(),
            stats,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> UtxoStats {
        self.stats
    }

    pub fn len(&self) -> u64 {
        self.stats.count
    }

    pub fn is_empty(&self) -> bool {
        self.stats.count == 0
    }

    /// Number of keys touched since the last commit.
    pub fn pending_len(&self) -> usize {
        self.overlay.len()
    }
}

impl<S: KeyValueStore> UtxoStore<S> {
    /// Absent means never created or already spent; the two are not
    /// distinguished.
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<OutputRecord>, StoreError> {
        let key = OutPointKey::new(outpoint);
        if let Some(pending) = self.overlay.get(&key) {
            return Ok(pending.record.clone());
        }
        match self.store.get(Column::Utxo, key.as_bytes())? {
            Some(bytes) => Ok(Some(
                OutputRecord::decode(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Inserts `record`; the caller guarantees the key is not already unspent.
    pub fn put(&mut self, outpoint: &OutPoint, record: OutputRecord) {
        let key = OutPointKey::new(outpoint);
        let fresh = self.overlay.get(&key).map_or(true, |pending| pending.fresh);
        self.stats.add(&record);
        self.overlay.insert(
            key,
            Pending {
                record: Some(record),
                fresh,
            },
        );
    }

    /// Spends `outpoint`. Returns `false` (and changes nothing) when it is not
    /// in the set.
    pub fn remove(&mut self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        Ok(self.take(outpoint)?.is_some())
    }

    /// Spends `outpoint` and returns the record it held, in one lookup.
    pub fn take(&mut self, outpoint: &OutPoint) -> Result<Option<OutputRecord>, StoreError> {
        let key = OutPointKey::new(outpoint);
        let (existing, fresh) = match self.overlay.get(&key) {
            Some(pending) => (pending.record.clone(), pending.fresh),
            None => (self.get(outpoint)?, false),
        };
        let Some(record) = existing else {
            return Ok(None);
        };
        self.stats.sub(&record);
        if fresh {
            self.overlay.remove(&key);
        } else {
            self.overlay.insert(
                key,
                Pending {
                    record: None,
                    fresh: false,
                },
            );
        }
        Ok(Some(record))
    }

    /// Copies every pending mutation into `batch`. The overlay stays intact
    /// until [`UtxoStore::clear_pending`] is called once the batch is stored.
    pub fn stage(&self, batch: &mut WriteBatch) {
        for (key, pending) in &self.overlay {
            match &pending.record {
                Some(record) => batch.put(Column::Utxo, key.0, record.encode()),
                None => batch.delete(Column::Utxo, key.0),
            }
        }
    }

    /// Drops the overlay after its batch reached the store.
    pub fn clear_pending(&mut self) {
        self.overlay.clear();
    }
}
