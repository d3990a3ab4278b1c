//! Archive import loop: a reader thread decodes records into a bounded queue
//! and the calling thread applies them through the [`Auditor`].

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use blkaudit_chainstate::{Auditor, Cursor};
use blkaudit_consensus::hash256_to_hex;
use blkaudit_consensus::money::{Amount, COIN};
use blkaudit_primitives::block::Block;
use blkaudit_storage::KeyValueStore;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tokio::sync::watch;

use crate::archive::{segment_path, ArchiveReader};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct ImportSettings {
    pub blocks_prefix: PathBuf,
    pub magic: u32,
    /// Last segment to read, inclusive.
    pub end_segment: Option<u32>,
    pub commit_interval: u64,
    pub queue: usize,
    pub status_interval: Duration,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImportOutcome {
    /// Every available segment up to the end bound was consumed.
    Completed,
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
pub struct ImportSummary {
    pub outcome: ImportOutcome,
    pub cursor: Cursor,
    pub blocks_read: u64,
    pub blocks_applied: u64,
    pub segments_finished: u32,
}

enum ReaderEvent {
    /// `consumed` counts records of `segment` up to and including this one.
    Block {
        segment: u32,
        consumed: u32,
        block: Box<Block>,
    },
    SegmentEnd {
        segment: u32,
        records: u32,
    },
    /// The next segment is absent or past the end bound.
    Exhausted {
        segment: u32,
    },
    Failed(String),
}

/// Reads from `auditor.cursor()` until the archive is exhausted, a fatal
/// error occurs or `shutdown` flips. The auditor is committed before
/// returning, unless a block failed part way through being applied. A failed
/// cadence commit keeps its mutations, so the final commit retries them.
pub fn run_import<S: KeyValueStore>(
    auditor: &mut Auditor<S>,
    settings: &ImportSettings,
    shutdown: &watch::Receiver<bool>,
) -> Result<ImportSummary, String> {
    let start = auditor.cursor();
    blkaudit_log::log_info!(
        "Import: reading {} from {} (end {})",
        segment_path(&settings.blocks_prefix, start.segment).display(),
        start,
        settings
            .end_segment
            .map(|end| end.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );

    let (tx, rx) = bounded::<ReaderEvent>(settings.queue.max(1));
    let reader = {
        let prefix = settings.blocks_prefix.clone();
        let magic = settings.magic;
        let end = settings.end_segment;
        thread::Builder::new()
            .name("archive-reader".to_string())
            .spawn(move || read_archive(&prefix, magic, start, end, &tx))
            .map_err(|err| format!("failed to spawn archive reader: {err}"))?
    };

    let mut state = ImportState::new(start);
    let result = state.drive(auditor, settings, shutdown, &rx);

    // Unblocks a reader waiting on a full queue.
    drop(rx);
    if reader.join().is_err() {
        blkaudit_log::log_error!("archive reader thread panicked");
    }

    if state.partial_block {
        // The failed block may be partly applied to the overlay.
        let committed = auditor.committed().map(|cp| cp.cursor).unwrap_or_default();
        blkaudit_log::log_error!("Skipping final commit; replay resumes at {committed}");
        return Err(result
            .err()
            .unwrap_or_else(|| "block application failed".to_string()));
    }
    let final_commit = auditor
        .commit()
        .map_err(|err| format!("final commit failed: {err}"));
    match (result, final_commit) {
        (Ok(outcome), Ok(checkpoint)) => {
            let summary = ImportSummary {
                outcome,
                cursor: checkpoint.cursor,
                blocks_read: state.blocks_read,
                blocks_applied: state.blocks_applied,
                segments_finished: state.segments_finished,
            };
            state.log_progress(auditor, "Import finished");
            Ok(summary)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(checkpoint)) => {
            blkaudit_log::log_info!("Committed progress up to {} before exit", checkpoint.cursor);
            Err(err)
        }
        (Err(err), Err(commit_err)) => {
            blkaudit_log::log_error!("{commit_err}");
            Err(err)
        }
    }
}

struct ImportState {
    started: Instant,
    last_status: Instant,
    blocks_read: u64,
    blocks_applied: u64,
    blocks_at_last_status: u64,
    segments_finished: u32,
    cursor: Cursor,
    partial_block: bool,
}

impl ImportState {
    fn new(cursor: Cursor) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_status: now,
            blocks_read: 0,
            blocks_applied: 0,
            blocks_at_last_status: 0,
            segments_finished: 0,
            cursor,
            partial_block: false,
        }
    }

    fn drive<S: KeyValueStore>(
        &mut self,
        auditor: &mut Auditor<S>,
        settings: &ImportSettings,
        shutdown: &watch::Receiver<bool>,
        rx: &Receiver<ReaderEvent>,
    ) -> Result<ImportOutcome, String> {
        loop {
            if *shutdown.borrow() {
                blkaudit_log::log_info!("Shutdown requested at {}", self.cursor);
                return Ok(ImportOutcome::Shutdown);
            }
            if !settings.status_interval.is_zero()
                && self.last_status.elapsed() >= settings.status_interval
            {
                self.log_progress(auditor, "Progress");
            }

            let event = match rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err("archive reader stopped unexpectedly".to_string());
                }
            };

            match event {
                ReaderEvent::Block {
                    segment,
                    consumed,
                    block,
                } => {
                    let applied = match auditor.process_block(*block) {
                        Ok(applied) => applied,
                        Err(err) => {
                            self.partial_block = true;
                            return Err(format!("failed to apply block after {}: {err}", self.cursor));
                        }
                    };
                    self.blocks_read += 1;
                    self.blocks_applied += applied as u64;
                    auditor.advance_cursor(segment, consumed);
                    self.cursor = auditor.cursor();
                    if auditor.uncommitted_blocks() >= settings.commit_interval.max(1) {
                        self.commit(auditor)?;
                    }
                }
                ReaderEvent::SegmentEnd { segment, records } => {
                    auditor.advance_cursor(segment.saturating_add(1), 0);
                    self.cursor = auditor.cursor();
                    self.segments_finished += 1;
                    self.commit(auditor)?;
                    blkaudit_log::log_info!(
                        "Finished {} ({records} records, {} orphans buffered)",
                        segment_path(&settings.blocks_prefix, segment).display(),
                        auditor.orphan_count()
                    );
                }
                ReaderEvent::Exhausted { segment } => {
                    blkaudit_log::log_info!(
                        "No more segments at {}",
                        segment_path(&settings.blocks_prefix, segment).display()
                    );
                    return Ok(ImportOutcome::Completed);
                }
                ReaderEvent::Failed(err) => return Err(err),
            }
        }
    }

    fn commit<S: KeyValueStore>(&mut self, auditor: &mut Auditor<S>) -> Result<(), String> {
        auditor
            .commit()
            .map(|_| ())
            .map_err(|err| format!("commit at {} failed: {err}", self.cursor))
    }

    fn log_progress<S: KeyValueStore>(&mut self, auditor: &Auditor<S>, label: &str) {
        let elapsed = self.last_status.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (self.blocks_read - self.blocks_at_last_status) as f64 / elapsed
        } else {
            0.0
        };
        let stats = auditor.stats();
        let context = auditor.context();
        let verdicts = auditor
            .verifier()
            .counters()
            .map(|(name, counters)| {
                format!(
                    " {name} {}/{}/{}",
                    counters.accepted, counters.rejected, counters.errored
                )
            })
            .collect::<String>();
        blkaudit_log::log_info!(
            "{label}: {} blocks read {} applied {} ({rate:.1} b/s) tip {} utxos {} value {} orphans {} missing {}{verdicts} uptime {}s",
            self.cursor,
            self.blocks_read,
            self.blocks_applied,
            auditor
                .tip()
                .as_ref()
                .map(hash256_to_hex)
                .unwrap_or_else(|| "none".to_string()),
            stats.count,
            format_amount(stats.total_value),
            auditor.orphan_count(),
            context.missing_outputs,
            self.started.elapsed().as_secs()
        );
        self.last_status = Instant::now();
        self.blocks_at_last_status = self.blocks_read;
    }
}

fn format_amount(amount: Amount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let coin = COIN.unsigned_abs();
    format!("{sign}{}.{:08}", abs / coin, abs % coin)
}

fn read_archive(
    prefix: &Path,
    magic: u32,
    start: Cursor,
    end: Option<u32>,
    tx: &Sender<ReaderEvent>,
) {
    if let Err(err) = read_segments(prefix, magic, start, end, tx) {
        let _ = tx.send(ReaderEvent::Failed(err));
    }
}

/// Returns `Ok` also when the receiver hung up.
fn read_segments(
    prefix: &Path,
    magic: u32,
    start: Cursor,
    end: Option<u32>,
    tx: &Sender<ReaderEvent>,
) -> Result<(), String> {
    let mut segment = start.segment;
    let mut skip = start.skip;
    loop {
        if end.is_some_and(|end| segment > end) {
            let _ = tx.send(ReaderEvent::Exhausted { segment });
            return Ok(());
        }
        let path = segment_path(prefix, segment);
        let Some(mut reader) =
            ArchiveReader::open(&path, magic).map_err(|err| format!("{}: {err}", path.display()))?
        else {
            let _ = tx.send(ReaderEvent::Exhausted { segment });
            return Ok(());
        };

        if skip > 0 {
            let skipped = reader
                .skip(skip)
                .map_err(|err| format!("{}: {err}", path.display()))?;
            if skipped < skip {
                blkaudit_log::log_warn!(
                    "{} holds {skipped} records, fewer than the {skip} to skip",
                    path.display()
                );
            }
        }

        loop {
            let record = reader
                .next_record()
                .map_err(|err| format!("{}: {err}", path.display()))?;
            let Some(record) = record else {
                break;
            };
            let block = Block::consensus_decode(&record).map_err(|err| {
                format!(
                    "{}: record {} does not decode: {err}",
                    path.display(),
                    reader.records() - 1
                )
            })?;
            let event = ReaderEvent::Block {
                segment,
                consumed: reader.records(),
                block: Box::new(block),
            };
            if tx.send(event).is_err() {
                return Ok(());
            }
        }

        let records = reader.records();
        if tx.send(ReaderEvent::SegmentEnd { segment, records }).is_err() {
            return Ok(());
        }
        segment = segment.saturating_add(1);
        skip = 0;
    }
}
