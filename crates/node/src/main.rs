use blkaudit_log as logging;
use blkaudit_log::{log_info, log_warn};

pub mod archive;
pub mod import;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use blkaudit_chainstate::verifier::{InterpreterOracle, ScriptOracle};
use blkaudit_chainstate::{Auditor, Cursor, DualVerifier};
use blkaudit_consensus::params::{chain_params, Network};
use blkaudit_script::interpreter::DEFAULT_SCRIPT_VERIFY_FLAGS;
use blkaudit_storage::fjall::{FjallOptions, FjallStore};
use blkaudit_storage::memory::MemoryStore;
use blkaudit_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};
use fs2::FileExt;
use tokio::sync::watch;

use crate::import::{run_import, ImportOutcome, ImportSettings};

const DEFAULT_DATA_DIR: &str = "data";
const CONF_FILE_NAME: &str = "blkaudit.conf";
const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";
const DEFAULT_COMMIT_INTERVAL: u64 = 10_000;
const DEFAULT_QUEUE: usize = 64;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 15;
const DEFAULT_DB_CACHE_MB: u64 = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Config {
    backend: Backend,
    data_dir: PathBuf,
    network: Network,
    blocks_prefix: PathBuf,
    start: Option<u32>,
    skip: Option<u32>,
    end: Option<u32>,
    flags: u32,
    interpreter_flags: u32,
    interpreter: bool,
    libconsensus: bool,
    commit_interval: u64,
    queue: usize,
    status_interval_secs: u64,
    log_level: logging::Level,
    log_format: logging::Format,
    log_timestamps: bool,
    db_cache_bytes: u64,
    db_fsync_ms: Option<u16>,
}

#[derive(Debug)]
enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl Store {
    fn disk_space(&self) -> Option<u64> {
        match self {
            Store::Memory(_) => None,
            Store::Fjall(store) => Some(store.disk_space()),
        }
    }
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.persist(),
            Store::Fjall(store) => store.persist(),
        }
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = std::process::id();
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={pid}");
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            if holder.is_empty() {
                Err(format!(
                    "data dir {} is already locked (another blkaudit instance may be running); lock file {}",
                    data_dir.display(),
                    lock_path.display()
                ))
            } else {
                Err(format!(
                    "data dir {} is already locked (another blkaudit instance may be running); lock file {} ({holder})",
                    data_dir.display(),
                    lock_path.display()
                ))
            }
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

pub async fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("blkaudit {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config).await,
    }
}

async fn run_with_config(config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    log_info!(
        "Startup: backend={:?}, network={}, data_dir={}, blocks={}",
        config.backend,
        config.network.as_str(),
        config.data_dir.display(),
        config.blocks_prefix.display()
    );

    fs::create_dir_all(&config.data_dir).map_err(|err| {
        format!(
            "failed to create data dir {}: {err}",
            config.data_dir.display()
        )
    })?;
    let _data_dir_lock = lock_data_dir(&config.data_dir)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    log_warn!("failed to install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        log_info!("Signal received; requesting shutdown.");
        let _ = shutdown_tx.send(true);
    });

    tokio::task::spawn_blocking(move || run_audit(config, shutdown_rx))
        .await
        .map_err(|err| format!("audit task failed: {err}"))?
}

fn run_audit(config: Config, shutdown: watch::Receiver<bool>) -> Result<(), String> {
    let params = chain_params(config.network);
    let store = open_store(&config)?;
    let mut auditor =
        Auditor::open(store, build_verifier(&config)).map_err(|err| err.to_string())?;

    if let Some(cursor) = resolve_start(auditor.cursor(), config.start, config.skip) {
        auditor
            .set_cursor(cursor)
            .map_err(|err| err.to_string())?;
        log_info!("Starting at {cursor} (operator override)");
    }

    let settings = ImportSettings {
        blocks_prefix: config.blocks_prefix.clone(),
        magic: params.archive_magic(),
        end_segment: config.end,
        commit_interval: config.commit_interval,
        queue: config.queue,
        status_interval: Duration::from_secs(config.status_interval_secs),
    };
    let summary = run_import(&mut auditor, &settings, &shutdown)?;
    match summary.outcome {
        ImportOutcome::Completed => log_info!(
            "Done: {} blocks read, {} applied, {} segments, resume at {}",
            summary.blocks_read,
            summary.blocks_applied,
            summary.segments_finished,
            summary.cursor
        ),
        ImportOutcome::Shutdown => log_info!(
            "Stopped on request after {} blocks; resume at {}",
            summary.blocks_read,
            summary.cursor
        ),
    }
    if let Some(bytes) = auditor.utxos().store().disk_space() {
        log_info!("Store size on disk: {} MiB", bytes / (1024 * 1024));
    }
    Ok(())
}

/// Applies `--start`/`--skip` over the persisted cursor. `--start` alone
/// starts at the first record of that segment.
fn resolve_start(persisted: Cursor, start: Option<u32>, skip: Option<u32>) -> Option<Cursor> {
    match (start, skip) {
        (None, None) => None,
        (Some(segment), skip) => Some(Cursor::new(segment, skip.unwrap_or(0))),
        (None, Some(skip)) => Some(Cursor::new(persisted.segment, skip)),
    }
}

fn build_verifier(config: &Config) -> DualVerifier {
    let mut oracles: Vec<Box<dyn ScriptOracle>> = Vec::new();
    if config.interpreter {
        oracles.push(Box::new(InterpreterOracle::new(config.interpreter_flags)));
    }
    if config.libconsensus {
        #[cfg(feature = "libconsensus")]
        oracles.push(Box::new(
            blkaudit_chainstate::verifier::LibConsensusOracle::new(config.flags),
        ));
        #[cfg(not(feature = "libconsensus"))]
        log_warn!("libconsensus oracle not compiled in; pass --no-libconsensus to silence this");
    }
    let verifier = DualVerifier::new(oracles);
    let names = verifier.oracle_names();
    if names.is_empty() {
        log_warn!("Script verification disabled; spends are applied unchecked");
    } else {
        log_info!(
            "Script oracles: {} (flags {:#x}, interpreter flags {:#x})",
            names.join(", "),
            config.flags,
            config.interpreter_flags
        );
    }
    verifier
}

fn open_store(config: &Config) -> Result<Store, String> {
    match config.backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => {
            let db_path = config.data_dir.join("db");
            let options = FjallOptions {
                cache_bytes: Some(config.db_cache_bytes),
                fsync_ms: config.db_fsync_ms,
            };
            Ok(Store::Fjall(
                FjallStore::open_with_options(&db_path, options)
                    .map_err(|err| format!("failed to open {}: {err}", db_path.display()))?,
            ))
        }
    }
}

fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut blocks_prefix: Option<PathBuf> = None;
    let mut start: Option<u32> = None;
    let mut skip: Option<u32> = None;
    let mut end: Option<u32> = None;
    let mut flags: Option<u32> = None;
    let mut interpreter_flags: Option<u32> = None;
    let mut interpreter = true;
    let mut interpreter_set = false;
    let mut libconsensus = true;
    let mut libconsensus_set = false;
    let mut commit_interval = DEFAULT_COMMIT_INTERVAL;
    let mut commit_interval_set = false;
    let mut queue = DEFAULT_QUEUE;
    let mut queue_set = false;
    let mut status_interval_secs = DEFAULT_STATUS_INTERVAL_SECS;
    let mut status_interval_set = false;
    let mut log_level = logging::Level::Info;
    let mut log_level_set = false;
    let mut log_format = logging::Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut log_timestamps_set = false;
    let mut db_cache_mb = DEFAULT_DB_CACHE_MB;
    let mut db_cache_set = false;
    let mut db_fsync_ms: Option<u16> = None;
    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            _ => {}
        }
    }
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--backend" => {
                let value = next_value(&mut args, "--backend")?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--data-dir" => {
                data_dir = Some(PathBuf::from(next_value(&mut args, "--data-dir")?));
            }
            "--conf" => {
                conf_path = Some(PathBuf::from(next_value(&mut args, "--conf")?));
            }
            "--network" => {
                let value = next_value(&mut args, "--network")?;
                network = Network::parse(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                network_set = true;
            }
            "--blocks" => {
                blocks_prefix = Some(PathBuf::from(next_value(&mut args, "--blocks")?));
            }
            "--start" => {
                start = Some(parse_number(&next_value(&mut args, "--start")?, "--start")?);
            }
            "--skip" => {
                skip = Some(parse_number(&next_value(&mut args, "--skip")?, "--skip")?);
            }
            "--end" => {
                end = Some(parse_number(&next_value(&mut args, "--end")?, "--end")?);
            }
            "--flags" => {
                flags = Some(parse_flags(&next_value(&mut args, "--flags")?, "--flags")?);
            }
            "--interpreter-flags" => {
                let value = next_value(&mut args, "--interpreter-flags")?;
                interpreter_flags = Some(parse_flags(&value, "--interpreter-flags")?);
            }
            "--no-interpreter" => {
                interpreter = false;
                interpreter_set = true;
            }
            "--no-libconsensus" => {
                libconsensus = false;
                libconsensus_set = true;
            }
            "--commit-interval" => {
                let value = next_value(&mut args, "--commit-interval")?;
                commit_interval = parse_number(&value, "--commit-interval")?;
                if commit_interval == 0 {
                    return Err(format!("--commit-interval must be positive\n{}", usage()));
                }
                commit_interval_set = true;
            }
            "--queue" => {
                queue = parse_number(&next_value(&mut args, "--queue")?, "--queue")?;
                if queue == 0 {
                    return Err(format!("--queue must be positive\n{}", usage()));
                }
                queue_set = true;
            }
            "--status-interval" => {
                let value = next_value(&mut args, "--status-interval")?;
                status_interval_secs = parse_number(&value, "--status-interval")?;
                status_interval_set = true;
            }
            "--log-level" => {
                let value = next_value(&mut args, "--log-level")?;
                log_level = logging::Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                log_level_set = true;
            }
            "--log-format" => {
                let value = next_value(&mut args, "--log-format")?;
                log_format = logging::Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--log-timestamps" => {
                log_timestamps = true;
                log_timestamps_set = true;
            }
            "--no-log-timestamps" => {
                log_timestamps = false;
                log_timestamps_set = true;
            }
            "--db-cache-mb" => {
                let value = next_value(&mut args, "--db-cache-mb")?;
                db_cache_mb = parse_number(&value, "--db-cache-mb")?;
                db_cache_set = true;
            }
            "--db-fsync-ms" => {
                let value = next_value(&mut args, "--db-fsync-ms")?;
                let ms: u16 = parse_number(&value, "--db-fsync-ms")?;
                db_fsync_ms = if ms == 0 { None } else { Some(ms) };
            }
            other => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_file = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    if let Some(conf) = load_conf(&conf_file)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last());
        let invalid = |key: &str, raw: &str| {
            format!("invalid {key} '{raw}' in {}", conf_file.display())
        };

        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(raw).ok_or_else(|| invalid("backend", raw))?;
            }
        }
        if !network_set {
            if let Some(raw) = last("network") {
                network = Network::parse(raw).ok_or_else(|| invalid("network", raw))?;
            }
        }
        if blocks_prefix.is_none() {
            blocks_prefix = last("blocks").map(PathBuf::from);
        }
        if start.is_none() {
            if let Some(raw) = last("start") {
                start = Some(raw.parse().map_err(|_| invalid("start", raw))?);
            }
        }
        if skip.is_none() {
            if let Some(raw) = last("skip") {
                skip = Some(raw.parse().map_err(|_| invalid("skip", raw))?);
            }
        }
        if end.is_none() {
            if let Some(raw) = last("end") {
                end = Some(raw.parse().map_err(|_| invalid("end", raw))?);
            }
        }
        if flags.is_none() {
            if let Some(raw) = last("flags") {
                flags = Some(parse_flags(raw, "flags").map_err(|_| invalid("flags", raw))?);
            }
        }
        if interpreter_flags.is_none() {
            if let Some(raw) = last("interpreterflags") {
                interpreter_flags = Some(
                    parse_flags(raw, "interpreterflags")
                        .map_err(|_| invalid("interpreterflags", raw))?,
                );
            }
        }
        if !interpreter_set {
            if let Some(raw) = last("nointerpreter") {
                interpreter = !parse_conf_bool(raw).ok_or_else(|| invalid("nointerpreter", raw))?;
            }
        }
        if !libconsensus_set {
            if let Some(raw) = last("nolibconsensus") {
                libconsensus =
                    !parse_conf_bool(raw).ok_or_else(|| invalid("nolibconsensus", raw))?;
            }
        }
        if !commit_interval_set {
            if let Some(raw) = last("commitinterval") {
                commit_interval = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|value| *value > 0)
                    .ok_or_else(|| invalid("commitinterval", raw))?;
            }
        }
        if !queue_set {
            if let Some(raw) = last("queue") {
                queue = raw
                    .parse::<usize>()
                    .ok()
                    .filter(|value| *value > 0)
                    .ok_or_else(|| invalid("queue", raw))?;
            }
        }
        if !status_interval_set {
            if let Some(raw) = last("statusinterval") {
                status_interval_secs = raw.parse().map_err(|_| invalid("statusinterval", raw))?;
            }
        }
        if !log_level_set {
            if let Some(raw) = last("loglevel") {
                log_level = logging::Level::parse(raw).ok_or_else(|| invalid("loglevel", raw))?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log_format =
                    logging::Format::parse(raw).ok_or_else(|| invalid("logformat", raw))?;
            }
        }
        if !log_timestamps_set {
            if let Some(raw) = last("logtimestamps") {
                log_timestamps =
                    parse_conf_bool(raw).ok_or_else(|| invalid("logtimestamps", raw))?;
            }
        }
        if !db_cache_set {
            if let Some(raw) = last("dbcachemb") {
                db_cache_mb = raw.parse().map_err(|_| invalid("dbcachemb", raw))?;
            }
        }
        if db_fsync_ms.is_none() {
            if let Some(raw) = last("dbfsyncms") {
                let ms: u16 = raw.parse().map_err(|_| invalid("dbfsyncms", raw))?;
                db_fsync_ms = (ms > 0).then_some(ms);
            }
        }

        let supported_keys = [
            "backend",
            "blocks",
            "commitinterval",
            "dbcachemb",
            "dbfsyncms",
            "end",
            "flags",
            "interpreterflags",
            "logformat",
            "loglevel",
            "logtimestamps",
            "network",
            "nointerpreter",
            "nolibconsensus",
            "queue",
            "skip",
            "start",
            "statusinterval",
        ];
        let mut unsupported: Vec<&str> = conf
            .keys()
            .map(String::as_str)
            .filter(|key| !supported_keys.contains(key))
            .collect();
        if !unsupported.is_empty() {
            unsupported.sort_unstable();
            log_warn!(
                "Warning: ignoring unsupported keys in {}: {}",
                conf_file.display(),
                unsupported.join(", ")
            );
        }
    }

    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(format!(
                "--end ({end}) is before --start ({start})\n{}",
                usage()
            ));
        }
    }

    let flags = flags.unwrap_or(DEFAULT_SCRIPT_VERIFY_FLAGS);
    let blocks_prefix = blocks_prefix.unwrap_or_else(|| data_dir.join("blocks").join("blk"));
    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        network,
        blocks_prefix,
        start,
        skip,
        end,
        flags,
        interpreter_flags: interpreter_flags.unwrap_or(flags),
        interpreter,
        libconsensus,
        commit_interval,
        queue,
        status_interval_secs,
        log_level,
        log_format,
        log_timestamps,
        db_cache_bytes: mb_to_bytes(db_cache_mb),
        db_fsync_ms,
    }))
}

fn next_value<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| format!("invalid value '{value}' for {flag}\n{}", usage()))
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_flags(value: &str, flag: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| format!("invalid flags '{value}' for {flag}\n{}", usage()))
}

fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

fn usage() -> String {
    [
        "Usage:",
        "  blkaudit [options]",
        "  blkaudit <command>",
        "",
        "Commands:",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/blkaudit.conf)",
        "  --backend  Storage backend, fjall|memory (default: fjall)",
        "  --network  Archive network, mainnet|testnet|regtest|signet (default: mainnet)",
        "  --blocks  Archive path prefix; segment N is <prefix>NNNNN.dat (default: <data-dir>/blocks/blk)",
        "  --start  Segment to start from, overriding the saved position",
        "  --skip  Records to skip in the start segment (default: 0 with --start)",
        "  --end  Last segment to read, inclusive (default: until the archive ends)",
        "  --flags  Script verification flags for libconsensus, decimal or 0x hex (default: P2SH|DERSIG|NULLDUMMY|CLTV|CSV|WITNESS)",
        "  --interpreter-flags  Script verification flags for the interpreter (default: --flags)",
        "  --no-interpreter  Do not run the in-process interpreter",
        "  --no-libconsensus  Do not run libbitcoinconsensus",
        "  --commit-interval  Applied blocks between commits (default: 10000)",
        "  --queue  Decoded blocks buffered ahead of the processor (default: 64)",
        "  --status-interval  Progress log interval in seconds (default: 15, 0 disables)",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
        "  --db-cache-mb  Fjall block cache size in MiB (default: 256)",
        "  --db-fsync-ms  Fjall async fsync interval in ms (0 disables, optional)",
    ]
    .join("\n")
}
