use anyhow::{Context, bail};
use lithos_config::JournalConfig;
use lithos_io::{CompletionPort, FileStore, OpenMode};
use lithos_journal::{CloseError, Journal, JournalError, TagSequence};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const CHUNK: usize = 64 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const USAGE: &str = "usage: basalt <config.toml> append\n       basalt <config.toml> cat [offset] [len]";

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, mode, rest) = match args.as_slice() {
        [config, mode, rest @ ..] => (config, mode.as_str(), rest),
        _ => bail!(USAGE),
    };

    let config = JournalConfig::load(config_path)
        .with_context(|| format!("loading config {config_path}"))?;
    init_tracing(&config.log_level);

    let store = Arc::new(FileStore::new());
    let port = store.create_port();
    let worker = store
        .spawn_worker(config.worker_idle())
        .context("spawning io worker")?;
    let tags = TagSequence::new();

    let result = match (mode, rest) {
        ("append", []) => append(&store, &port, &tags, &config),
        ("cat", _) => {
            let offset = rest.first().map(|s| parse_u64(s, "offset")).transpose()?;
            let len = rest.get(1).map(|s| parse_u64(s, "len")).transpose()?;
            if rest.len() > 2 {
                bail!(USAGE);
            }
            cat(&store, &port, &tags, &config, offset.unwrap_or(0), len)
        }
        _ => Err(anyhow::anyhow!(USAGE)),
    };

    worker.stop();
    result
}

fn parse_u64(s: &str, what: &str) -> anyhow::Result<u64> {
    s.parse().with_context(|| format!("invalid {what} '{s}'"))
}

fn open(
    store: &Arc<FileStore>,
    port: &CompletionPort,
    tags: &TagSequence,
    config: &JournalConfig,
    mode: OpenMode,
) -> anyhow::Result<Journal<FileStore>> {
    let ring = config.ring()?;
    let journal = Journal::open(Arc::clone(store), &config.path, mode, port.id(), ring, tags)?;
    Ok(journal)
}

/// Copies stdin to the end of the journal, waiting on completions whenever
/// the ring is full.
fn append(
    store: &Arc<FileStore>,
    port: &CompletionPort,
    tags: &TagSequence,
    config: &JournalConfig,
) -> anyhow::Result<()> {
    let mut journal = open(store, port, tags, config, config.open_mode)?;
    let start = journal.size();
    let mut buf = vec![0u8; journal.capacity().min(CHUNK)];
    let mut stdin = std::io::stdin().lock();
    let mut stalls = 0u64;

    loop {
        let n = stdin.read(&mut buf).context("reading stdin")?;
        if n == 0 {
            break;
        }
        loop {
            match journal.append(&buf[..n]) {
                Ok(()) => break,
                Err(JournalError::BufferFull { backlog, .. }) => {
                    journal.clear_error();
                    stalls += 1;
                    debug!(backlog, "ring full, waiting on completions");
                    journal.pump(port)?;
                    if !journal.has_room(n) && !journal.drain(port, DRAIN_TIMEOUT)? {
                        bail!("no completions within {DRAIN_TIMEOUT:?}");
                    }
                }
                Err(err) => return Err(err).context("append"),
            }
        }
    }

    let appended = journal.size() - start;
    close(journal, port)?;
    info!(path = %config.path, appended, stalls, "append finished");
    Ok(())
}

/// Writes `len` bytes starting at `offset` (default: to the end) to stdout.
fn cat(
    store: &Arc<FileStore>,
    port: &CompletionPort,
    tags: &TagSequence,
    config: &JournalConfig,
    offset: u64,
    len: Option<u64>,
) -> anyhow::Result<()> {
    let mut journal = open(store, port, tags, config, OpenMode::ReadOnly)?;
    let size = journal.size();
    let len = len.unwrap_or(size.saturating_sub(offset));

    let mut buf = vec![0u8; CHUNK];
    let mut stdout = std::io::stdout().lock();
    let mut at = offset;
    let end = offset.saturating_add(len);
    while at < end {
        let n = (end - at).min(CHUNK as u64) as usize;
        journal
            .read(&mut buf[..n], at)
            .with_context(|| format!("reading {n} bytes at {at} of {size}"))?;
        stdout.write_all(&buf[..n]).context("writing stdout")?;
        at += n as u64;
    }
    stdout.flush().context("flushing stdout")?;
    close(journal, port)
}

/// Drains and closes, retrying while writes are still pending.
fn close(mut journal: Journal<FileStore>, port: &CompletionPort) -> anyhow::Result<()> {
    loop {
        if !journal.drain(port, DRAIN_TIMEOUT)? {
            bail!("{} writes still in flight after {DRAIN_TIMEOUT:?}", journal.inflight_len());
        }
        if let Some(err) = journal.error() {
            bail!("journal fault: {err}");
        }
        match journal.close() {
            Ok(()) => return Ok(()),
            Err(CloseError::Pending(pending)) => journal = *pending,
            Err(err) => return Err(err).context("closing journal"),
        }
    }
}
