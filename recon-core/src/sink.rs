use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchResult {
  pub source: String,
  pub block: String,
  pub organization: String,
}

impl MatchResult {
  pub fn new(source: &str, block: impl ToString, organization: &str) -> Self {
    Self {
      source: source.to_string(),
      block: block.to_string(),
      organization: organization.to_string(),
    }
  }
}

/// Handle used by workers to hand results to the collector.
#[derive(Debug, Clone)]
pub struct ResultSender {
  tx: SyncSender<MatchResult>,
}

impl ResultSender {
  /// Blocks while the channel is full. Returns false once the collector
  /// has gone away.
  pub fn submit(&self, result: MatchResult) -> bool {
    self.tx.send(result).is_ok()
  }
}

/// Single-consumer collector: every worker sends through a bounded channel
/// and one thread owns the accumulated results.
pub struct Aggregator {
  tx: SyncSender<MatchResult>,
  collector: JoinHandle<Vec<MatchResult>>,
}

impl Aggregator {
  pub fn spawn(capacity: usize) -> anyhow::Result<Self> {
    let (tx, rx) = mpsc::sync_channel::<MatchResult>(capacity.max(1));
    let collector = std::thread::Builder::new()
      .name("result-collector".to_string())
      .spawn(move || collect(rx))
      .context("spawn result collector")?;

    Ok(Self { tx, collector })
  }

  pub fn sender(&self) -> ResultSender {
    ResultSender {
      tx: self.tx.clone(),
    }
  }

  /// Closes the channel and returns every result in arrival order. All
  /// outstanding `ResultSender`s must have been dropped, otherwise this
  /// waits for them.
  pub fn finish(self) -> anyhow::Result<Vec<MatchResult>> {
    let Self { tx, collector } = self;
    drop(tx);
    collector
      .join()
      .map_err(|_| anyhow::anyhow!("result collector panicked"))
  }
}

fn collect(rx: Receiver<MatchResult>) -> Vec<MatchResult> {
  let mut out = Vec::new();
  for result in rx {
    out.push(result);
  }
  out
}

pub fn render(results: &[MatchResult], out: &mut dyn Write) -> io::Result<()> {
  if results.is_empty() {
    writeln!(out, "No matches found.")?;
    return Ok(());
  }

  // Widths in chars; `{:<w$}` pads by char count.
  let source_w = results.iter().map(|r| r.source.chars().count()).max().unwrap_or(0).max(6);
  let block_w = results.iter().map(|r| r.block.chars().count()).max().unwrap_or(0).max(5);

  writeln!(out, "{:<source_w$}  {:<block_w$}  ORGANIZATION", "SOURCE", "BLOCK")?;
  for r in results {
    writeln!(out, "{:<source_w$}  {:<block_w$}  {}", r.source, r.block, r.organization)?;
  }

  let sources: BTreeSet<&str> = results.iter().map(|r| r.source.as_str()).collect();
  writeln!(
    out,
    "{} match(es) across {} source(s)",
    results.len(),
    sources.len()
  )?;
  Ok(())
}

pub fn has_json_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Serializes the whole collection in one go and renames it into place.
pub fn write_json(path: &Path, results: &[MatchResult]) -> anyhow::Result<()> {
  let bytes = serde_json::to_vec_pretty(results).context("serialize results")?;

  let parent = path.parent().unwrap_or_else(|| Path::new(""));
  fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

  let tmp = parent.join(format!(
    ".{}.{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy(),
    uuid::Uuid::new_v4().simple()
  ));
  fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
  if let Err(e) = fs::rename(&tmp, path) {
    let _ = fs::remove_file(&tmp);
    return Err(e).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()));
  }
  Ok(())
}

pub fn read_json(path: &Path) -> anyhow::Result<Vec<MatchResult>> {
  let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
  serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))
}
