use crate::cache::{CacheError, CacheStore, ClearOutcome};
use crate::config::Config;
use crate::fetch::{DumpClient, FetchOutcome, Fetcher};
use crate::matcher::Keywords;
use crate::org_registry::{OrgRegistry, OrgSearchSummary};
use crate::search::{self, SearchStatus, SearchSummary};
use crate::sink::{self, Aggregator, MatchResult, ResultSender};
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Init,
  Fetch,
  SearchRegistries,
  SearchOrganizationalRegistry,
  Finalize,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub keywords: Keywords,
  pub strict: bool,
  pub no_cache: bool,
  pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
  pub results: Vec<MatchResult>,
  pub fetches: Vec<(String, FetchOutcome)>,
  pub searches: Vec<SearchSummary>,
  pub org_search: Option<OrgSearchSummary>,
  pub elapsed: Duration,
}

/// Runs the phases once, in order. Every phase joins all of its workers
/// before the next one starts.
pub struct Pipeline<'a> {
  cfg: &'a Config,
  cache: CacheStore,
  client: &'a dyn DumpClient,
  org_registry: Option<&'a dyn OrgRegistry>,
}

impl<'a> Pipeline<'a> {
  pub fn new(
    cfg: &'a Config,
    cache: CacheStore,
    client: &'a dyn DumpClient,
    org_registry: Option<&'a dyn OrgRegistry>,
  ) -> Self {
    Self {
      cfg,
      cache,
      client,
      org_registry,
    }
  }

  /// Only Init (cache directory unusable) and Finalize (output file not
  /// written) failures are returned; per-source problems are logged.
  pub fn run(&self, opts: &RunOptions, console: &mut dyn Write) -> anyhow::Result<RunReport> {
    let started = Instant::now();

    enter(Phase::Init);
    self.init(opts)?;

    enter(Phase::Fetch);
    let fetches = self.fetch_all();

    let aggregator = Aggregator::spawn(self.cfg.search.channel_capacity)?;

    enter(Phase::SearchRegistries);
    let searches = self.search_all(opts, &aggregator.sender());

    enter(Phase::SearchOrganizationalRegistry);
    let org_search = self.search_org_registry(opts, &aggregator.sender());

    enter(Phase::Finalize);
    let results = aggregator.finish()?;
    sink::render(&results, console).context("render results")?;

    let written = match &opts.output {
      Some(path) => {
        if !sink::has_json_extension(path) {
          tracing::warn!(path = %path.display(), "output file does not end in .json; writing JSON anyway");
        }
        sink::write_json(path, &results)
          .with_context(|| format!("write results to {}", path.display()))
          .map(|()| {
            tracing::info!(path = %path.display(), count = results.len(), "results written");
          })
      }
      None => Ok(()),
    };

    let elapsed = started.elapsed();
    tracing::info!(elapsed = %format_duration(elapsed), "finished");
    written?;

    Ok(RunReport {
      results,
      fetches,
      searches,
      org_search,
      elapsed,
    })
  }

  fn init(&self, opts: &RunOptions) -> anyhow::Result<()> {
    if opts.no_cache {
      match self.cache.clear() {
        Ok(ClearOutcome::Removed) => {
          tracing::info!(path = %self.cache.root().display(), "cache cleared")
        }
        Ok(ClearOutcome::AlreadyAbsent) => {
          tracing::warn!(path = %self.cache.root().display(), "cache path does not exist; nothing to clear")
        }
        Err(e) => warn_clear_failure(&e),
      }
    }

    self
      .cache
      .ensure_dir()
      .with_context(|| format!("create cache directory {}", self.cache.root().display()))?;

    if opts.strict {
      tracing::info!("using strict mode");
    }
    if opts.keywords.is_empty() {
      tracing::warn!("no usable keywords given; nothing will match");
    }
    if self.cfg.sources.is_empty() {
      tracing::warn!("no registry sources configured; only the organizational registry will be searched");
    }
    Ok(())
  }

  fn fetch_all(&self) -> Vec<(String, FetchOutcome)> {
    let fetcher = Fetcher::new(&self.cache, self.client, &self.cfg.fetch);
    let fetcher = &fetcher;

    let fetches: Vec<(String, FetchOutcome)> = thread::scope(|scope| {
      let workers: Vec<_> = self
        .cfg
        .sources
        .iter()
        .map(|src| (src, scope.spawn(move || fetcher.ensure(src))))
        .collect();

      workers
        .into_iter()
        .map(|(src, worker)| {
          let outcome = worker.join().unwrap_or_else(|_| {
            tracing::warn!(source = %src.name, "fetch worker panicked");
            FetchOutcome::Failed {
              error: "fetch worker panicked".to_string(),
              attempts: 0,
            }
          });
          (src.name.clone(), outcome)
        })
        .collect()
    });

    let failed = fetches.iter().filter(|(_, o)| o.is_failure()).count();
    if failed > 0 {
      tracing::warn!(failed, total = fetches.len(), "some sources could not be fetched");
    }
    fetches
  }

  fn search_all(&self, opts: &RunOptions, sink: &ResultSender) -> Vec<SearchSummary> {
    let cache = &self.cache;
    let keywords = &opts.keywords;
    let strict = opts.strict;

    thread::scope(|scope| {
      let workers: Vec<_> = self
        .cfg
        .sources
        .iter()
        .map(|src| {
          let tx = sink.clone();
          let worker = scope.spawn(move || search::search_source(cache, src, keywords, strict, &tx));
          (src, worker)
        })
        .collect();

      workers
        .into_iter()
        .map(|(src, worker)| {
          worker.join().unwrap_or_else(|_| {
            tracing::warn!(source = %src.name, "search worker panicked");
            SearchSummary::empty(&src.name, SearchStatus::WorkerPanicked)
          })
        })
        .collect()
    })
  }

  fn search_org_registry(&self, opts: &RunOptions, sink: &ResultSender) -> Option<OrgSearchSummary> {
    let Some(registry) = self.org_registry else {
      tracing::info!("organizational registry search disabled");
      return None;
    };

    let outcome = thread::scope(|scope| {
      scope
        .spawn(|| registry.search(&opts.keywords, opts.strict, sink))
        .join()
    });

    match outcome {
      Ok(Ok(summary)) => Some(summary),
      Ok(Err(e)) => {
        tracing::warn!(source = registry.name(), error = %format!("{e:#}"), "organizational registry search failed");
        None
      }
      Err(_) => {
        tracing::warn!(source = registry.name(), "organizational registry worker panicked");
        None
      }
    }
  }
}

fn enter(phase: Phase) {
  tracing::debug!(phase = ?phase, "entering phase");
}

fn warn_clear_failure(e: &CacheError) {
  match e {
    CacheError::PermissionDenied { path } => {
      tracing::warn!(path = %path.display(), "permission denied: unable to remove cache");
      tracing::warn!("to clear the cache, rerun with sufficient permissions or delete the directory manually");
    }
    CacheError::NotADirectory { path } => {
      tracing::warn!(path = %path.display(), "cache path is not a directory; not removing it");
    }
    CacheError::DirectoryNotEmpty { path } => {
      tracing::warn!(path = %path.display(), "cache directory could not be fully emptied");
    }
    other => {
      tracing::warn!(error = %other, "an error occurred while removing the cache");
    }
  }
}

pub fn format_duration(d: Duration) -> String {
  let total = d.as_secs_f64();
  let hours = (total / 3600.0).floor() as u64;
  let minutes = ((total % 3600.0) / 60.0).floor() as u64;
  let seconds = total % 60.0;

  if hours > 0 {
    format!("{hours}h {minutes}m {seconds:.2}s")
  } else if minutes > 0 {
    format!("{minutes}m {seconds:.2}s")
  } else {
    format!("{seconds:.2}s")
  }
}
