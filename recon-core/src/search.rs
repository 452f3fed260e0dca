use crate::cache::CacheStore;
use crate::matcher::{self, Keywords};
use crate::parser;
use crate::sink::{MatchResult, ResultSender};
use crate::sources::SourceDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
  Completed,
  MissingCache,
  OpenFailed(String),
  ReadFailed(String),
  SinkClosed,
  WorkerPanicked,
}

#[derive(Debug, Clone)]
pub struct SearchSummary {
  pub source: String,
  pub records: usize,
  pub skipped: usize,
  pub matches: usize,
  pub status: SearchStatus,
}

impl SearchSummary {
  pub(crate) fn empty(source: &str, status: SearchStatus) -> Self {
    Self {
      source: source.to_string(),
      records: 0,
      skipped: 0,
      matches: 0,
      status,
    }
  }
}

/// Runs the matcher over every record of one cached dump and submits a
/// result per prefix of each matching block, in parse order.
pub fn search_source(
  cache: &CacheStore,
  source: &SourceDescriptor,
  keywords: &Keywords,
  strict: bool,
  sink: &ResultSender,
) -> SearchSummary {
  if !cache.exists(&source.cache_file) {
    tracing::warn!(source = %source.name, "no cached dump; source yields no records");
    return SearchSummary::empty(&source.name, SearchStatus::MissingCache);
  }

  let path = cache.path_of(&source.cache_file);
  let mut stream = match parser::records(&path, source.format, &source.name) {
    Ok(s) => s,
    Err(e) => {
      tracing::warn!(source = %source.name, path = %path.display(), error = %e, "cannot open cached dump");
      return SearchSummary::empty(&source.name, SearchStatus::OpenFailed(e.to_string()));
    }
  };

  let mut matches = 0usize;
  let mut status = SearchStatus::Completed;
  'records: for record in stream.by_ref() {
    if !matcher::matches(&record.organization_name, keywords, strict) {
      continue;
    }
    for cidr in record.block.cidrs() {
      if !sink.submit(MatchResult::new(&source.name, cidr, &record.organization_name)) {
        tracing::warn!(source = %source.name, "result collector closed; abandoning search");
        status = SearchStatus::SinkClosed;
        break 'records;
      }
      matches += 1;
    }
  }

  if status == SearchStatus::Completed {
    if let Some(e) = stream.read_error() {
      status = SearchStatus::ReadFailed(e.to_string());
    }
  }

  let summary = SearchSummary {
    source: source.name.clone(),
    records: stream.parsed(),
    skipped: stream.skipped(),
    matches,
    status,
  };
  tracing::info!(
    source = %summary.source,
    records = summary.records,
    skipped = summary.skipped,
    matches = summary.matches,
    "search finished"
  );
  summary
}
