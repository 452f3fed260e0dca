use crate::cache::{CacheError, CacheStore};
use crate::config::FetchConfig;
use crate::sources::SourceDescriptor;
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("timed out fetching {url}")]
  Timeout { url: String },

  #[error("cannot connect to {url}")]
  Connect { url: String },

  #[error("unexpected HTTP status {status} for {url}")]
  Status { url: String, status: u16 },

  #[error("transfer from {url} failed: {reason}")]
  Transport { url: String, reason: String },

  #[error("invalid URL {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("empty response body from {url}")]
  Empty { url: String },

  #[error(transparent)]
  Cache(#[from] CacheError),
}

impl FetchError {
  /// Worth another attempt: timeouts, refused/reset connections, server-side
  /// errors and rate limiting.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Timeout { .. } | Self::Connect { .. } | Self::Transport { .. } => true,
      Self::Status { status, .. } => *status >= 500 || *status == 429,
      Self::InvalidUrl { .. } | Self::Empty { .. } | Self::Cache(_) => false,
    }
  }
}

pub trait DumpClient: Send + Sync {
  /// Streams the body at `url` into `out`, returning the byte count.
  fn download(&self, url: &str, out: &mut dyn Write) -> Result<u64, FetchError>;
}

pub struct HttpDumpClient {
  client: Client,
}

impl HttpDumpClient {
  pub fn new(cfg: &FetchConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
      .build()
      .context("build HTTP client")?;
    Ok(Self { client })
  }
}

impl DumpClient for HttpDumpClient {
  fn download(&self, url: &str, out: &mut dyn Write) -> Result<u64, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
      url: url.to_string(),
      reason: e.to_string(),
    })?;
    let label = safe_url_label(&parsed);

    let mut response = self
      .client
      .get(parsed)
      .header(USER_AGENT, user_agent())
      .send()
      .map_err(|e| classify_reqwest(&label, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: label,
        status: status.as_u16(),
      });
    }

    let n = io::copy(&mut response, &mut *out).map_err(|e| classify_io(&label, e))?;
    out.flush().map_err(|e| classify_io(&label, e))?;
    Ok(n)
  }
}

pub fn user_agent() -> String {
  format!("cidr-recon/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  CacheHit,
  Downloaded { bytes: u64, attempts: u32 },
  Failed { error: String, attempts: u32 },
}

impl FetchOutcome {
  pub fn is_failure(&self) -> bool {
    matches!(self, Self::Failed { .. })
  }
}

pub struct Fetcher<'a> {
  cache: &'a CacheStore,
  client: &'a dyn DumpClient,
  retries: u32,
  backoff: Duration,
}

impl<'a> Fetcher<'a> {
  pub fn new(cache: &'a CacheStore, client: &'a dyn DumpClient, cfg: &FetchConfig) -> Self {
    Self {
      cache,
      client,
      retries: cfg.retries,
      backoff: Duration::from_millis(cfg.retry_backoff_ms),
    }
  }

  /// Makes sure the source has a non-empty cache entry. Failures are
  /// reported in the outcome and never escape to the caller.
  pub fn ensure(&self, source: &SourceDescriptor) -> FetchOutcome {
    if self.cache.exists(&source.cache_file) {
      tracing::info!(source = %source.name, "using cached dump");
      return FetchOutcome::CacheHit;
    }

    let max_attempts = self.retries.saturating_add(1);
    let mut attempt = 0u32;
    loop {
      attempt += 1;
      tracing::info!(source = %source.name, url = %source.url, attempt, "downloading dump");

      match self.download_once(source) {
        Ok(bytes) => {
          tracing::info!(source = %source.name, bytes, attempts = attempt, "dump cached");
          return FetchOutcome::Downloaded {
            bytes,
            attempts: attempt,
          };
        }
        Err(e) if e.is_transient() && attempt < max_attempts => {
          tracing::warn!(source = %source.name, attempt, error = %e, "download failed; retrying");
          std::thread::sleep(self.backoff.saturating_mul(attempt));
        }
        Err(e) => {
          tracing::warn!(
            source = %source.name,
            attempts = attempt,
            error = %e,
            "download failed; source will yield no records"
          );
          return FetchOutcome::Failed {
            error: e.to_string(),
            attempts: attempt,
          };
        }
      }
    }
  }

  fn download_once(&self, source: &SourceDescriptor) -> Result<u64, FetchError> {
    self.cache.write_with(&source.cache_file, |file| {
      let bytes = self.client.download(&source.url, file)?;
      if bytes == 0 {
        return Err(FetchError::Empty {
          url: source.url.clone(),
        });
      }
      Ok(bytes)
    })
  }
}

fn classify_reqwest(label: &str, e: reqwest::Error) -> FetchError {
  let url = label.to_string();
  if e.is_timeout() {
    FetchError::Timeout { url }
  } else if e.is_connect() {
    FetchError::Connect { url }
  } else {
    FetchError::Transport {
      url,
      reason: e.to_string(),
    }
  }
}

fn classify_io(label: &str, e: io::Error) -> FetchError {
  let inner_timeout = e
    .get_ref()
    .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
    .is_some_and(|re| re.is_timeout());
  if e.kind() == io::ErrorKind::TimedOut || inner_timeout {
    return FetchError::Timeout {
      url: label.to_string(),
    };
  }
  FetchError::Transport {
    url: label.to_string(),
    reason: e.to_string(),
  }
}

pub(crate) fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::sources::RecordFormat;
  use std::collections::{HashMap, VecDeque};
  use std::sync::Mutex;

  pub(crate) enum Scripted {
    Body(Vec<u8>),
    PartialThen(Vec<u8>, FetchError),
    Fail(FetchError),
  }

  /// Replays scripted responses per URL and counts requests.
  #[derive(Default)]
  pub(crate) struct ScriptedClient {
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, u32>>,
  }

  impl ScriptedClient {
    pub(crate) fn push(&self, url: &str, step: Scripted) {
      self
        .script
        .lock()
        .unwrap()
        .entry(url.to_string())
        .or_default()
        .push_back(step);
    }

    pub(crate) fn calls(&self, url: &str) -> u32 {
      self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
  }

  impl DumpClient for ScriptedClient {
    fn download(&self, url: &str, out: &mut dyn Write) -> Result<u64, FetchError> {
      *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
      let step = self
        .script
        .lock()
        .unwrap()
        .get_mut(url)
        .and_then(|q| q.pop_front());
      match step {
        Some(Scripted::Body(body)) => {
          out.write_all(&body).unwrap();
          Ok(body.len() as u64)
        }
        Some(Scripted::PartialThen(body, err)) => {
          out.write_all(&body).unwrap();
          Err(err)
        }
        Some(Scripted::Fail(err)) => Err(err),
        None => Err(FetchError::Connect {
          url: url.to_string(),
        }),
      }
    }
  }

  pub(crate) fn timeout(url: &str) -> FetchError {
    FetchError::Timeout {
      url: url.to_string(),
    }
  }

  fn quick_cfg(retries: u32) -> FetchConfig {
    FetchConfig {
      retries,
      retry_backoff_ms: 0,
      ..FetchConfig::default()
    }
  }

  fn source() -> SourceDescriptor {
    SourceDescriptor::new("AFRINIC", "https://dumps.example/afrinic.db.gz", "afrinic.db.gz", RecordFormat::Inetnum)
  }

  #[test]
  fn cache_hit_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path());
    let src = source();
    cache.write(&src.cache_file, b"cached").unwrap();

    let client = ScriptedClient::default();
    let outcome = Fetcher::new(&cache, &client, &quick_cfg(2)).ensure(&src);
    assert_eq!(outcome, FetchOutcome::CacheHit);
    assert_eq!(client.calls(&src.url), 0);
  }

  #[test]
  fn transient_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path());
    let src = source();

    let client = ScriptedClient::default();
    client.push(&src.url, Scripted::Fail(timeout(&src.url)));
    client.push(
      &src.url,
      Scripted::PartialThen(
        b"half".to_vec(),
        FetchError::Transport {
          url: src.url.clone(),
          reason: "connection reset".to_string(),
        },
      ),
    );
    client.push(&src.url, Scripted::Body(b"inetnum: full dump".to_vec()));

    let outcome = Fetcher::new(&cache, &client, &quick_cfg(3)).ensure(&src);
    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 18, attempts: 3 });
    assert_eq!(std::fs::read(cache.path_of(&src.cache_file)).unwrap(), b"inetnum: full dump");
  }

  #[test]
  fn client_errors_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path());
    let src = source();

    let client = ScriptedClient::default();
    client.push(
      &src.url,
      Scripted::Fail(FetchError::Status {
        url: src.url.clone(),
        status: 404,
      }),
    );

    let outcome = Fetcher::new(&cache, &client, &quick_cfg(3)).ensure(&src);
    assert!(matches!(outcome, FetchOutcome::Failed { attempts: 1, .. }));
    assert_eq!(client.calls(&src.url), 1);
    assert!(!cache.exists(&src.cache_file));
  }

  #[test]
  fn exhausted_retries_leave_no_partial_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path());
    let src = source();

    let client = ScriptedClient::default();
    for _ in 0..3 {
      client.push(
        &src.url,
        Scripted::PartialThen(b"partial".to_vec(), timeout(&src.url)),
      );
    }

    let outcome = Fetcher::new(&cache, &client, &quick_cfg(2)).ensure(&src);
    assert!(matches!(outcome, FetchOutcome::Failed { attempts: 3, .. }));
    assert!(outcome.is_failure());
    assert!(!cache.path_of(&src.cache_file).exists());
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0);
  }

  #[test]
  fn empty_body_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path());
    let src = source();

    let client = ScriptedClient::default();
    client.push(&src.url, Scripted::Body(Vec::new()));

    let outcome = Fetcher::new(&cache, &client, &quick_cfg(0)).ensure(&src);
    assert!(outcome.is_failure());
    assert!(!cache.exists(&src.cache_file));
  }

  #[test]
  fn transient_classification() {
    let url = "x".to_string();
    assert!(timeout(&url).is_transient());
    assert!(FetchError::Status { url: url.clone(), status: 503 }.is_transient());
    assert!(FetchError::Status { url: url.clone(), status: 429 }.is_transient());
    assert!(!FetchError::Status { url: url.clone(), status: 403 }.is_transient());
    assert!(!FetchError::InvalidUrl { url: url.clone(), reason: "x".to_string() }.is_transient());
    assert!(!FetchError::Empty { url }.is_transient());
  }

  #[test]
  fn unparsable_url_fails_without_retrying() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path());
    let src = SourceDescriptor::new("BROKEN", "not a url", "broken.db", RecordFormat::Inetnum);
    let cfg = quick_cfg(3);
    let client = HttpDumpClient::new(&cfg).unwrap();

    let err = client.download(&src.url, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl { .. }));

    let outcome = Fetcher::new(&cache, &client, &cfg).ensure(&src);
    assert!(matches!(outcome, FetchOutcome::Failed { attempts: 1, .. }));
    assert!(!cache.exists(&src.cache_file));
  }
}
