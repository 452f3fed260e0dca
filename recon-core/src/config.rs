use crate::sources::{self, SourceDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
  pub cache_dir: Option<PathBuf>,
  pub logging: LoggingConfig,
  pub fetch: FetchConfig,
  pub org_registry: OrgRegistryConfig,
  pub search: SearchConfig,
  pub sources: Vec<SourceDescriptor>,
  /// Problems found while loading; see [`Config::report_issues`].
  pub issues: Vec<ConfigIssue>,
}

/// Something wrong in the config file that was downgraded to a default.
/// Loading runs before logging is installed, so these are held until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
  pub message: &'static str,
  pub reason: String,
}

impl ConfigIssue {
  fn new(message: &'static str, reason: impl Into<String>) -> Self {
    Self {
      message,
      reason: reason.into(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_dir: None,
      logging: LoggingConfig::default(),
      fetch: FetchConfig::default(),
      org_registry: OrgRegistryConfig::default(),
      search: SearchConfig::default(),
      sources: sources::default_sources(),
      issues: Vec::new(),
    }
  }
}

impl Config {
  pub fn cache_root(&self, base: &Path) -> PathBuf {
    self
      .cache_dir
      .clone()
      .unwrap_or_else(|| crate::paths::cache_dir(base))
  }

  pub fn report_issues(&self) {
    for issue in &self.issues {
      tracing::warn!(reason = %issue.reason, "{}", issue.message);
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
  #[serde(default = "default_fetch_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_connect_timeout_seconds")]
  pub connect_timeout_seconds: u64,

  #[serde(default = "default_retries")]
  pub retries: u32,

  #[serde(default = "default_retry_backoff_ms")]
  pub retry_backoff_ms: u64,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      timeout_seconds: default_fetch_timeout_seconds(),
      connect_timeout_seconds: default_connect_timeout_seconds(),
      retries: default_retries(),
      retry_backoff_ms: default_retry_backoff_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRegistryConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,

  #[serde(default = "default_org_registry_base_url")]
  pub base_url: String,

  #[serde(default = "default_org_registry_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for OrgRegistryConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      base_url: default_org_registry_base_url(),
      timeout_seconds: default_org_registry_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
  #[serde(default = "default_channel_capacity")]
  pub channel_capacity: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      channel_capacity: default_channel_capacity(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

fn default_fetch_timeout_seconds() -> u64 {
  600
}

fn default_connect_timeout_seconds() -> u64 {
  30
}

fn default_retries() -> u32 {
  3
}

fn default_retry_backoff_ms() -> u64 {
  2_000
}

fn default_org_registry_base_url() -> String {
  "https://whois.arin.net/rest".to_string()
}

fn default_org_registry_timeout_seconds() -> u64 {
  30
}

fn default_channel_capacity() -> usize {
  1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cache_dir: Option<PathBuf>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub fetch: Option<FetchConfig>,

  #[serde(default)]
  pub org_registry: Option<OrgRegistryConfig>,

  #[serde(default)]
  pub search: Option<SearchConfig>,

  #[serde(default)]
  pub sources: Option<Vec<SourceDescriptor>>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(dir) = self.cache_dir {
      cfg.cache_dir = Some(dir);
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(f) = self.fetch {
      cfg.fetch = f;
    }
    if let Some(o) = self.org_registry {
      cfg.org_registry = o;
    }
    if let Some(s) = self.search {
      cfg.search = s;
    }
    if let Some(list) = self.sources {
      cfg.sources = list;
    }

    if let Some(reason) = validate_fetch_config(&cfg.fetch) {
      cfg.issues.push(ConfigIssue::new("fetch config invalid; using defaults", reason));
      cfg.fetch = FetchConfig::default();
    }
    if let Some(reason) = validate_org_registry_config(&cfg.org_registry) {
      cfg.org_registry.enabled = false;
      cfg.issues.push(ConfigIssue::new(
        "org_registry config invalid; organizational search disabled",
        reason,
      ));
    }
    if cfg.search.channel_capacity == 0 {
      cfg.issues.push(ConfigIssue::new(
        "search config invalid; using defaults",
        "channel_capacity must be > 0",
      ));
      cfg.search = SearchConfig::default();
    }

    let (kept, problems) = sources::validate_sources(cfg.sources);
    for problem in problems {
      cfg.issues.push(ConfigIssue::new("dropping invalid source", problem));
    }
    cfg.sources = kept;

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none()
      || self.fetch.is_none()
      || self.org_registry.is_none()
      || self.search.is_none()
      || self.sources.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let needs_upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if allow_writes && needs_upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_now()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "cidr-recon: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let mut cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", unix_now()));
        let _ = fs::rename(path, &backup);
        write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
        cfg.issues.push(ConfigIssue::new(
          "unparsable config replaced with defaults",
          format!("{} (backed up to {}): {e}", path.display(), backup.display()),
        ));
      } else {
        cfg.issues.push(ConfigIssue::new(
          "unparsable config; using defaults",
          format!("{}: {e}", path.display()),
        ));
      }
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    cache_dir: cfg.cache_dir.clone(),
    logging: Some(cfg.logging.clone()),
    fetch: Some(cfg.fetch.clone()),
    org_registry: Some(cfg.org_registry.clone()),
    search: Some(cfg.search.clone()),
    sources: Some(cfg.sources.clone()),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn unix_now() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

fn validate_fetch_config(cfg: &FetchConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  if cfg.connect_timeout_seconds == 0 {
    return Some("connect_timeout_seconds must be > 0".to_string());
  }
  if cfg.retries > 10 {
    return Some("retries must be <= 10".to_string());
  }
  None
}

fn validate_org_registry_config(cfg: &OrgRegistryConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  let Ok(url) = reqwest::Url::parse(&cfg.base_url) else {
    return Some(format!("invalid base_url: {}", cfg.base_url));
  };
  if !matches!(url.scheme(), "http" | "https") {
    return Some(format!("base_url must use http or https: {}", cfg.base_url));
  }
  None
}
