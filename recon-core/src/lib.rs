pub mod cache;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod matcher;
pub mod org_registry;
pub mod parser;
pub mod paths;
pub mod pipeline;
pub mod search;
pub mod sink;
pub mod sources;

use std::path::PathBuf;

/// Everything the command line decides for one run.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
  pub keywords: String,
  pub strict: bool,
  pub no_cache: bool,
  pub output: Option<PathBuf>,
  pub config: Option<PathBuf>,
  pub verbose: bool,
}

const VERBOSE_FILTER: &str = "info,recon_core=debug,cidr_recon=debug";

pub fn run_cli(inv: &Invocation) -> anyhow::Result<pipeline::RunReport> {
  let base = paths::base_dir()?;
  let config_path = inv
    .config
    .clone()
    .unwrap_or_else(|| paths::config_path(&base));
  let cfg = config::load_or_create_default(&config_path)?;

  let level = if inv.verbose {
    VERBOSE_FILTER
  } else {
    cfg.logging.level.as_str()
  };
  if let Err(e) =
    logging::init_file_and_stderr(&paths::logs_dir(&base), level, cfg.logging.retention_days)
  {
    logging::init_stderr_only(level);
    tracing::warn!(error = %e, "file logging unavailable; logging to stderr only");
  }
  cfg.report_issues();

  let keywords = matcher::Keywords::from_arg(&inv.keywords)?;
  let client = fetch::HttpDumpClient::new(&cfg.fetch)?;
  let arin = if cfg.org_registry.enabled {
    Some(org_registry::ArinClient::new(&cfg.org_registry)?)
  } else {
    None
  };

  let cache = cache::CacheStore::new(cfg.cache_root(&base));
  let pipeline = pipeline::Pipeline::new(
    &cfg,
    cache,
    &client,
    arin.as_ref().map(|a| a as &dyn org_registry::OrgRegistry),
  );

  let opts = pipeline::RunOptions {
    keywords,
    strict: inv.strict,
    no_cache: inv.no_cache,
    output: inv.output.clone(),
  };

  let stdout = std::io::stdout();
  let mut console = stdout.lock();
  pipeline.run(&opts, &mut console)
}
