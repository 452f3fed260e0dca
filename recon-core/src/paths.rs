use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "CIDR_RECON_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var(HOME_ENV) {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  let home = std::env::var("HOME")
    .or_else(|_| std::env::var("USERPROFILE"))
    .map_err(|_| anyhow::anyhow!("neither {HOME_ENV} nor HOME is set"))?;
  Ok(PathBuf::from(home).join(".cidr-recon"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn cache_dir(base: &Path) -> PathBuf {
  base.join("cache")
}
