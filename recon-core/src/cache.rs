use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("permission denied on {}", path.display())]
  PermissionDenied { path: PathBuf },

  #[error("{} is not a directory", path.display())]
  NotADirectory { path: PathBuf },

  #[error("{} still has entries after removal", path.display())]
  DirectoryNotEmpty { path: PathBuf },

  #[error("invalid cache file name {name:?}")]
  InvalidName { name: String },

  #[error("cache I/O on {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl CacheError {
  fn from_io(path: &Path, source: io::Error) -> Self {
    let path = path.to_path_buf();
    match source.kind() {
      io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
      io::ErrorKind::NotADirectory => Self::NotADirectory { path },
      io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty { path },
      _ => Self::Io { path, source },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
  Removed,
  AlreadyAbsent,
}

/// Directory holding one raw dump per source. Each source owns a distinct
/// file, so writers never contend on the same destination.
#[derive(Debug, Clone)]
pub struct CacheStore {
  root: PathBuf,
}

impl CacheStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn path_of(&self, cache_file: &str) -> PathBuf {
    self.root.join(cache_file)
  }

  pub fn ensure_dir(&self) -> Result<(), CacheError> {
    fs::create_dir_all(&self.root).map_err(|e| CacheError::from_io(&self.root, e))
  }

  pub fn clear(&self) -> Result<ClearOutcome, CacheError> {
    match fs::symlink_metadata(&self.root) {
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ClearOutcome::AlreadyAbsent),
      Err(e) => return Err(CacheError::from_io(&self.root, e)),
      Ok(md) if !md.is_dir() => {
        return Err(CacheError::NotADirectory {
          path: self.root.clone(),
        })
      }
      Ok(_) => {}
    }

    match fs::remove_dir_all(&self.root) {
      Ok(()) => Ok(ClearOutcome::Removed),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ClearOutcome::AlreadyAbsent),
      Err(e) => Err(CacheError::from_io(&self.root, e)),
    }
  }

  /// A cache entry counts only when it is a regular, non-empty file.
  pub fn exists(&self, cache_file: &str) -> bool {
    fs::metadata(self.path_of(cache_file))
      .map(|md| md.is_file() && md.len() > 0)
      .unwrap_or(false)
  }

  pub fn open(&self, cache_file: &str) -> io::Result<File> {
    File::open(self.path_of(cache_file))
  }

  pub fn write(&self, cache_file: &str, bytes: &[u8]) -> Result<(), CacheError> {
    self.write_with(cache_file, |file| {
      io::Write::write_all(file, bytes).map_err(|e| CacheError::Io {
        path: self.path_of(cache_file),
        source: e,
      })
    })
  }

  /// Streams content into a temp file next to the destination and renames
  /// it into place once `fill` succeeds. On any error the temp file is
  /// discarded and the previous entry is left as it was.
  pub fn write_with<T, E, F>(&self, cache_file: &str, fill: F) -> Result<T, E>
  where
    F: FnOnce(&mut File) -> Result<T, E>,
    E: From<CacheError>,
  {
    validate_name(cache_file)?;
    let dst = self.path_of(cache_file);
    if let Some(parent) = dst.parent() {
      fs::create_dir_all(parent).map_err(|e| CacheError::from_io(parent, e))?;
    }

    let tmp = tmp_path(&dst);
    let mut file = File::create(&tmp).map_err(|e| CacheError::from_io(&tmp, e))?;

    let value = match fill(&mut file) {
      Ok(v) => v,
      Err(e) => {
        drop(file);
        let _ = fs::remove_file(&tmp);
        return Err(e);
      }
    };

    if let Err(e) = file.sync_all() {
      drop(file);
      let _ = fs::remove_file(&tmp);
      return Err(CacheError::from_io(&tmp, e).into());
    }
    drop(file);

    if let Err(e) = fs::rename(&tmp, &dst) {
      let _ = fs::remove_file(&tmp);
      return Err(CacheError::from_io(&dst, e).into());
    }
    Ok(value)
  }
}

pub fn validate_name(cache_file: &str) -> Result<(), CacheError> {
  let path = Path::new(cache_file);
  let normal_only = path
    .components()
    .all(|c| matches!(c, Component::Normal(_)));
  if cache_file.trim().is_empty() || !normal_only {
    return Err(CacheError::InvalidName {
      name: cache_file.to_string(),
    });
  }
  Ok(())
}

fn tmp_path(dst: &Path) -> PathBuf {
  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("entry");
  dst.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}
