use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Selects the record parser used for a source's dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
  /// RPSL `inetnum` / `inet6num` objects.
  Inetnum,
  /// RPSL `route` / `route6` objects.
  Route,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
  pub name: String,
  pub url: String,
  pub cache_file: String,
  pub format: RecordFormat,
}

impl SourceDescriptor {
  pub fn new(name: &str, url: &str, cache_file: &str, format: RecordFormat) -> Self {
    Self {
      name: name.to_string(),
      url: url.to_string(),
      cache_file: cache_file.to_string(),
      format,
    }
  }
}

pub fn default_sources() -> Vec<SourceDescriptor> {
  use RecordFormat::{Inetnum, Route};
  vec![
    SourceDescriptor::new(
      "RIPE",
      "https://ftp.ripe.net/ripe/dbase/split/ripe.db.inetnum.gz",
      "ripe.db.inetnum.gz",
      Inetnum,
    ),
    SourceDescriptor::new(
      "RIPE6",
      "https://ftp.ripe.net/ripe/dbase/split/ripe.db.inet6num.gz",
      "ripe.db.inet6num.gz",
      Inetnum,
    ),
    SourceDescriptor::new(
      "APNIC",
      "https://ftp.apnic.net/apnic/whois/apnic.db.inetnum.gz",
      "apnic.db.inetnum.gz",
      Inetnum,
    ),
    SourceDescriptor::new(
      "APNIC6",
      "https://ftp.apnic.net/apnic/whois/apnic.db.inet6num.gz",
      "apnic.db.inet6num.gz",
      Inetnum,
    ),
    SourceDescriptor::new(
      "AFRINIC",
      "https://ftp.afrinic.net/pub/dbase/afrinic.db.gz",
      "afrinic.db.gz",
      Inetnum,
    ),
    SourceDescriptor::new(
      "LACNIC",
      "https://ftp.lacnic.net/lacnic/dbase/lacnic.db.gz",
      "lacnic.db.gz",
      Inetnum,
    ),
    SourceDescriptor::new(
      "RADB",
      "https://ftp.radb.net/radb/dbase/radb.db.gz",
      "radb.db.gz",
      Route,
    ),
  ]
}

/// Keeps the well-formed descriptors, in order, and returns a reason for
/// every one that was dropped.
pub fn validate_sources(sources: Vec<SourceDescriptor>) -> (Vec<SourceDescriptor>, Vec<String>) {
  let mut names = HashSet::new();
  let mut files = HashSet::new();
  let mut kept = Vec::new();
  let mut problems = Vec::new();

  for source in sources {
    if let Some(reason) = descriptor_problem(&source) {
      problems.push(format!("source {:?}: {reason}", source.name));
      continue;
    }
    if !names.insert(source.name.to_ascii_lowercase()) {
      problems.push(format!("source {:?}: duplicate name", source.name));
      continue;
    }
    if !files.insert(source.cache_file.clone()) {
      problems.push(format!(
        "source {:?}: cache file {:?} already used",
        source.name, source.cache_file
      ));
      continue;
    }
    kept.push(source);
  }

  (kept, problems)
}

fn descriptor_problem(source: &SourceDescriptor) -> Option<String> {
  if source.name.trim().is_empty() {
    return Some("name must not be empty".to_string());
  }
  if crate::cache::validate_name(&source.cache_file).is_err() {
    return Some(format!("invalid cache file {:?}", source.cache_file));
  }
  let Ok(url) = reqwest::Url::parse(&source.url) else {
    return Some(format!("invalid URL: {}", source.url));
  };
  if !matches!(url.scheme(), "http" | "https") {
    return Some(format!("URL must use http or https: {}", source.url));
  }
  if url.host_str().is_none() {
    return Some(format!("URL has no host: {}", source.url));
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid_and_distinct() {
    let defaults = default_sources();
    let count = defaults.len();
    let (kept, problems) = validate_sources(defaults);
    assert!(problems.is_empty(), "{problems:?}");
    assert_eq!(kept.len(), count);
  }

  #[test]
  fn drops_bad_and_duplicate_entries_preserving_order() {
    let input = vec![
      SourceDescriptor::new("A", "https://a.example/a.gz", "a.gz", RecordFormat::Inetnum),
      SourceDescriptor::new("a", "https://a.example/b.gz", "b.gz", RecordFormat::Inetnum),
      SourceDescriptor::new("B", "ftp://b.example/b.gz", "c.gz", RecordFormat::Route),
      SourceDescriptor::new("C", "https://c.example/c.gz", "../c.gz", RecordFormat::Route),
      SourceDescriptor::new("D", "https://d.example/d.gz", "a.gz", RecordFormat::Route),
      SourceDescriptor::new("E", "http://e.example/e.gz", "e.gz", RecordFormat::Route),
    ];
    let (kept, problems) = validate_sources(input);
    let names: Vec<&str> = kept.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "E"]);
    assert_eq!(problems.len(), 4);
  }

  #[test]
  fn format_uses_lowercase_names_in_toml() {
    let src = SourceDescriptor::new("R", "https://r.example/r", "r.db", RecordFormat::Route);
    let raw = toml::to_string(&src).unwrap();
    assert!(raw.contains("format = \"route\""));
  }
}
