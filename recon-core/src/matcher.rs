use anyhow::Context;
use std::fs;
use std::path::Path;

/// Normalized search terms for one run: trimmed, lowercased, deduplicated,
/// in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
  terms: Vec<String>,
}

impl Keywords {
  pub fn parse(raw: &str) -> Self {
    let mut terms: Vec<String> = Vec::new();
    for part in raw.split(',') {
      let term = normalize(part);
      if term.is_empty() || terms.contains(&term) {
        continue;
      }
      terms.push(term);
    }
    Self { terms }
  }

  /// Treats `arg` as a keyword file when it names an existing file (one
  /// entry per line, `#` starts a comment), otherwise as a comma list.
  pub fn from_arg(arg: &str) -> anyhow::Result<Self> {
    let path = Path::new(arg);
    if !path.is_file() {
      return Ok(Self::parse(arg));
    }

    let raw = fs::read_to_string(path)
      .with_context(|| format!("read keyword file {}", path.display()))?;
    let joined = raw
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with('#'))
      .collect::<Vec<_>>()
      .join(",");
    Ok(Self::parse(&joined))
  }

  pub fn is_empty(&self) -> bool {
    self.terms.is_empty()
  }

  pub fn len(&self) -> usize {
    self.terms.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.terms.iter().map(String::as_str)
  }
}

fn normalize(term: &str) -> String {
  term.trim().to_lowercase()
}

/// Splits an already-lowercased name on every non-alphanumeric character.
pub fn tokenize(lowered: &str) -> impl Iterator<Item = &str> {
  lowered
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
}

/// Strict: a keyword equals a whole token of the name. Fuzzy: a keyword
/// occurs anywhere in the name. Both compare lowercased text, and an empty
/// keyword set never matches.
pub fn matches(organization_name: &str, keywords: &Keywords, strict: bool) -> bool {
  if keywords.is_empty() {
    return false;
  }

  let lowered = organization_name.to_lowercase();
  if strict {
    tokenize(&lowered).any(|token| keywords.iter().any(|k| k == token))
  } else {
    keywords.iter().any(|k| lowered.contains(k))
  }
}
