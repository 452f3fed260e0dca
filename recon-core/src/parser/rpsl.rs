use std::io::{self, BufRead};

/// One blank-line separated RPSL object, attributes in file order with
/// lowercased keys.
#[derive(Debug, Clone, Default)]
pub struct RpslObject {
  attrs: Vec<(String, String)>,
  pub line: u64,
  pub malformed_lines: usize,
}

impl RpslObject {
  pub fn is_empty(&self) -> bool {
    self.attrs.is_empty()
  }

  /// The object class is the key of its first attribute.
  pub fn class(&self) -> Option<&str> {
    self.attrs.first().map(|(k, _)| k.as_str())
  }

  pub fn first(&self, key: &str) -> Option<&str> {
    self
      .attrs
      .iter()
      .find(|(k, v)| k == key && !v.is_empty())
      .map(|(_, v)| v.as_str())
  }

  pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .attrs
      .iter()
      .filter(move |(k, v)| k == key && !v.is_empty())
      .map(|(_, v)| v.as_str())
  }

  /// Non-empty values of `key` joined with single spaces.
  pub fn joined(&self, key: &str) -> Option<String> {
    let parts: Vec<&str> = self.all(key).collect();
    (!parts.is_empty()).then(|| parts.join(" "))
  }

  pub fn first_line(&self) -> String {
    match self.attrs.first() {
      Some((k, v)) => format!("{k}: {v}"),
      None => String::new(),
    }
  }

  fn push(&mut self, key: String, value: String) {
    self.attrs.push((key, value));
  }

  fn extend_last(&mut self, more: &str) -> bool {
    let Some((_, value)) = self.attrs.last_mut() else {
      return false;
    };
    if !more.is_empty() {
      if !value.is_empty() {
        value.push(' ');
      }
      value.push_str(more);
    }
    true
  }
}

/// Lazily splits a dump into objects. Undecodable bytes are replaced, lines
/// that are neither attributes nor continuations are counted and skipped.
pub struct ObjectReader<R> {
  reader: R,
  buf: Vec<u8>,
  line_no: u64,
  finished: bool,
}

impl<R: BufRead> ObjectReader<R> {
  pub fn new(reader: R) -> Self {
    Self {
      reader,
      buf: Vec::with_capacity(256),
      line_no: 0,
      finished: false,
    }
  }
}

impl<R: BufRead> Iterator for ObjectReader<R> {
  type Item = io::Result<RpslObject>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let mut object = RpslObject::default();
    loop {
      self.buf.clear();
      let n = match self.reader.read_until(b'\n', &mut self.buf) {
        Ok(n) => n,
        Err(e) => {
          self.finished = true;
          return Some(Err(e));
        }
      };
      if n == 0 {
        self.finished = true;
        return (!object.is_empty()).then_some(Ok(object));
      }
      self.line_no += 1;

      let text = String::from_utf8_lossy(&self.buf);
      let line = text.trim_end_matches(['\r', '\n']);

      if line.trim().is_empty() {
        if object.is_empty() {
          continue;
        }
        return Some(Ok(object));
      }
      if line.starts_with('%') || line.starts_with('#') {
        continue;
      }

      if let Some(rest) = line.strip_prefix([' ', '\t', '+']) {
        if !object.extend_last(rest.trim()) {
          object.malformed_lines += 1;
        }
        continue;
      }

      match line.split_once(':') {
        Some((key, value)) if is_attribute_key(key) => {
          if object.is_empty() {
            object.line = self.line_no;
          }
          object.push(key.to_ascii_lowercase(), value.trim().to_string());
        }
        _ => {
          tracing::debug!(line = self.line_no, "skipping malformed dump line");
          object.malformed_lines += 1;
        }
      }
    }
  }
}

fn is_attribute_key(key: &str) -> bool {
  !key.is_empty()
    && key
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '*')
}
