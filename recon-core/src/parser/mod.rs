use crate::sources::RecordFormat;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

mod block;
mod rpsl;

pub use block::Block;
pub use rpsl::{ObjectReader, RpslObject};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
  pub source: String,
  pub block: Block,
  pub organization_name: String,
  pub raw_line: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error("unparsable address block {value:?}")]
  BadBlock { value: String },

  #[error("no organization name for {block}")]
  MissingName { block: String },
}

/// Turns one RPSL object into a record. Objects of classes the parser does
/// not handle yield `Ok(None)`.
pub trait RecordParser: Send + Sync {
  fn parse_object(&self, source: &str, object: &RpslObject) -> Result<Option<Record>, ParseError>;
}

pub struct InetnumParser;

impl RecordParser for InetnumParser {
  fn parse_object(&self, source: &str, object: &RpslObject) -> Result<Option<Record>, ParseError> {
    let Some(class) = object.class() else {
      return Ok(None);
    };
    if class != "inetnum" && class != "inet6num" {
      return Ok(None);
    }

    let value = object.first(class).unwrap_or_default();
    let block = Block::parse(value)?;
    let organization_name = object
      .first("org-name")
      .map(str::to_string)
      .or_else(|| object.joined("descr"))
      .or_else(|| object.first("netname").map(str::to_string))
      .ok_or_else(|| ParseError::MissingName {
        block: block.to_string(),
      })?;

    Ok(Some(Record {
      source: source.to_string(),
      block,
      organization_name,
      raw_line: object.first_line(),
    }))
  }
}

pub struct RouteParser;

impl RecordParser for RouteParser {
  fn parse_object(&self, source: &str, object: &RpslObject) -> Result<Option<Record>, ParseError> {
    let Some(class) = object.class() else {
      return Ok(None);
    };
    if class != "route" && class != "route6" {
      return Ok(None);
    }

    let value = object.first(class).unwrap_or_default();
    let block = match Block::parse(value)? {
      b @ Block::Cidr(_) => b,
      _ => {
        return Err(ParseError::BadBlock {
          value: value.to_string(),
        })
      }
    };
    let organization_name = object
      .joined("descr")
      .or_else(|| object.first("mnt-by").map(str::to_string))
      .or_else(|| object.first("origin").map(str::to_string))
      .ok_or_else(|| ParseError::MissingName {
        block: block.to_string(),
      })?;

    Ok(Some(Record {
      source: source.to_string(),
      block,
      organization_name,
      raw_line: object.first_line(),
    }))
  }
}

pub fn parser_for(format: RecordFormat) -> Box<dyn RecordParser> {
  match format {
    RecordFormat::Inetnum => Box::new(InetnumParser),
    RecordFormat::Route => Box::new(RouteParser),
  }
}

/// Lazy sequence of records from one dump. Malformed objects are skipped and
/// counted; a read error ends the stream early.
pub struct RecordStream {
  objects: ObjectReader<Box<dyn BufRead + Send>>,
  parser: Box<dyn RecordParser>,
  source: String,
  parsed: usize,
  skipped: usize,
  read_error: Option<io::Error>,
}

impl RecordStream {
  pub fn new(
    reader: Box<dyn BufRead + Send>,
    parser: Box<dyn RecordParser>,
    source: &str,
  ) -> Self {
    Self {
      objects: ObjectReader::new(reader),
      parser,
      source: source.to_string(),
      parsed: 0,
      skipped: 0,
      read_error: None,
    }
  }

  pub fn parsed(&self) -> usize {
    self.parsed
  }

  pub fn skipped(&self) -> usize {
    self.skipped
  }

  pub fn read_error(&self) -> Option<&io::Error> {
    self.read_error.as_ref()
  }
}

impl Iterator for RecordStream {
  type Item = Record;

  fn next(&mut self) -> Option<Record> {
    loop {
      let object = match self.objects.next()? {
        Ok(o) => o,
        Err(e) => {
          tracing::warn!(source = %self.source, error = %e, "dump read failed; stopping early");
          self.read_error = Some(e);
          return None;
        }
      };
      self.skipped += object.malformed_lines;

      match self.parser.parse_object(&self.source, &object) {
        Ok(Some(record)) => {
          self.parsed += 1;
          return Some(record);
        }
        Ok(None) => continue,
        Err(e) => {
          self.skipped += 1;
          tracing::debug!(
            source = %self.source,
            line = object.line,
            reason = %e,
            "skipping malformed record"
          );
        }
      }
    }
  }
}

/// Opens `path` and returns a fresh stream over it; call again to restart.
/// Gzip input is detected by its magic bytes.
pub fn records(path: &Path, format: RecordFormat, source: &str) -> io::Result<RecordStream> {
  let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
  let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

  let inner: Box<dyn BufRead + Send> = if is_gzip {
    Box::new(BufReader::with_capacity(64 * 1024, MultiGzDecoder::new(reader)))
  } else {
    Box::new(reader)
  };

  Ok(RecordStream::new(inner, parser_for(format), source))
}
