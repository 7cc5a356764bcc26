//! Log records as delivered by the pipeline and their canonical rendering.

use std::fmt;

use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// One structured log entry. The pipeline's timestamp is dropped on decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fields: Map<String, Value>,
}

impl Record {
    /// Field/value pairs with values in their canonical string form.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Rendered<'_>)> {
        self.fields
            .iter()
            .map(|(field, value)| (field.as_str(), Rendered(value)))
    }
}

/// Displays a record value the way it is used as a tag value: strings
/// verbatim, `null` as empty, everything else as compact JSON.
#[derive(Debug, Clone, Copy)]
pub struct Rendered<'a>(pub &'a Value);

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Null => Ok(()),
            Value::String(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            other => write!(f, "{}", other),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry {
    Forward(IgnoredAny, Map<String, Value>),
    Bare(Map<String, Value>),
}

impl From<Entry> for Record {
    fn from(entry: Entry) -> Self {
        match entry {
            Entry::Forward(_, fields) | Entry::Bare(fields) => Self { fields },
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Lazily decodes a batch of concatenated JSON entries. Each entry is either
/// `[timestamp, {fields}]` or a bare `{fields}` object. A malformed entry is
/// logged and skipped up to the end of its line; decoding resumes on the next
/// line.
pub struct BatchDecoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BatchDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn skip_line(&mut self) {
        let rest = &self.data[self.offset..];
        let start = rest
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(rest.len());

        self.offset += rest[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(rest.len(), |eol| start + eol + 1);
    }
}

impl Iterator for BatchDecoder<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.data.len() {
            let mut entries =
                serde_json::Deserializer::from_slice(&self.data[self.offset..]).into_iter::<Entry>();

            match entries.next() {
                Some(Ok(entry)) => {
                    self.offset += entries.byte_offset();
                    return Some(entry.into());
                }
                Some(Err(err)) => {
                    warn!(%err, offset = self.offset, "Failed to decode log record, skipping line");
                    self.skip_line();
                }
                None => self.offset = self.data.len(),
            }
        }

        None
    }
}
