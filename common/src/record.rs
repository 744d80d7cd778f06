use crate::config::ScanConfig;

/// A validated attendee entry: a fixed number of ordered string fields
/// (name, ID, timestamp, course, session in the standard schema).
///
/// Only [`RecordParser::parse`] constructs a `Record`, so the arity always
/// matches the schema it was parsed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Splits payloads on a fixed delimiter and accepts them iff the field count
/// equals the schema arity. Field contents are taken verbatim.
#[derive(Debug, Clone)]
pub struct RecordParser {
    delimiter: String,
    arity: usize,
}

impl RecordParser {
    pub const DEFAULT_DELIMITER: &'static str = ", ";
    pub const DEFAULT_ARITY: usize = 5;

    pub fn new(delimiter: impl Into<String>, arity: usize) -> Self {
        Self {
            delimiter: delimiter.into(),
            arity,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.delimiter.clone(), config.field_count)
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn parse(&self, payload: &str) -> Result<Record, ParseError> {
        let fields: Vec<&str> = payload.split(self.delimiter.as_str()).collect();
        if fields.len() != self.arity {
            return Err(ParseError::ArityMismatch {
                expected: self.arity,
                got: fields.len(),
            });
        }
        Ok(Record {
            fields: fields.into_iter().map(str::to_string).collect(),
        })
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELIMITER, Self::DEFAULT_ARITY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("payload has {got} fields, expected {expected}")]
    ArityMismatch { expected: usize, got: usize },
}
