//! Colon-delimited text records.

use super::{DecodeError, RecordDecoder};
use crate::telemetry::{FieldValue, Labels};

/// Characters preceding the first field of every record.
pub const PREAMBLE_LEN: usize = 2;

/// Field separator.
pub const SEPARATOR: char = ':';

/// Where one output field lives in a delimited record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFieldSpec {
    /// Output label.
    pub label: String,
    /// Index of the source field after splitting.
    pub field_index: usize,
    /// Characters to strip from the start of the source field.
    pub prefix_len: usize,
}

impl TextFieldSpec {
    /// Create a field entry.
    #[must_use]
    pub fn new(label: impl Into<String>, field_index: usize, prefix_len: usize) -> Self {
        Self {
            label: label.into(),
            field_index,
            prefix_len,
        }
    }
}

/// Decoder for colon-separated text records; values pass through as text.
#[derive(Debug, Clone)]
pub struct DelimitedRecordDecoder {
    labels: Labels,
    fields: Vec<TextFieldSpec>,
}

impl DelimitedRecordDecoder {
    /// Build a decoder from a field table.
    #[must_use]
    pub fn new(fields: Vec<TextFieldSpec>) -> Self {
        Self {
            labels: Labels::new(fields.iter().map(|field| field.label.clone())),
            fields,
        }
    }

    /// The tagged coordinate stream: `ID`, `No`, `x`, `y`, `z`.
    #[must_use]
    pub fn coordinates() -> Self {
        Self::new(vec![
            TextFieldSpec::new("ID", 3, 3),
            TextFieldSpec::new("No", 2, 3),
            TextFieldSpec::new("x", 8, 2),
            TextFieldSpec::new("y", 9, 2),
            TextFieldSpec::new("z", 10, 2),
        ])
    }
}

impl RecordDecoder for DelimitedRecordDecoder {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn decode(&self, raw: &[u8]) -> Result<Option<Vec<FieldValue>>, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::Utf8)?;
        let body: String = text.chars().skip(PREAMBLE_LEN).collect();
        let body = body.replace("\r\n", "");
        let body = body.trim_end_matches(['\r', '\n']);

        let parts: Vec<&str> = body.split(SEPARATOR).collect();
        if parts.len() < 2 {
            return Ok(None);
        }

        self.fields
            .iter()
            .map(|field| {
                parts
                    .get(field.field_index)
                    .map(|part| FieldValue::Text(part.chars().skip(field.prefix_len).collect()))
                    .ok_or_else(|| DecodeError::MissingField {
                        label: field.label.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
