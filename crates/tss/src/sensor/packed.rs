//! Fixed-width packed binary records.
//!
//! A record is one marker character followed by the record bytes in
//! hexadecimal. Fields are big-endian two's-complement integers at fixed
//! byte offsets, optionally mapped through a linear calibration.

use super::{DecodeError, RecordDecoder};
use crate::telemetry::{FieldValue, Labels};

/// Width in bytes of the IMU record layout.
pub const IMU_RECORD_WIDTH: usize = 58;

/// Calibration applied as `raw * scale + bias`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTransform {
    /// Multiplier.
    pub scale: f64,
    /// Offset added after scaling.
    pub bias: f64,
}

/// Location and interpretation of one field in a packed record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Output label.
    pub label: String,
    /// Offset of the field's most significant byte.
    pub byte_offset: usize,
    /// Width of the field in bits, 1 to 64.
    pub bit_width: u32,
    /// Optional calibration; a calibrated field decodes as a float.
    pub transform: Option<LinearTransform>,
}

impl FieldSpec {
    /// A plain signed integer field.
    #[must_use]
    pub fn signed(label: impl Into<String>, byte_offset: usize, bit_width: u32) -> Self {
        Self {
            label: label.into(),
            byte_offset,
            bit_width,
            transform: None,
        }
    }

    /// A signed field mapped through `raw * scale + bias`.
    #[must_use]
    pub fn scaled(
        label: impl Into<String>,
        byte_offset: usize,
        bit_width: u32,
        scale: f64,
        bias: f64,
    ) -> Self {
        Self {
            transform: Some(LinearTransform { scale, bias }),
            ..Self::signed(label, byte_offset, bit_width)
        }
    }

    fn byte_len(&self) -> usize {
        self.bit_width.div_ceil(8) as usize
    }

    fn fits(&self, record_width: usize) -> bool {
        (1..=64).contains(&self.bit_width) && self.byte_offset + self.byte_len() <= record_width
    }

    fn extract(&self, record: &[u8]) -> FieldValue {
        let bytes = &record[self.byte_offset..self.byte_offset + self.byte_len()];
        let acc = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let unused = self.bit_width.div_ceil(8) * 8 - self.bit_width;
        let raw = sign_extend(acc >> unused, self.bit_width);

        match self.transform {
            #[allow(clippy::cast_precision_loss)]
            Some(LinearTransform { scale, bias }) => FieldValue::Float(raw as f64 * scale + bias),
            None => FieldValue::Int(raw),
        }
    }
}

/// Interpret the low `bit_width` bits of `raw` as a two's-complement value.
///
/// # Panics
///
/// Panics in debug builds if `bit_width` is not in `1..=64`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn sign_extend(raw: u64, bit_width: u32) -> i64 {
    debug_assert!((1..=64).contains(&bit_width));
    let shift = 64 - bit_width;
    ((raw << shift) as i64) >> shift
}

/// Decoder for fixed-width hexadecimal records.
#[derive(Debug, Clone)]
pub struct PackedRecordDecoder {
    labels: Labels,
    record_width: usize,
    fields: Vec<FieldSpec>,
}

impl PackedRecordDecoder {
    /// Build a decoder from a record width and a field table.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::FieldOutOfBounds`] if a field extends past the
    /// record or has an unsupported bit width.
    pub fn new(record_width: usize, fields: Vec<FieldSpec>) -> Result<Self, DecodeError> {
        if let Some(bad) = fields.iter().find(|field| !field.fits(record_width)) {
            return Err(DecodeError::FieldOutOfBounds {
                label: bad.label.clone(),
                record_width,
            });
        }
        Ok(Self::from_table(record_width, fields))
    }

    fn from_table(record_width: usize, fields: Vec<FieldSpec>) -> Self {
        Self {
            labels: Labels::new(fields.iter().map(|field| field.label.clone())),
            record_width,
            fields,
        }
    }

    /// The 58-byte inertial measurement layout.
    ///
    /// Every field is 16 bits wide. `Temp` is calibrated to degrees Celsius.
    #[must_use]
    pub fn imu() -> Self {
        let table = [
            ("No", 4),
            ("Area1", 15),
            ("Area2", 17),
            ("Area3", 19),
            ("Area4", 21),
            ("Temp", 24),
            ("AccelX", 29),
            ("AccelY", 31),
            ("AccelZ", 33),
            ("GyroX", 35),
            ("GyroY", 37),
            ("GyroZ", 39),
            ("MagX", 41),
            ("MagY", 43),
            ("MagZ", 45),
        ];
        let fields = table
            .into_iter()
            .map(|(label, offset)| match label {
                "Temp" => FieldSpec::scaled(label, offset, 16, 0.125 / 64.0, 26.75),
                _ => FieldSpec::signed(label, offset, 16),
            })
            .collect();
        Self::from_table(IMU_RECORD_WIDTH, fields)
    }

    /// Record width in bytes.
    #[must_use]
    pub fn record_width(&self) -> usize {
        self.record_width
    }

    /// The field table.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

impl RecordDecoder for PackedRecordDecoder {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn decode(&self, raw: &[u8]) -> Result<Option<Vec<FieldValue>>, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::Utf8)?;
        let mut chars = text.chars();
        chars.next();
        let digits = chars.as_str().trim();
        if digits.is_empty() {
            return Ok(None);
        }

        let record = hex_to_record(digits, self.record_width)?;
        Ok(Some(
            self.fields.iter().map(|field| field.extract(&record)).collect(),
        ))
    }
}

/// Decode hex digits into exactly `width` bytes.
///
/// The digits are read as one big-endian number: short input is
/// zero-extended on the left and bytes beyond `width` on the left are
/// discarded.
fn hex_to_record(digits: &str, width: usize) -> Result<Vec<u8>, DecodeError> {
    let mut nibbles = digits
        .chars()
        .map(|c| {
            c.to_digit(16)
                .and_then(|d| u8::try_from(d).ok())
                .ok_or(DecodeError::Hex(c))
        })
        .collect::<Result<Vec<u8>, _>>()?;
    if nibbles.len() % 2 == 1 {
        nibbles.insert(0, 0);
    }

    let bytes: Vec<u8> = nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect();
    let mut record = vec![0u8; width];
    let take = bytes.len().min(width);
    record[width - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    Ok(record)
}
