//! Codec for fixed-record-layout binary attribute tables (dBase-style).
//!
//! The on-disk shape is a 32-byte header, a run of 32-byte field
//! descriptors terminated by `0x0D`, then fixed-width records, each led by a
//! one-byte deletion flag. Values decode to [`FieldValue`]s per the field's
//! type tag and encode back at the exact byte width the descriptor declares,
//! so a read-modify-write cycle never moves a record boundary.
//!
//! Bulk numeric decoding is pluggable through [`NumericExtractor`]; the
//! scalar reference implementation and the rayon-backed one (feature
//! `parallel`) produce identical output.

use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

pub mod extract;

pub use extract::{NumericExtractor, NumericLayout, ScalarExtractor};

#[cfg(feature = "parallel")]
pub use extract::ParallelExtractor;

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const NAME_LEN: usize = 11;
const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
const FILE_TERMINATOR: u8 = 0x1A;
const LIVE_FLAG: u8 = 0x20;
const DELETED_FLAG: u8 = 0x2A;
const TABLE_VERSION: u8 = 0x03;

/// Typed interpretation of a field's one-byte type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// 'N', 'F', 'B', 'M': fixed-width ASCII numbers, decoded as f64.
    Numeric,
    /// 'C': space-padded text.
    Character,
    /// 'D': 8-digit YYYYMMDD.
    Date,
    /// 'L': single-character boolean.
    Logical,
}

impl FieldKind {
    fn from_tag(tag: u8, name: &str) -> Result<FieldKind> {
        match tag {
            b'N' | b'F' | b'B' | b'M' => Ok(FieldKind::Numeric),
            b'C' => Ok(FieldKind::Character),
            b'D' => Ok(FieldKind::Date),
            b'L' => Ok(FieldKind::Logical),
            _ => Err(MatchError::UnknownFieldType {
                tag,
                name: name.to_string(),
            }),
        }
    }

    fn tag(self) -> u8 {
        match self {
            FieldKind::Numeric => b'N',
            FieldKind::Character => b'C',
            FieldKind::Date => b'D',
            FieldKind::Logical => b'L',
        }
    }
}

/// One 32-byte field descriptor from the table header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name (at most 11 bytes on disk, NUL-padded).
    pub name: String,
    pub kind: FieldKind,
    /// Field width in bytes.
    pub length: u8,
    /// Declared decimal places for numeric fields.
    pub decimals: u8,
    // Raw type tag as stored, so a table read with 'F' writes back 'F'.
    tag: u8,
}

impl FieldDescriptor {
    pub fn new(name: &str, kind: FieldKind, length: u8, decimals: u8) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            kind,
            length,
            decimals,
            tag: kind.tag(),
        }
    }
}

/// One typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Logical(bool),
    Date(NaiveDate),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical string form for id-like values. Numbers render through
    /// `Display`, so an id stored as `12.0` matches the label `"12"`.
    pub fn id_string(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(v) => Some(format!("{}", v)),
            _ => None,
        }
    }
}

/// One record: field name to typed value.
pub type AttributeRow = HashMap<String, FieldValue>;

/// A parsed attribute table: field descriptors plus typed rows.
///
/// Row count and field set stay fixed across a read-modify-write cycle;
/// only values change.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeTable {
    pub fields: Vec<FieldDescriptor>,
    pub rows: Vec<AttributeRow>,
    /// Per-record deletion flags (`0x2A` on disk), preserved verbatim.
    pub deleted: Vec<bool>,
}

impl AttributeTable {
    /// Build a table in memory (deletion flags all clear).
    pub fn new(fields: Vec<FieldDescriptor>, rows: Vec<AttributeRow>) -> Self {
        let deleted = vec![false; rows.len()];
        AttributeTable {
            fields,
            rows,
            deleted,
        }
    }

    /// Parse with the scalar numeric decoder.
    pub fn parse(buf: &[u8]) -> Result<AttributeTable> {
        Self::parse_with(buf, &ScalarExtractor)
    }

    /// Parse, delegating bulk numeric decoding to `extractor`.
    ///
    /// Every extractor must return results identical to [`ScalarExtractor`],
    /// so the choice only affects throughput.
    pub fn parse_with<E: NumericExtractor>(buf: &[u8], extractor: &E) -> Result<AttributeTable> {
        let started = std::time::Instant::now();
        if buf.len() < HEADER_LEN {
            return Err(malformed(format!(
                "header needs {HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }

        let mut header = Cursor::new(buf);
        header.set_position(4);
        let record_count = header
            .read_u32::<LittleEndian>()
            .map_err(table_io("header"))? as usize;
        let first_record = header
            .read_u16::<LittleEndian>()
            .map_err(table_io("header"))? as usize;
        let record_len = header
            .read_u16::<LittleEndian>()
            .map_err(table_io("header"))? as usize;
        // Each record leads with its deletion flag; values start one past it.
        let values_start = first_record + 1;

        let fields = parse_descriptors(buf)?;

        if record_count > 0 {
            let value_bytes: usize = fields.iter().map(|f| f.length as usize).sum();
            if value_bytes + 1 > record_len {
                return Err(malformed(format!(
                    "record length {record_len} cannot hold {value_bytes} value bytes plus the deletion flag"
                )));
            }
            let end = first_record + record_count * record_len;
            if end > buf.len() {
                return Err(malformed(format!(
                    "{record_count} records of {record_len} bytes need {end} bytes, got {}",
                    buf.len()
                )));
            }
        }

        let layout = NumericLayout::from_fields(values_start, record_len, record_count, &fields);
        let numbers = extractor.extract(buf, &layout);
        let per_record = layout.ranges.len();
        if numbers.len() != per_record * record_count {
            return Err(malformed(format!(
                "numeric extractor returned {} values, expected {}",
                numbers.len(),
                per_record * record_count
            )));
        }

        let mut rows = Vec::with_capacity(record_count);
        let mut deleted = Vec::with_capacity(record_count);
        for r in 0..record_count {
            let record_at = first_record + r * record_len;
            deleted.push(buf[record_at] == DELETED_FLAG);

            let mut row = AttributeRow::with_capacity(fields.len());
            let mut field_at = record_at + 1;
            let mut number_at = r * per_record;
            for field in &fields {
                let raw = &buf[field_at..field_at + field.length as usize];
                let value = match field.kind {
                    FieldKind::Numeric => {
                        let v = numbers[number_at];
                        number_at += 1;
                        if v.is_nan() {
                            FieldValue::Null
                        } else {
                            FieldValue::Number(v)
                        }
                    }
                    FieldKind::Character => decode_text(raw),
                    FieldKind::Date => decode_date(raw),
                    FieldKind::Logical => decode_logical(raw),
                };
                row.insert(field.name.clone(), value);
                field_at += field.length as usize;
            }
            rows.push(row);
        }

        log::debug!(
            "[Table] parsed {} records x {} fields in {:?}",
            record_count,
            fields.len(),
            started.elapsed()
        );
        Ok(AttributeTable {
            fields,
            rows,
            deleted,
        })
    }

    /// Serialize back to the fixed binary layout.
    ///
    /// The record size is byte-identical to what the descriptors declare.
    /// Header version and date-stamp bytes are freshly written (semantic,
    /// not byte, equality). Values wider than their field error rather than
    /// silently truncating.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.deleted.len() != self.rows.len() {
            return Err(MatchError::LengthMismatch {
                context: "deletion flags per row",
                expected: self.rows.len(),
                actual: self.deleted.len(),
            });
        }

        let record_len: usize = 1 + self.fields.iter().map(|f| f.length as usize).sum::<usize>();
        let header_len = HEADER_LEN + self.fields.len() * DESCRIPTOR_LEN + 1;
        if header_len > usize::from(u16::MAX) || record_len > usize::from(u16::MAX) {
            return Err(malformed("table too wide for 16-bit header fields"));
        }

        let mut out: Vec<u8> =
            Vec::with_capacity(header_len + self.rows.len() * record_len + 1);
        let stamp = Local::now().date_naive();
        out.push(TABLE_VERSION);
        out.push((stamp.year() - 1900).clamp(0, 255) as u8);
        out.push(stamp.month() as u8);
        out.push(stamp.day() as u8);
        out.write_u32::<LittleEndian>(self.rows.len() as u32)
            .map_err(table_io("header"))?;
        out.write_u16::<LittleEndian>(header_len as u16)
            .map_err(table_io("header"))?;
        out.write_u16::<LittleEndian>(record_len as u16)
            .map_err(table_io("header"))?;
        out.resize(HEADER_LEN, 0);

        for field in &self.fields {
            if field.name.len() > NAME_LEN {
                return Err(malformed(format!(
                    "field name '{}' exceeds {NAME_LEN} bytes",
                    field.name
                )));
            }
            let mut name = [0u8; NAME_LEN];
            name[..field.name.len()].copy_from_slice(field.name.as_bytes());
            out.extend_from_slice(&name);
            out.push(field.tag);
            out.extend_from_slice(&[0; 4]);
            out.push(field.length);
            out.push(field.decimals);
            out.extend_from_slice(&[0; 14]);
        }
        out.push(DESCRIPTOR_TERMINATOR);

        for (row, deleted) in self.rows.iter().zip(&self.deleted) {
            out.push(if *deleted { DELETED_FLAG } else { LIVE_FLAG });
            for field in &self.fields {
                let value = row.get(&field.name).unwrap_or(&FieldValue::Null);
                encode_value(&mut out, value, field)?;
            }
        }
        out.push(FILE_TERMINATOR);
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn value(&self, row: usize, name: &str) -> Option<&FieldValue> {
        self.rows.get(row).and_then(|r| r.get(name))
    }

    /// Overwrite one value. The field must already exist; the field set
    /// never changes across a read-modify-write cycle.
    pub fn set_value(&mut self, row: usize, name: &str, value: FieldValue) -> Result<()> {
        if !self.has_field(name) {
            return Err(MatchError::MissingField {
                name: name.to_string(),
            });
        }
        let slot = self
            .rows
            .get_mut(row)
            .ok_or(MatchError::UnknownFeature { fid: row as u32 })?;
        slot.insert(name.to_string(), value);
        Ok(())
    }
}

fn parse_descriptors(buf: &[u8]) -> Result<Vec<FieldDescriptor>> {
    let mut fields = Vec::new();
    let mut at = HEADER_LEN;
    loop {
        if at >= buf.len() {
            return Err(malformed("descriptor list missing its 0x0D terminator"));
        }
        if buf[at] == DESCRIPTOR_TERMINATOR {
            break;
        }
        if at + DESCRIPTOR_LEN > buf.len() {
            return Err(malformed(format!("field descriptor at byte {at} truncated")));
        }
        let raw = &buf[at..at + DESCRIPTOR_LEN];
        let name_end = raw[..NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&raw[..name_end]).to_string();
        let tag = raw[11];
        let kind = FieldKind::from_tag(tag, &name)?;
        fields.push(FieldDescriptor {
            name,
            kind,
            length: raw[16],
            decimals: raw[17],
            tag,
        });
        at += DESCRIPTOR_LEN;
    }
    Ok(fields)
}

fn decode_text(raw: &[u8]) -> FieldValue {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        FieldValue::Null
    } else {
        FieldValue::Text(trimmed.to_string())
    }
}

fn decode_date(raw: &[u8]) -> FieldValue {
    let text = String::from_utf8_lossy(raw);
    let digits = text.trim();
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return FieldValue::Null;
    }
    match parse_ymd(digits) {
        Some(date) => FieldValue::Date(date),
        None => FieldValue::Null,
    }
}

fn parse_ymd(digits: &str) -> Option<NaiveDate> {
    let year = digits[..4].parse().ok()?;
    let month = digits[4..6].parse().ok()?;
    let day = digits[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn decode_logical(raw: &[u8]) -> FieldValue {
    match raw.first().map(|b| b.to_ascii_lowercase()) {
        Some(b'y') | Some(b't') => FieldValue::Logical(true),
        Some(b'n') | Some(b'f') => FieldValue::Logical(false),
        _ => FieldValue::Null,
    }
}

fn encode_value(out: &mut Vec<u8>, value: &FieldValue, field: &FieldDescriptor) -> Result<()> {
    let width = field.length as usize;
    let text = match value {
        FieldValue::Null => String::new(),
        FieldValue::Number(v) => format!("{:.prec$}", v, prec = field.decimals as usize),
        FieldValue::Text(s) => s.clone(),
        FieldValue::Logical(v) => if *v { "T" } else { "F" }.to_string(),
        FieldValue::Date(d) => d.format("%Y%m%d").to_string(),
    };
    if text.len() > width {
        return Err(MatchError::ValueOverflow {
            field: field.name.clone(),
            value: text,
            width: field.length,
        });
    }
    let pad = width - text.len();
    match value {
        // Numbers are right-aligned, everything else left-aligned.
        FieldValue::Number(_) => {
            out.extend(std::iter::repeat(b' ').take(pad));
            out.extend_from_slice(text.as_bytes());
        }
        _ => {
            out.extend_from_slice(text.as_bytes());
            out.extend(std::iter::repeat(b' ').take(pad));
        }
    }
    Ok(())
}

fn malformed(reason: impl Into<String>) -> MatchError {
    MatchError::MalformedTable {
        reason: reason.into(),
    }
}

fn table_io(context: &'static str) -> impl FnOnce(std::io::Error) -> MatchError {
    move |e| malformed(format!("{context}: {e}"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, FieldValue)]) -> AttributeRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Assemble a two-field, two-record table byte by byte to pin the
    /// layout independently of `serialize`.
    fn hand_assembled() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x03, 95, 6, 1]); // version + date stamp
        buf.extend_from_slice(&2u32.to_le_bytes()); // record count
        let header_len: u16 = 32 + 2 * 32 + 1;
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&10u16.to_le_bytes()); // 1 flag + 5 + 4
        buf.resize(32, 0);

        buf.extend_from_slice(b"NAME\0\0\0\0\0\0\0");
        buf.push(b'C');
        buf.extend_from_slice(&[0; 4]);
        buf.push(5);
        buf.push(0);
        buf.extend_from_slice(&[0; 14]);

        buf.extend_from_slice(b"COUNT\0\0\0\0\0\0");
        buf.push(b'N');
        buf.extend_from_slice(&[0; 4]);
        buf.push(4);
        buf.push(0);
        buf.extend_from_slice(&[0; 14]);

        buf.push(0x0D);
        buf.push(0x20);
        buf.extend_from_slice(b"Bob  ");
        buf.extend_from_slice(b"  12");
        buf.push(0x2A);
        buf.extend_from_slice(b"Ann  ");
        buf.extend_from_slice(b"   7");
        buf.push(0x1A);
        buf
    }

    #[test]
    fn test_parse_hand_assembled_layout() {
        let table = AttributeTable::parse(&hand_assembled()).unwrap();
        assert_eq!(table.fields.len(), 2);
        assert_eq!(table.fields[0].name, "NAME");
        assert_eq!(table.fields[1].kind, FieldKind::Numeric);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.value(0, "NAME"),
            Some(&FieldValue::Text("Bob".to_string()))
        );
        assert_eq!(table.value(0, "COUNT"), Some(&FieldValue::Number(12.0)));
        assert_eq!(table.value(1, "COUNT"), Some(&FieldValue::Number(7.0)));
        assert_eq!(table.deleted, vec![false, true]);
    }

    #[test]
    fn test_round_trip_every_kind() {
        let fields = vec![
            FieldDescriptor::new("LABEL", FieldKind::Character, 8, 0),
            FieldDescriptor::new("WIDTH", FieldKind::Numeric, 9, 2),
            FieldDescriptor::new("SEEN", FieldKind::Date, 8, 0),
            FieldDescriptor::new("OPEN", FieldKind::Logical, 1, 0),
        ];
        let rows = vec![
            row(&[
                ("LABEL", FieldValue::Text("north".to_string())),
                ("WIDTH", FieldValue::Number(-7.25)),
                (
                    "SEEN",
                    FieldValue::Date(NaiveDate::from_ymd_opt(2023, 7, 4).unwrap()),
                ),
                ("OPEN", FieldValue::Logical(true)),
            ]),
            row(&[
                ("LABEL", FieldValue::Null),
                ("WIDTH", FieldValue::Null),
                ("SEEN", FieldValue::Null),
                ("OPEN", FieldValue::Logical(false)),
            ]),
        ];
        let table = AttributeTable::new(fields, rows);

        let bytes = table.serialize().unwrap();
        let reparsed = AttributeTable::parse(&bytes).unwrap();
        assert_eq!(reparsed.rows, table.rows);
        assert_eq!(reparsed.deleted, table.deleted);

        // Full cycle is stable: parse(serialize(parse(b))) == parse(b)
        let again = AttributeTable::parse(&reparsed.serialize().unwrap()).unwrap();
        assert_eq!(again.rows, reparsed.rows);
    }

    #[test]
    fn test_record_count_zero_is_empty_not_error() {
        let fields = vec![FieldDescriptor::new("LABEL", FieldKind::Character, 8, 0)];
        let table = AttributeTable::new(fields, vec![]);
        let bytes = table.serialize().unwrap();

        let reparsed = AttributeTable::parse(&bytes).unwrap();
        assert!(reparsed.is_empty());
        assert_eq!(reparsed.fields.len(), 1);
    }

    #[test]
    fn test_unknown_type_tag_is_fatal() {
        let mut bytes = hand_assembled();
        bytes[32 + 11] = b'Q';
        let err = AttributeTable::parse(&bytes).unwrap_err();
        assert!(matches!(err, MatchError::UnknownFieldType { tag: b'Q', .. }));
    }

    #[test]
    fn test_truncated_buffers_error() {
        let bytes = hand_assembled();
        // Mid-header
        assert!(matches!(
            AttributeTable::parse(&bytes[..16]).unwrap_err(),
            MatchError::MalformedTable { .. }
        ));
        // Mid-descriptor
        assert!(matches!(
            AttributeTable::parse(&bytes[..40]).unwrap_err(),
            MatchError::MalformedTable { .. }
        ));
        // Mid-record
        assert!(matches!(
            AttributeTable::parse(&bytes[..bytes.len() - 8]).unwrap_err(),
            MatchError::MalformedTable { .. }
        ));
    }

    #[test]
    fn test_preserved_nonstandard_numeric_tag() {
        let mut bytes = hand_assembled();
        bytes[32 + 32 + 11] = b'F';
        let table = AttributeTable::parse(&bytes).unwrap();
        assert_eq!(table.fields[1].kind, FieldKind::Numeric);

        let out = table.serialize().unwrap();
        assert_eq!(out[32 + 32 + 11], b'F');
    }

    #[test]
    fn test_value_overflow_is_fatal() {
        let fields = vec![FieldDescriptor::new("N", FieldKind::Numeric, 3, 0)];
        let table = AttributeTable::new(fields, vec![row(&[("N", FieldValue::Number(12345.0))])]);
        let err = table.serialize().unwrap_err();
        assert!(matches!(err, MatchError::ValueOverflow { .. }));
    }

    #[test]
    fn test_numeric_garbage_decodes_to_null() {
        let mut bytes = hand_assembled();
        // Overwrite record 0's COUNT bytes with noise
        let count_at = (32 + 2 * 32 + 1) + 1 + 5;
        bytes[count_at..count_at + 4].copy_from_slice(b"abc ");
        let table = AttributeTable::parse(&bytes).unwrap();
        assert_eq!(table.value(0, "COUNT"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_logical_variants() {
        for (byte, expected) in [
            (b'y', FieldValue::Logical(true)),
            (b'T', FieldValue::Logical(true)),
            (b'N', FieldValue::Logical(false)),
            (b'f', FieldValue::Logical(false)),
            (b'?', FieldValue::Null),
            (b' ', FieldValue::Null),
        ] {
            assert_eq!(decode_logical(&[byte]), expected);
        }
    }

    #[test]
    fn test_date_edge_cases() {
        assert_eq!(
            decode_date(b"20230704"),
            FieldValue::Date(NaiveDate::from_ymd_opt(2023, 7, 4).unwrap())
        );
        assert_eq!(decode_date(b"20231350"), FieldValue::Null); // month 13
        assert_eq!(decode_date(b"2023070 "), FieldValue::Null); // short
        assert_eq!(decode_date(b"abcd-ims"), FieldValue::Null); // non-digit
        assert_eq!(decode_date(b"        "), FieldValue::Null);
    }

    #[test]
    fn test_set_value_guards() {
        let mut table = AttributeTable::parse(&hand_assembled()).unwrap();
        table
            .set_value(0, "NAME", FieldValue::Text("Eve".to_string()))
            .unwrap();
        assert_eq!(
            table.value(0, "NAME"),
            Some(&FieldValue::Text("Eve".to_string()))
        );

        assert!(matches!(
            table.set_value(0, "NOPE", FieldValue::Null).unwrap_err(),
            MatchError::MissingField { .. }
        ));
        assert!(matches!(
            table.set_value(9, "NAME", FieldValue::Null).unwrap_err(),
            MatchError::UnknownFeature { .. }
        ));
    }

    #[test]
    fn test_id_string_renders_numbers_canonically() {
        assert_eq!(
            FieldValue::Number(12.0).id_string(),
            Some("12".to_string())
        );
        assert_eq!(
            FieldValue::Number(12.5).id_string(),
            Some("12.5".to_string())
        );
        assert_eq!(
            FieldValue::Text("S1".to_string()).id_string(),
            Some("S1".to_string())
        );
        assert_eq!(FieldValue::Null.id_string(), None);
    }
}
