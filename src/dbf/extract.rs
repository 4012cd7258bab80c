//! Pluggable bulk decoding of a table's numeric columns.
//!
//! Parsing fixed-width ASCII numbers dominates load time on survey-sized
//! tables, so the codec hands that inner loop to a [`NumericExtractor`].
//! [`ScalarExtractor`] is the reference implementation; with the `parallel`
//! feature, [`ParallelExtractor`] fans records out across a rayon pool and
//! returns bit-identical output.

use super::{FieldDescriptor, FieldKind};

/// Byte geometry of the numeric columns, precomputed once per parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericLayout {
    /// Offset of the first record's value region (deletion flag skipped).
    pub first_record: usize,
    /// Stride between consecutive records, including the deletion flag.
    pub record_len: usize,
    pub record_count: usize,
    /// Half-open `(start, end)` byte ranges of each numeric field, relative
    /// to a record's value region, in field order.
    pub ranges: Vec<(usize, usize)>,
}

impl NumericLayout {
    pub fn from_fields(
        first_record: usize,
        record_len: usize,
        record_count: usize,
        fields: &[FieldDescriptor],
    ) -> Self {
        let mut ranges = Vec::new();
        let mut at = 0;
        for field in fields {
            let width = field.length as usize;
            if field.kind == FieldKind::Numeric {
                ranges.push((at, at + width));
            }
            at += width;
        }
        NumericLayout {
            first_record,
            record_len,
            record_count,
            ranges,
        }
    }

    /// Total values an extractor must produce.
    pub fn value_count(&self) -> usize {
        self.record_count * self.ranges.len()
    }
}

/// Decodes every numeric cell of a table in one pass.
///
/// Output is record-major: all of record 0's numeric fields in field order,
/// then record 1's, and so on. Cells that do not parse become `NaN`, which
/// the caller maps to null. Callers must ensure every range of every record
/// lies within `buf`.
pub trait NumericExtractor {
    fn extract(&self, buf: &[u8], layout: &NumericLayout) -> Vec<f64>;
}

/// Straight-line single-threaded extractor.
pub struct ScalarExtractor;

impl NumericExtractor for ScalarExtractor {
    fn extract(&self, buf: &[u8], layout: &NumericLayout) -> Vec<f64> {
        let mut out = Vec::with_capacity(layout.value_count());
        for r in 0..layout.record_count {
            let base = layout.first_record + r * layout.record_len;
            for &(start, end) in &layout.ranges {
                out.push(parse_numeric(&buf[base + start..base + end]));
            }
        }
        out
    }
}

/// Record-parallel extractor backed by rayon's thread pool.
#[cfg(feature = "parallel")]
pub struct ParallelExtractor;

#[cfg(feature = "parallel")]
impl NumericExtractor for ParallelExtractor {
    fn extract(&self, buf: &[u8], layout: &NumericLayout) -> Vec<f64> {
        use rayon::prelude::*;

        (0..layout.record_count)
            .into_par_iter()
            .flat_map_iter(|r| {
                let base = layout.first_record + r * layout.record_len;
                layout
                    .ranges
                    .iter()
                    .map(move |&(start, end)| parse_numeric(&buf[base + start..base + end]))
            })
            .collect()
    }
}

pub(crate) fn parse_numeric(raw: &[u8]) -> f64 {
    let text = String::from_utf8_lossy(raw);
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}
