//! Read-modify-write fidelity of the binary attribute table codec.

use chrono::NaiveDate;
use section_matcher::dbf::ScalarExtractor;
use section_matcher::{AttributeRow, AttributeTable, FieldDescriptor, FieldKind, FieldValue, MatchError};

fn d(y: i32, m: u32, day: u32) -> FieldValue {
    FieldValue::Date(NaiveDate::from_ymd_opt(y, m, day).unwrap())
}

/// A points table the way survey hardware exports it: ids, a sequence
/// counter, readings with decimals, a validity flag, and a log date.
fn survey_table() -> AttributeTable {
    let fields = vec![
        FieldDescriptor::new("Route", FieldKind::Character, 8, 0),
        FieldDescriptor::new("SeqNum", FieldKind::Numeric, 8, 0),
        FieldDescriptor::new("SectionID", FieldKind::Character, 12, 0),
        FieldDescriptor::new("Speed", FieldKind::Numeric, 8, 2),
        FieldDescriptor::new("Valid", FieldKind::Logical, 1, 0),
        FieldDescriptor::new("LogDate", FieldKind::Date, 8, 0),
    ];
    let rows = vec![
        row(&[
            ("Route", FieldValue::Text("R1".to_string())),
            ("SeqNum", FieldValue::Number(1.0)),
            ("SectionID", FieldValue::Null),
            ("Speed", FieldValue::Number(42.25)),
            ("Valid", FieldValue::Logical(true)),
            ("LogDate", d(2024, 3, 15)),
        ]),
        row(&[
            ("Route", FieldValue::Text("R1".to_string())),
            ("SeqNum", FieldValue::Number(2.0)),
            ("SectionID", FieldValue::Text("S1".to_string())),
            ("Speed", FieldValue::Number(-0.5)),
            ("Valid", FieldValue::Logical(false)),
            ("LogDate", FieldValue::Null),
        ]),
        row(&[
            ("Route", FieldValue::Text("R2".to_string())),
            ("SeqNum", FieldValue::Number(3.0)),
            ("SectionID", FieldValue::Null),
            ("Speed", FieldValue::Null),
            ("Valid", FieldValue::Null),
            ("LogDate", d(2023, 12, 31)),
        ]),
    ];
    AttributeTable::new(fields, rows)
}

fn row(pairs: &[(&str, FieldValue)]) -> AttributeRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_typed_round_trip_of_every_field_kind() {
    let table = survey_table();
    let bytes = table.serialize().unwrap();
    let back = AttributeTable::parse(&bytes).unwrap();

    assert_eq!(back.fields, table.fields);
    assert_eq!(back.rows, table.rows);
    assert_eq!(back.deleted, vec![false; 3]);
}

#[test]
fn test_reserialization_is_stable() {
    let first = AttributeTable::parse(&survey_table().serialize().unwrap()).unwrap();
    let second = AttributeTable::parse(&first.serialize().unwrap()).unwrap();
    assert_eq!(second, first);
}

#[test]
fn test_deletion_flags_round_trip() {
    let mut table = survey_table();
    table.deleted[1] = true;

    let back = AttributeTable::parse(&table.serialize().unwrap()).unwrap();
    assert_eq!(back.deleted, vec![false, true, false]);
    // Deleted records keep their values; the flag is the only difference.
    assert_eq!(back.rows[1], table.rows[1]);
}

#[test]
fn test_empty_table_round_trips_without_error() {
    let table = AttributeTable::new(
        vec![FieldDescriptor::new("Route", FieldKind::Character, 8, 0)],
        vec![],
    );
    let back = AttributeTable::parse(&table.serialize().unwrap()).unwrap();
    assert!(back.rows.is_empty());
    assert_eq!(back.fields, table.fields);
}

#[test]
fn test_truncated_inputs_are_rejected() {
    let bytes = survey_table().serialize().unwrap();

    // Mid-header, mid-descriptor, and mid-record cuts.
    for end in [16, 40, bytes.len() - 10] {
        let err = AttributeTable::parse(&bytes[..end]).unwrap_err();
        assert!(
            matches!(err, MatchError::MalformedTable { .. }),
            "cut at {end} gave {err:?}"
        );
    }
}

#[test]
fn test_unknown_type_tag_is_fatal() {
    let mut bytes = survey_table().serialize().unwrap();
    // Type tag of the first descriptor.
    bytes[32 + 11] = b'Q';

    let err = AttributeTable::parse(&bytes).unwrap_err();
    match err {
        MatchError::UnknownFieldType { tag, name } => {
            assert_eq!(tag, b'Q');
            assert_eq!(name, "Route");
        }
        other => panic!("expected UnknownFieldType, got {other:?}"),
    }
}

#[test]
fn test_overflowing_value_refuses_to_serialize() {
    let mut table = survey_table();
    table.rows[0].insert(
        "Route".to_string(),
        FieldValue::Text("far-too-long-for-eight".to_string()),
    );

    let err = table.serialize().unwrap_err();
    assert!(matches!(
        err,
        MatchError::ValueOverflow { width: 8, .. }
    ));
}

#[test]
fn test_scalar_extractor_matches_default_parse() {
    let bytes = survey_table().serialize().unwrap();
    let default = AttributeTable::parse(&bytes).unwrap();
    let scalar = AttributeTable::parse_with(&bytes, &ScalarExtractor).unwrap();
    assert_eq!(scalar, default);
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_extractor_matches_scalar() {
    use section_matcher::dbf::ParallelExtractor;

    // Enough records that rayon actually splits the range.
    let fields = vec![
        FieldDescriptor::new("Id", FieldKind::Numeric, 10, 0),
        FieldDescriptor::new("Reading", FieldKind::Numeric, 12, 3),
    ];
    let rows: Vec<AttributeRow> = (0..500)
        .map(|i| {
            row(&[
                ("Id", FieldValue::Number(f64::from(i))),
                ("Reading", FieldValue::Number(f64::from(i) * 0.125)),
            ])
        })
        .collect();
    let bytes = AttributeTable::new(fields, rows).serialize().unwrap();

    let scalar = AttributeTable::parse_with(&bytes, &ScalarExtractor).unwrap();
    let parallel = AttributeTable::parse_with(&bytes, &ParallelExtractor).unwrap();
    assert_eq!(parallel, scalar);
}
