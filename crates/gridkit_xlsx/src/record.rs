//! Record schema extraction.
//!
//! A section's data is any [`RecordSet`]: an ordered collection that can
//! describe its fields and hand out one value per `(row, field)`. Adapters
//! cover typed records ([`RecordSchema`]), plain row tables, polars
//! DataFrames and JSON arrays of objects.

use std::fmt;
use std::io::Cursor;

use polars::prelude::{AnyValue, DataFrame, IpcReader, SerReader};
use serde_json::Value as JsonValue;

use crate::error::{GridkitError, Result};
use crate::spec::EnumCellValue;

////////////////////////////////////////////////////////////////////////////////
// #region FieldTags

/// One field as reported by a record: identifier plus optional tag string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecRecordField {
    pub field_id: String,
    /// `key:value` pairs (`header`, `width`, `format`, `hidden`) or `-`.
    pub tag: Option<String>,
}

impl SpecRecordField {
    pub fn new(field_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            tag: None,
        }
    }

    pub fn tagged(field_id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            tag: Some(tag.into()),
        }
    }
}

/// Parsed field tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecFieldTag {
    /// Tag was `-`: drop the field entirely.
    pub if_excluded: bool,
    pub header: Option<String>,
    pub width: Option<f64>,
    pub format: Option<String>,
    pub if_hidden: bool,
}

/// Parse a field tag such as `"header:Unit Price,width:12,format:0.00"`.
///
/// Values run up to the next comma; the `format` key takes the remainder of
/// the tag so that number formats may contain commas (`#,##0.00`).
pub fn parse_field_tag(tag: &str) -> Result<SpecFieldTag> {
    let c_tag = tag.trim();
    let mut spec = SpecFieldTag::default();
    if c_tag.is_empty() {
        return Ok(spec);
    }
    if c_tag == "-" {
        spec.if_excluded = true;
        return Ok(spec);
    }

    let mut c_rest = c_tag;
    while !c_rest.is_empty() {
        let Some((c_key, c_after_key)) = c_rest.split_once(':') else {
            return Err(GridkitError::SchemaValidation(format!(
                "Malformed field tag {tag:?}: expected key:value, got {c_rest:?}"
            )));
        };
        let c_key = c_key.trim();
        let (c_value, c_next) = if c_key == "format" {
            (c_after_key, "")
        } else {
            c_after_key.split_once(',').unwrap_or((c_after_key, ""))
        };
        let c_value = c_value.trim();

        match c_key {
            "header" => spec.header = Some(c_value.to_string()),
            "width" => {
                let n_width = c_value.parse::<f64>().map_err(|_| {
                    GridkitError::SchemaValidation(format!(
                        "Malformed field tag {tag:?}: width {c_value:?} is not a number"
                    ))
                })?;
                spec.width = Some(n_width);
            }
            "format" => spec.format = Some(c_value.to_string()),
            "hidden" => {
                spec.if_hidden = c_value.parse::<bool>().map_err(|_| {
                    GridkitError::SchemaValidation(format!(
                        "Malformed field tag {tag:?}: hidden {c_value:?} is not true/false"
                    ))
                })?;
            }
            _ => {
                return Err(GridkitError::SchemaValidation(format!(
                    "Malformed field tag {tag:?}: unknown key {c_key:?}"
                )));
            }
        }
        c_rest = c_next.trim_start();
    }

    Ok(spec)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Traits

/// Ordered collection of records rendered as one section.
pub trait RecordSet: fmt::Debug {
    /// Ordered field descriptors.
    fn fields(&self) -> Result<Vec<SpecRecordField>>;

    /// Number of records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of `field_id` in record `row_idx`; unknown fields yield `None`.
    fn value(&self, row_idx: usize, field_id: &str) -> Result<EnumCellValue>;
}

/// A typed record that describes its own fields.
///
/// This is the explicit replacement for runtime field discovery: implement it
/// once per record type.
pub trait RecordSchema {
    fn fields(&self) -> Vec<SpecRecordField>;
    fn value(&self, field_id: &str) -> EnumCellValue;
}

/// Typed records: the schema comes from the first record.
impl<T: RecordSchema + fmt::Debug> RecordSet for Vec<T> {
    fn fields(&self) -> Result<Vec<SpecRecordField>> {
        Ok(self.first().map(RecordSchema::fields).unwrap_or_default())
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn value(&self, row_idx: usize, field_id: &str) -> Result<EnumCellValue> {
        Ok(self
            .get(row_idx)
            .map_or(EnumCellValue::None, |record| record.value(field_id)))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowTable

/// Column names plus row-major values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowTable {
    pub columns: Vec<SpecRecordField>,
    pub rows: Vec<Vec<EnumCellValue>>,
}

impl RowTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(SpecRecordField::new).collect(),
            rows: Vec::new(),
        }
    }

    /// Build from explicit field descriptors (tags included).
    pub fn with_fields(columns: Vec<SpecRecordField>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_row<V: Into<EnumCellValue>>(mut self, row: impl IntoIterator<Item = V>) -> Self {
        self.rows.push(row.into_iter().map(Into::into).collect());
        self
    }
}

impl RecordSet for RowTable {
    fn fields(&self) -> Result<Vec<SpecRecordField>> {
        Ok(self.columns.clone())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn value(&self, row_idx: usize, field_id: &str) -> Result<EnumCellValue> {
        let Some(n_idx_col) = self.columns.iter().position(|c| c.field_id == field_id) else {
            return Ok(EnumCellValue::None);
        };
        Ok(self
            .rows
            .get(row_idx)
            .and_then(|row| row.get(n_idx_col))
            .cloned()
            .unwrap_or(EnumCellValue::None))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DataFrameAdapter

/// Read a polars DataFrame from IPC bytes.
pub fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame> {
    IpcReader::new(Cursor::new(v_ipc_df))
        .finish()
        .map_err(|err| {
            GridkitError::UnsupportedDataShape(format!("Failed to read IPC DataFrame bytes: {err}"))
        })
}

impl RecordSet for DataFrame {
    fn fields(&self) -> Result<Vec<SpecRecordField>> {
        let mut l_fields = Vec::with_capacity(self.width());
        for col in self.get_columns() {
            if col.dtype().is_nested() {
                return Err(GridkitError::UnsupportedDataShape(format!(
                    "Column {:?} has nested dtype {} and cannot be rendered as cells.",
                    col.name().as_str(),
                    col.dtype()
                )));
            }
            l_fields.push(SpecRecordField::new(col.name().as_str()));
        }
        Ok(l_fields)
    }

    fn len(&self) -> usize {
        self.height()
    }

    fn value(&self, row_idx: usize, field_id: &str) -> Result<EnumCellValue> {
        let Ok(col) = self.column(field_id) else {
            return Ok(EnumCellValue::None);
        };
        let value = col.get(row_idx).map_err(|err| {
            GridkitError::UnsupportedDataShape(format!("Failed to access cell value: {err}"))
        })?;
        Ok(derive_cell_value_from_any_value(value))
    }
}

fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Bool(val),
        AnyValue::UInt8(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt16(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt32(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int8(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int16(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int128(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float64(val) => EnumCellValue::Number(val),
        _ => EnumCellValue::String(value.to_string()),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region JsonAdapter

/// JSON array of objects; fields come from the first object's keys.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecords {
    l_records: Vec<serde_json::Map<String, JsonValue>>,
}

impl JsonRecords {
    /// Fails unless `value` is an array whose elements are all objects.
    pub fn new(value: JsonValue) -> Result<Self> {
        let JsonValue::Array(l_items) = value else {
            return Err(GridkitError::UnsupportedDataShape(format!(
                "Expected a JSON array of records, got {}",
                derive_json_kind(&value)
            )));
        };

        let mut l_records = Vec::with_capacity(l_items.len());
        for (n_idx, item) in l_items.into_iter().enumerate() {
            let JsonValue::Object(map) = item else {
                return Err(GridkitError::UnsupportedDataShape(format!(
                    "Record {n_idx} is {}, expected an object",
                    derive_json_kind(&item)
                )));
            };
            l_records.push(map);
        }
        Ok(Self { l_records })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(text).map_err(|err| {
            GridkitError::UnsupportedDataShape(format!("Invalid JSON records: {err}"))
        })?;
        Self::new(value)
    }
}

fn derive_json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn derive_cell_value_from_json(value: &JsonValue) -> EnumCellValue {
    match value {
        JsonValue::Null => EnumCellValue::None,
        JsonValue::Bool(val) => EnumCellValue::Bool(*val),
        JsonValue::Number(val) => val
            .as_f64()
            .map_or_else(|| EnumCellValue::String(val.to_string()), EnumCellValue::Number),
        JsonValue::String(val) => EnumCellValue::String(val.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => EnumCellValue::String(value.to_string()),
    }
}

impl RecordSet for JsonRecords {
    fn fields(&self) -> Result<Vec<SpecRecordField>> {
        Ok(self
            .l_records
            .first()
            .map(|record| record.keys().map(SpecRecordField::new).collect())
            .unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.l_records.len()
    }

    fn value(&self, row_idx: usize, field_id: &str) -> Result<EnumCellValue> {
        Ok(self
            .l_records
            .get(row_idx)
            .and_then(|record| record.get(field_id))
            .map_or(EnumCellValue::None, derive_cell_value_from_json))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::{Column, NamedFrom, Series};

    #[derive(Debug)]
    struct Order {
        sku: &'static str,
        qty: i64,
        note: Option<&'static str>,
    }

    impl RecordSchema for Order {
        fn fields(&self) -> Vec<SpecRecordField> {
            vec![
                SpecRecordField::tagged("sku", "header:SKU,width:12"),
                SpecRecordField::new("qty"),
                SpecRecordField::tagged("note", "-"),
            ]
        }

        fn value(&self, field_id: &str) -> EnumCellValue {
            match field_id {
                "sku" => self.sku.into(),
                "qty" => self.qty.into(),
                "note" => self.note.into(),
                _ => EnumCellValue::None,
            }
        }
    }

    #[test]
    fn test_parse_field_tag_pairs() {
        let tag = parse_field_tag("header:Unit Price, width:12.5, hidden:true").unwrap();
        assert_eq!(tag.header.as_deref(), Some("Unit Price"));
        assert_eq!(tag.width, Some(12.5));
        assert!(tag.if_hidden);
        assert!(!tag.if_excluded);
    }

    #[test]
    fn test_parse_field_tag_format_keeps_commas() {
        let tag = parse_field_tag("width:10,format:#,##0.00").unwrap();
        assert_eq!(tag.width, Some(10.0));
        assert_eq!(tag.format.as_deref(), Some("#,##0.00"));
    }

    #[test]
    fn test_parse_field_tag_dash_and_errors() {
        assert!(parse_field_tag("-").unwrap().if_excluded);
        assert_eq!(parse_field_tag("").unwrap(), SpecFieldTag::default());
        assert!(parse_field_tag("width:wide").is_err());
        assert!(parse_field_tag("colour:red").is_err());
        assert!(parse_field_tag("header").is_err());
    }

    #[test]
    fn test_typed_records_take_schema_from_first_record() {
        let data = vec![
            Order {
                sku: "A-1",
                qty: 3,
                note: None,
            },
            Order {
                sku: "B-2",
                qty: 5,
                note: Some("rush"),
            },
        ];
        let fields = RecordSet::fields(&data).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(RecordSet::len(&data), 2);
        assert_eq!(
            RecordSet::value(&data, 1, "qty").unwrap(),
            EnumCellValue::Number(5.0)
        );
        assert_eq!(
            RecordSet::value(&data, 7, "qty").unwrap(),
            EnumCellValue::None
        );

        let empty: Vec<Order> = Vec::new();
        assert!(RecordSet::fields(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_row_table_short_rows_yield_none() {
        let table = RowTable::new(["a", "b"])
            .with_row([EnumCellValue::from(1_i64)])
            .with_row([EnumCellValue::from("x"), EnumCellValue::from(true)]);
        assert_eq!(table.value(0, "b").unwrap(), EnumCellValue::None);
        assert_eq!(table.value(1, "b").unwrap(), EnumCellValue::Bool(true));
        assert_eq!(table.value(1, "zz").unwrap(), EnumCellValue::None);
    }

    #[test]
    fn test_dataframe_adapter() {
        let df = DataFrame::new(vec![
            Column::from(Series::new("name".into(), &["x", "y"])),
            Column::from(Series::new("score".into(), &[1.5_f64, 2.0])),
        ])
        .unwrap();

        let fields = RecordSet::fields(&df).unwrap();
        assert_eq!(
            fields,
            vec![SpecRecordField::new("name"), SpecRecordField::new("score")]
        );
        assert_eq!(RecordSet::len(&df), 2);
        assert_eq!(
            RecordSet::value(&df, 1, "score").unwrap(),
            EnumCellValue::Number(2.0)
        );
        assert_eq!(
            RecordSet::value(&df, 0, "name").unwrap(),
            EnumCellValue::from("x")
        );
        assert_eq!(
            RecordSet::value(&df, 0, "missing").unwrap(),
            EnumCellValue::None
        );
    }

    #[test]
    fn test_json_records_adapter() {
        let data = JsonRecords::from_json_str(
            r#"[{"id": 1, "name": "a", "tags": ["x"]}, {"id": 2, "name": null}]"#,
        )
        .unwrap();
        let fields: Vec<String> = data
            .fields()
            .unwrap()
            .into_iter()
            .map(|f| f.field_id)
            .collect();
        assert_eq!(fields, vec!["id", "name", "tags"]);
        assert_eq!(data.value(1, "name").unwrap(), EnumCellValue::None);
        assert_eq!(
            data.value(0, "tags").unwrap(),
            EnumCellValue::from("[\"x\"]")
        );
    }

    #[test]
    fn test_json_records_reject_non_sequences() {
        let err = JsonRecords::from_json_str(r#"{"id": 1}"#).unwrap_err();
        assert!(matches!(err, GridkitError::UnsupportedDataShape(_)));
        let err = JsonRecords::from_json_str("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("Record 0"));
    }
}
