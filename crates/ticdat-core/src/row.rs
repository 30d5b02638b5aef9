use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::value::{Key, Value};

/// Fixed-shape record holding one value per data field of its table.
#[derive(Clone)]
pub struct Row {
    table: Arc<TableSchema>,
    values: Vec<Value>,
}

impl Row {
    /// A row with every data field set to its default.
    pub(crate) fn with_defaults(table: Arc<TableSchema>) -> Self {
        let values = table
            .data_fields()
            .iter()
            .map(|field| table.default_value(field))
            .collect();
        Self { table, values }
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub fn fields(&self) -> &[String] {
        self.table.data_fields()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.table
            .data_field_index(field)
            .map(|idx| &self.values[idx])
    }

    /// Overwrite one data field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.table.data_field_index(field).ok_or_else(|| {
            Error::structure(self.table.name(), format!("unrecognized field name: {field}"))
        })?;
        self.values[idx] = value.into();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.table
            .data_fields()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.table.name() == other.table.name() && self.values == other.values
    }
}

impl Eq for Row {}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, field: &str) -> &Value {
        match self.get(field) {
            Some(value) => value,
            None => panic!("no data field {field} on table {}", self.table.name()),
        }
    }
}

/// Raw row as handed over by a reader.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    /// Field name to value; omitted data fields take their default.
    Fields(IndexMap<String, Value>),
    /// Positional values.
    Values(Vec<Value>),
    /// A bare value for a table with exactly one data field.
    Scalar(Value),
}

impl RawRow {
    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        RawRow::Fields(
            pairs
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        )
    }

    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        RawRow::Values(values.into_iter().map(Into::into).collect())
    }

    pub fn empty() -> Self {
        RawRow::Fields(IndexMap::new())
    }
}

impl From<Value> for RawRow {
    fn from(value: Value) -> Self {
        RawRow::Scalar(value)
    }
}

impl From<Vec<Value>> for RawRow {
    fn from(values: Vec<Value>) -> Self {
        RawRow::Values(values)
    }
}

impl From<IndexMap<String, Value>> for RawRow {
    fn from(fields: IndexMap<String, Value>) -> Self {
        RawRow::Fields(fields)
    }
}

impl From<&Row> for RawRow {
    fn from(row: &Row) -> Self {
        RawRow::Values(row.values.clone())
    }
}

impl From<Row> for RawRow {
    fn from(row: Row) -> Self {
        RawRow::Values(row.values)
    }
}

/// Check a raw row against the data fields of `table` without building it.
pub(crate) fn check_raw_row(table: &TableSchema, raw: &RawRow) -> Result<()> {
    let data_fields = table.data_fields();
    match raw {
        RawRow::Fields(fields) => {
            if let Some(field) = fields.keys().find(|field| !table.is_data_field(field)) {
                return Err(Error::structure(
                    table.name(),
                    format!("unrecognized field name: {field}"),
                ));
            }
        }
        RawRow::Values(values) => {
            if values.len() != data_fields.len() {
                return Err(Error::structure(
                    table.name(),
                    format!(
                        "inconsistent data row length: expected {}, got {}",
                        data_fields.len(),
                        values.len()
                    ),
                ));
            }
        }
        RawRow::Scalar(_) => {
            if data_fields.len() != 1 {
                return Err(Error::structure(
                    table.name(),
                    format!(
                        "a bare value needs exactly one data field, table has {}",
                        data_fields.len()
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Turn a raw row into a canonical row of `table`.
pub(crate) fn build_row(table: &Arc<TableSchema>, raw: RawRow) -> Result<Row> {
    check_raw_row(table, &raw)?;
    let row = match raw {
        RawRow::Fields(mut fields) => {
            let values = table
                .data_fields()
                .iter()
                .map(|field| {
                    fields
                        .swap_remove(field)
                        .unwrap_or_else(|| table.default_value(field))
                })
                .collect();
            Row {
                table: Arc::clone(table),
                values,
            }
        }
        RawRow::Values(values) => Row {
            table: Arc::clone(table),
            values,
        },
        RawRow::Scalar(value) => Row {
            table: Arc::clone(table),
            values: vec![value],
        },
    };
    Ok(row)
}

/// Primary key and data of one row seen together, as handed to row predicates.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    key: Option<&'a Key>,
    row: &'a Row,
}

impl<'a> RowView<'a> {
    pub(crate) fn new(key: Option<&'a Key>, row: &'a Row) -> Self {
        Self { key, row }
    }

    pub fn key(&self) -> Option<&'a Key> {
        self.key
    }

    pub fn row(&self) -> &'a Row {
        self.row
    }

    /// Look up a primary key or data field.
    pub fn get(&self, field: &str) -> Option<&'a Value> {
        if let (Some(key), Some(idx)) = (self.key, self.row.table.primary_key_index(field)) {
            return key.values().get(idx);
        }
        self.row.get(field)
    }

    /// Numeric value of a field, if it holds a number.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    fn foods() -> Arc<TableSchema> {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("foods", &["name"], &["cost", "label"])
            .unwrap()
            .set_default_value("foods", "label", "plain")
            .unwrap();
        let schema = builder.build().unwrap();
        schema.shared_table("foods").unwrap()
    }

    #[test]
    fn missing_fields_take_defaults() {
        let row = build_row(&foods(), RawRow::fields([("cost", 2.5)])).unwrap();
        assert_eq!(row["cost"], Value::Float(2.5));
        assert_eq!(row["label"], Value::from("plain"));
    }

    #[test]
    fn unset_default_is_zero() {
        let row = build_row(&foods(), RawRow::empty()).unwrap();
        assert_eq!(row["cost"], Value::Int(0));
    }

    #[test]
    fn structural_defects_are_named() {
        let table = foods();
        let err = build_row(&table, RawRow::fields([("price", 1)])).unwrap_err();
        assert!(err.to_string().contains("unrecognized field name: price"));

        let err = build_row(&table, RawRow::values([1])).unwrap_err();
        assert!(err.to_string().contains("inconsistent data row length"));

        let err = build_row(&table, RawRow::Scalar(Value::Int(1))).unwrap_err();
        assert!(err.to_string().contains("exactly one data field"));
    }

    #[test]
    fn set_rejects_unknown_field() {
        let mut row = build_row(&foods(), RawRow::empty()).unwrap();
        row.set("cost", 4).unwrap();
        assert_eq!(row.get("cost"), Some(&Value::Int(4)));
        assert!(row.set("name", "x").is_err());
    }

    #[test]
    fn view_reads_key_fields() {
        let row = build_row(&foods(), RawRow::values([Value::Int(3), Value::from("x")])).unwrap();
        let key = Key::from("pizza");
        let view = RowView::new(Some(&key), &row);
        assert_eq!(view.get("name"), Some(&Value::from("pizza")));
        assert_eq!(view.number("cost"), Some(3.0));
        assert_eq!(view.get("missing"), None);
    }
}
