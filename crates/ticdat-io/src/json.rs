//! A JSON object mapping table names to arrays of rows.
//!
//! Rows are read either as objects keyed by field name or as arrays of
//! primary key values followed by data values. Rows are always written as
//! objects.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Number};
use ticdat_core::{parse_datetime, DataType, RawRow, RawTable, RawTicDat, Schema, TableSchema, TicDat, Value};

use crate::error::{IoError, Result};
use crate::{header, write_order};

/// Build a dataset from an already parsed JSON document.
pub fn from_value(schema: &Arc<Schema>, document: &serde_json::Value) -> Result<TicDat> {
    let Some(tables) = document.as_object() else {
        return Err(IoError::format("json", "", "document must be an object of tables"));
    };
    if let Some(unknown) = tables.keys().find(|name| schema.table(name).is_none()) {
        return Err(IoError::format("json", unknown, "no such table in the schema"));
    }

    let mut raw = RawTicDat::new();
    for (name, rows) in tables {
        let table = schema.table_schema(name)?;
        let Some(rows) = rows.as_array() else {
            return Err(IoError::format("json", name, "table must be an array of rows"));
        };
        let rows = rows
            .iter()
            .map(|row| read_row(table, row))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(event = "json_table_read", table = %name, rows = rows.len());
        raw.insert(name.clone(), RawTable::Rows(rows));
    }
    Ok(TicDat::from_raw(Arc::clone(schema), raw)?)
}

pub fn read_str(schema: &Arc<Schema>, text: &str) -> Result<TicDat> {
    let document: serde_json::Value = serde_json::from_str(text)?;
    from_value(schema, &document)
}

pub fn read_file(schema: &Arc<Schema>, path: &Path) -> Result<TicDat> {
    let text = fs::read_to_string(path)?;
    read_str(schema, &text)
}

fn read_row(table: &TableSchema, row: &serde_json::Value) -> Result<RawRow> {
    match row {
        serde_json::Value::Object(fields) => {
            let mut pairs = Vec::with_capacity(fields.len());
            for (field, value) in fields {
                pairs.push((field.clone(), read_cell(table, field, value)?));
            }
            Ok(RawRow::fields(pairs))
        }
        serde_json::Value::Array(values) => {
            let fields: Vec<&str> = table.all_fields().collect();
            if values.len() != fields.len() {
                return Err(IoError::format(
                    "json",
                    table.name(),
                    format!("row has {} values, table has {} fields", values.len(), fields.len()),
                ));
            }
            let values = fields
                .iter()
                .zip(values)
                .map(|(field, value)| read_cell(table, field, value))
                .collect::<Result<Vec<_>>>()?;
            Ok(RawRow::Values(values))
        }
        _ => Err(IoError::format(
            "json",
            table.name(),
            "row must be an object or an array",
        )),
    }
}

fn read_cell(table: &TableSchema, field: &str, value: &serde_json::Value) -> Result<Value> {
    let data_type = table.data_type(field);
    Ok(match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(value) => Value::Bool(*value),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(value) => Value::Int(value),
            None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(text) => read_text(text, data_type),
        _ => {
            return Err(IoError::format(
                "json",
                table.name(),
                format!("field {field} holds a nested value"),
            ));
        }
    })
}

fn read_text(text: &str, data_type: Option<&DataType>) -> Value {
    let Some(data_type) = data_type else {
        return Value::Text(text.to_string());
    };
    if data_type.datetime {
        if let Some(value) = parse_datetime(text) {
            return Value::DateTime(value);
        }
    }
    if data_type.number_allowed {
        match text {
            "inf" => return Value::Float(f64::INFINITY),
            "-inf" => return Value::Float(f64::NEG_INFINITY),
            _ => {}
        }
    }
    Value::Text(text.to_string())
}

fn write_cell(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(value) => serde_json::Value::Bool(*value),
        Value::Int(value) => serde_json::Value::Number(Number::from(*value)),
        Value::Float(value) => match Number::from_f64(*value) {
            Some(number) => serde_json::Value::Number(number),
            None if value.is_infinite() && *value > 0.0 => "inf".into(),
            None if value.is_infinite() => "-inf".into(),
            None => serde_json::Value::Null,
        },
        Value::Text(value) => serde_json::Value::String(value.clone()),
        Value::DateTime(value) => value.format("%Y-%m-%dT%H:%M:%S").to_string().into(),
    }
}

/// Render a dataset as a JSON document, parents before children.
pub fn to_value(dat: &TicDat) -> Result<serde_json::Value> {
    let mut document = Map::new();
    for table in write_order(dat.schema()) {
        let fields = header(dat, &table)?;
        let rows: Vec<serde_json::Value> = dat
            .table(&table)?
            .full_tuples()?
            .iter()
            .map(|tuple| {
                let row: Map<String, serde_json::Value> = fields
                    .iter()
                    .cloned()
                    .zip(tuple.iter().map(write_cell))
                    .collect();
                serde_json::Value::Object(row)
            })
            .collect();
        document.insert(table, serde_json::Value::Array(rows));
    }
    Ok(serde_json::Value::Object(document))
}

pub fn write_file(dat: &TicDat, path: &Path) -> Result<()> {
    let document = to_value(dat)?;
    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    tracing::info!(event = "json_written", path = %path.display(), tables = dat.table_names().count());
    Ok(())
}
