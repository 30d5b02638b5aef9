//! One `<table>.csv` file per table, header row first.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ticdat_core::{RawRow, RawTable, RawTicDat, Schema, TableSchema, TicDat};

use crate::cell::{format_cell, parse_cell};
use crate::error::{IoError, Result};
use crate::{header, write_order};

fn table_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.csv"))
}

/// Read every table of `schema` from `dir`. A missing file is an empty table.
pub fn read_directory(schema: &Arc<Schema>, dir: &Path) -> Result<TicDat> {
    let mut raw = RawTicDat::new();
    for table in schema.table_names() {
        let path = table_path(dir, table);
        if !path.exists() {
            tracing::debug!(event = "csv_table_missing", table, path = %path.display());
            continue;
        }
        let rows = read_table(schema.table_schema(table)?, &path)?;
        tracing::debug!(event = "csv_table_read", table, rows = rows.len());
        raw.insert(table, RawTable::Rows(rows));
    }
    Ok(TicDat::from_raw(Arc::clone(schema), raw)?)
}

fn read_table(table: &TableSchema, path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    if let Some(unknown) = columns.iter().find(|name| !table.has_field(name)) {
        return Err(IoError::format(
            "csv",
            table.name(),
            format!("unrecognized column: {unknown}"),
        ));
    }
    if let Some(missing) = table
        .primary_key_fields()
        .iter()
        .find(|field| !columns.contains(field))
    {
        return Err(IoError::format(
            "csv",
            table.name(),
            format!("missing primary key column: {missing}"),
        ));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != columns.len() {
            return Err(IoError::format(
                "csv",
                table.name(),
                format!(
                    "record has {} cells, header has {}",
                    record.len(),
                    columns.len()
                ),
            ));
        }
        rows.push(RawRow::fields(columns.iter().zip(record.iter()).map(
            |(column, text)| (column.clone(), parse_cell(text, table.data_type(column))),
        )));
    }
    Ok(rows)
}

/// Write every table of `dat` into `dir`, creating it if needed.
pub fn write_directory(dat: &TicDat, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for table in write_order(dat.schema()) {
        let rows = write_table(dat, &table, &table_path(dir, &table))?;
        tracing::info!(event = "csv_table_written", table = %table, rows);
    }
    Ok(())
}

fn write_table(dat: &TicDat, table: &str, path: &Path) -> Result<usize> {
    let file = BufWriter::new(File::create(path)?);
    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    writer.write_record(header(dat, table)?)?;
    let tuples = dat.table(table)?.full_tuples()?;
    for tuple in &tuples {
        let record: Vec<String> = tuple.iter().map(format_cell).collect();
        writer.write_record(&record)?;
    }

    writer.flush()?;
    let mut file = writer.into_inner().map_err(|err| err.into_error())?;
    file.flush()?;
    Ok(tuples.len())
}

