use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::links::LinkIndex;
use crate::row::{check_raw_row, RawRow};
use crate::schema::{Schema, TableSchema, TableShape};
use crate::table::{GeneratorTable, KeyedTable, RawTable, RowGenerator, RowsTable, Table};
use crate::value::{Key, Value};

/// Raw tables keyed by table name, as produced by a reader.
#[derive(Debug, Clone, Default)]
pub struct RawTicDat {
    tables: IndexMap<String, RawTable>,
}

impl RawTicDat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, raw: RawTable) -> &mut Self {
        self.tables.insert(table.into(), raw);
        self
    }

    pub fn with(mut self, table: impl Into<String>, raw: RawTable) -> Self {
        self.insert(table, raw);
        self
    }

    pub fn get(&self, table: &str) -> Option<&RawTable> {
        self.tables.get(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawTable)> {
        self.tables.iter().map(|(name, raw)| (name.as_str(), raw))
    }
}

/// Check that raw input fits the declared shape of `table`.
pub(crate) fn good_tic_dat_table(table: &TableSchema, raw: &RawTable) -> Result<()> {
    match (table.shape(), raw) {
        (TableShape::Keyed, RawTable::Keyed(rows)) => {
            let expected = table.primary_key_fields().len();
            let mut seen = HashSet::new();
            for (key, row) in rows {
                let arity_ok = match key {
                    Key::Scalar(_) => expected == 1,
                    Key::Tuple(values) => expected > 1 && values.len() == expected,
                };
                if !arity_ok {
                    return Err(Error::structure(
                        table.name(),
                        format!("inconsistent key length: expected {expected}, got key {key}"),
                    ));
                }
                check_raw_row(table, row)?;
                check_unique_key(table, &mut seen, key.clone())?;
            }
            Ok(())
        }
        (TableShape::Keyed, RawTable::Rows(rows)) => {
            let mut seen = HashSet::new();
            for row in rows {
                check_keyed_row(table, row)?;
                check_unique_key(table, &mut seen, raw_row_key(table, row))?;
            }
            Ok(())
        }
        (TableShape::Keyed, RawTable::Generator(_)) => Err(Error::structure(
            table.name(),
            "a table with a primary key cannot be filled from a generator",
        )),
        (_, RawTable::Keyed(_)) => Err(Error::structure(
            table.name(),
            "table has no primary key but rows were supplied by key",
        )),
        (_, RawTable::Rows(rows)) => rows.iter().try_for_each(|row| check_raw_row(table, row)),
        (TableShape::Generator, RawTable::Generator(_)) => Ok(()),
        (TableShape::Sequence, RawTable::Generator(_)) => Err(Error::structure(
            table.name(),
            "table is not a generator table",
        )),
    }
}

/// A keyed-table row that carries its own primary key values.
fn check_keyed_row(table: &TableSchema, row: &RawRow) -> Result<()> {
    let pk = table.primary_key_fields();
    match row {
        RawRow::Values(values) => {
            let expected = pk.len() + table.data_fields().len();
            if values.len() != expected {
                return Err(Error::structure(
                    table.name(),
                    format!(
                        "inconsistent data row length: expected {expected} primary key and data values, got {}",
                        values.len()
                    ),
                ));
            }
        }
        RawRow::Fields(fields) => {
            if let Some(field) = pk.iter().find(|field| !fields.contains_key(*field)) {
                return Err(Error::structure(
                    table.name(),
                    format!("row is missing primary key field: {field}"),
                ));
            }
            if let Some(field) = fields.keys().find(|field| !table.has_field(field)) {
                return Err(Error::structure(
                    table.name(),
                    format!("unrecognized field name: {field}"),
                ));
            }
        }
        RawRow::Scalar(_) => {
            return Err(Error::structure(
                table.name(),
                "a bare value cannot carry a primary key",
            ));
        }
    }
    Ok(())
}

fn check_unique_key(table: &TableSchema, seen: &mut HashSet<Key>, key: Key) -> Result<()> {
    if seen.contains(&key) {
        return Err(Error::structure(
            table.name(),
            format!("duplicate primary key: {key}"),
        ));
    }
    seen.insert(key);
    Ok(())
}

/// Primary key carried by a row that already passed `check_keyed_row`.
fn raw_row_key(table: &TableSchema, row: &RawRow) -> Key {
    let pk = table.primary_key_fields();
    let values: Vec<Value> = match row {
        RawRow::Values(values) => values.iter().take(pk.len()).cloned().collect(),
        RawRow::Fields(fields) => pk
            .iter()
            .map(|field| fields.get(field).cloned().unwrap_or_default())
            .collect(),
        RawRow::Scalar(value) => vec![value.clone()],
    };
    Key::from_values(values)
}

fn split_keyed_row(table: &TableSchema, row: RawRow) -> Result<(Key, RawRow)> {
    check_keyed_row(table, &row)?;
    let pk = table.primary_key_fields();
    match row {
        RawRow::Values(mut values) => {
            let data = values.split_off(pk.len());
            Ok((Key::from_values(values), RawRow::Values(data)))
        }
        RawRow::Fields(mut fields) => {
            let key_values: Vec<Value> = pk
                .iter()
                .map(|field| fields.shift_remove(field).unwrap_or_default())
                .collect();
            Ok((Key::from_values(key_values), RawRow::Fields(fields)))
        }
        RawRow::Scalar(_) => Err(Error::structure(
            table.name(),
            "a bare value cannot carry a primary key",
        )),
    }
}

/// In-memory relational data bound to one schema.
#[derive(Debug, Clone)]
pub struct TicDat {
    schema: Arc<Schema>,
    tables: IndexMap<String, Table>,
    frozen: bool,
}

impl TicDat {
    /// Every table empty.
    pub fn new(schema: Arc<Schema>) -> Self {
        let tables = schema
            .table_schemas()
            .iter()
            .map(|(name, table)| (name.clone(), Table::empty(Arc::clone(table))))
            .collect();
        Self {
            schema,
            tables,
            frozen: false,
        }
    }

    /// Build from raw tables. Every supplied table is checked before any is
    /// built; tables left out start empty.
    pub fn from_raw(schema: Arc<Schema>, raw: RawTicDat) -> Result<Self> {
        for (name, table) in raw.iter() {
            schema.good_tic_dat_table(name, table)?;
        }

        let mut dat = Self::new(schema);
        let mut rows = 0usize;
        for (name, raw_table) in raw.tables {
            let Some(table) = dat.tables.get_mut(&name) else {
                continue;
            };
            match (table, raw_table) {
                (Table::Keyed(table), RawTable::Keyed(entries)) => {
                    rows += entries.len();
                    for (key, row) in entries {
                        table.insert(key, row)?;
                    }
                }
                (Table::Keyed(table), RawTable::Rows(entries)) => {
                    rows += entries.len();
                    for row in entries {
                        let (key, row) = split_keyed_row(table.schema(), row)?;
                        table.insert(key, row)?;
                    }
                }
                (Table::Sequence(table), RawTable::Rows(entries)) => {
                    rows += entries.len();
                    for row in entries {
                        table.push(row)?;
                    }
                }
                (Table::Generator(table), RawTable::Rows(entries)) => {
                    table.replace(RowGenerator::from_rows(entries))?;
                }
                (Table::Generator(table), RawTable::Generator(generator)) => {
                    table.replace(generator)?;
                }
                (table, _) => {
                    return Err(Error::structure(
                        table.name(),
                        "raw data does not match the table shape",
                    ));
                }
            }
        }

        tracing::debug!(event = "tic_dat_built", tables = dat.tables.len(), rows);
        Ok(dat)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::Usage(format!("table not found: {name}")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::Usage(format!("table not found: {name}")))
    }

    pub fn keyed(&self, name: &str) -> Result<&KeyedTable> {
        match self.table(name)? {
            Table::Keyed(table) => Ok(table),
            _ => Err(Error::Usage(format!("table {name} has no primary key"))),
        }
    }

    pub fn keyed_mut(&mut self, name: &str) -> Result<&mut KeyedTable> {
        match self.table_mut(name)? {
            Table::Keyed(table) => Ok(table),
            _ => Err(Error::Usage(format!("table {name} has no primary key"))),
        }
    }

    pub fn sequence(&self, name: &str) -> Result<&RowsTable> {
        match self.table(name)? {
            Table::Sequence(table) => Ok(table),
            _ => Err(Error::Usage(format!("table {name} is not a keyless row table"))),
        }
    }

    pub fn sequence_mut(&mut self, name: &str) -> Result<&mut RowsTable> {
        match self.table_mut(name)? {
            Table::Sequence(table) => Ok(table),
            _ => Err(Error::Usage(format!("table {name} is not a keyless row table"))),
        }
    }

    pub fn generator(&self, name: &str) -> Result<&GeneratorTable> {
        match self.table(name)? {
            Table::Generator(table) => Ok(table),
            _ => Err(Error::Usage(format!("table {name} is not a generator table"))),
        }
    }

    pub fn set_generator(&mut self, name: &str, generator: RowGenerator) -> Result<()> {
        match self.table_mut(name)? {
            Table::Generator(table) => table.replace(generator),
            _ => Err(Error::Usage(format!("table {name} is not a generator table"))),
        }
    }

    /// Make every table and row immutable. Calling it again changes nothing.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        for table in self.tables.values_mut() {
            table.set_frozen(true);
        }
        self.frozen = true;
    }

    pub fn frozen(mut self) -> Self {
        self.freeze();
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Independent copy of all rows, frozen or writable as requested.
    pub fn deep_copy(&self, freeze: bool) -> Self {
        let mut copy = self.clone();
        for table in copy.tables.values_mut() {
            table.set_frozen(freeze);
        }
        copy.frozen = freeze;
        copy
    }

    /// Field-wise equality. Row order only matters for keyed tables' keys
    /// being present, never for keyless tables.
    pub fn data_eq(&self, other: &TicDat) -> Result<bool> {
        if self.tables.len() != other.tables.len() {
            return Ok(false);
        }
        for (name, table) in &self.tables {
            let Some(other_table) = other.tables.get(name) else {
                return Ok(false);
            };
            let same = match (table, other_table) {
                (Table::Keyed(left), Table::Keyed(right)) => {
                    left.len() == right.len()
                        && left
                            .iter()
                            .all(|(key, row)| right.get(key).is_some_and(|other| other == row))
                }
                (Table::Keyed(_), _) | (_, Table::Keyed(_)) => false,
                (left, right) => {
                    let mut left = left.full_tuples()?;
                    let mut right = right.full_tuples()?;
                    left.sort();
                    right.sort();
                    left == right
                }
            };
            if !same {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Raw form of the current data, suitable for `from_raw` or a writer.
    pub fn to_raw(&self) -> RawTicDat {
        let mut raw = RawTicDat::new();
        for (name, table) in &self.tables {
            let table = match table {
                Table::Keyed(table) => RawTable::Keyed(
                    table
                        .iter()
                        .map(|(key, row)| (key.clone(), RawRow::from(row)))
                        .collect(),
                ),
                Table::Sequence(table) => RawTable::Rows(table.iter().map(RawRow::from).collect()),
                Table::Generator(table) => RawTable::Generator(table.generator().clone()),
            };
            raw.insert(name.clone(), table);
        }
        raw
    }

    /// Navigation index over every foreign key between keyed tables.
    pub fn links(&self) -> LinkIndex<'_> {
        LinkIndex::build(self)
    }
}
