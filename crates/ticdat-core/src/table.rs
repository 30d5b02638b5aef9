use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::{build_row, RawRow, Row};
use crate::schema::{TableSchema, TableShape};
use crate::value::{Key, Value};

type ProducerFn = dyn Fn() -> Box<dyn Iterator<Item = RawRow>> + Send + Sync;

/// Restartable producer: every call yields a fresh, finite run of raw rows.
#[derive(Clone)]
pub struct RowGenerator(Arc<ProducerFn>);

impl RowGenerator {
    pub fn new<F, I>(producer: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = RawRow>,
        I::IntoIter: 'static,
    {
        RowGenerator(Arc::new(move || {
            Box::new(producer().into_iter()) as Box<dyn Iterator<Item = RawRow>>
        }))
    }

    /// Replays a fixed list of rows.
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        let rows = Arc::new(rows);
        Self::new(move || {
            let rows = Arc::clone(&rows);
            (0..rows.len()).map(move |idx| rows[idx].clone())
        })
    }

    pub fn empty() -> Self {
        Self::new(Vec::<RawRow>::new)
    }

    fn run(&self) -> Box<dyn Iterator<Item = RawRow>> {
        (self.0)()
    }
}

impl fmt::Debug for RowGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowGenerator")
    }
}

/// Raw content of one table as handed over by a reader.
#[derive(Debug, Clone)]
pub enum RawTable {
    /// Primary key to row; keyed tables only.
    Keyed(Vec<(Key, RawRow)>),
    /// Rows without separate keys. Keyed tables expect each row to carry its
    /// primary key fields (positionally before the data fields, or by name).
    Rows(Vec<RawRow>),
    /// Lazy rows; generator tables only.
    Generator(RowGenerator),
}

/// Location of a row inside its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRef {
    Key(Key),
    Index(usize),
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRef::Key(key) => write!(f, "{key}"),
            RowRef::Index(idx) => write!(f, "#{idx}"),
        }
    }
}

/// Borrowed form of [`RowRef`] used while scanning.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RowAt<'a> {
    Key(&'a Key),
    Index(usize),
}

impl RowAt<'_> {
    pub(crate) fn key(&self) -> Option<&Key> {
        match self {
            RowAt::Key(key) => Some(key),
            RowAt::Index(_) => None,
        }
    }

    pub(crate) fn to_ref(self) -> RowRef {
        match self {
            RowAt::Key(key) => RowRef::Key(key.clone()),
            RowAt::Index(idx) => RowRef::Index(idx),
        }
    }
}

fn frozen_error(table: &TableSchema) -> Error {
    Error::Frozen(table.name().to_string())
}

/// Rows of a table with a primary key, in insertion order.
#[derive(Debug, Clone)]
pub struct KeyedTable {
    schema: Arc<TableSchema>,
    rows: IndexMap<Key, Row>,
    frozen: bool,
}

impl KeyedTable {
    pub(crate) fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            rows: IndexMap::new(),
            frozen: false,
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Reject keys whose shape disagrees with the primary key.
    pub fn check_key(&self, key: &Key) -> Result<()> {
        let expected = self.schema.primary_key_fields().len();
        let ok = match key {
            Key::Scalar(_) => expected == 1,
            Key::Tuple(values) => expected > 1 && values.len() == expected,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::structure(
                self.name(),
                format!(
                    "inconsistent key length: expected {expected} primary key value(s), got {key}"
                ),
            ))
        }
    }

    /// Insert or replace the row at `key`. Returns the replaced row.
    pub fn insert(&mut self, key: impl Into<Key>, raw: impl Into<RawRow>) -> Result<Option<Row>> {
        if self.frozen {
            return Err(frozen_error(&self.schema));
        }
        let key = key.into();
        self.check_key(&key)?;
        let row = build_row(&self.schema, raw.into())?;
        Ok(self.rows.insert(key, row))
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&Row> {
        self.rows.get(&key.into())
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.rows.contains_key(key)
    }

    /// The stored row, or a detached default row when `key` is absent.
    /// A frozen table has no defaults to hand out: a missing key is an error.
    pub fn get_or_default(&self, key: impl Into<Key>) -> Result<Cow<'_, Row>> {
        let key = key.into();
        self.check_key(&key)?;
        match self.rows.get(&key) {
            Some(row) => Ok(Cow::Borrowed(row)),
            None if self.frozen => Err(Error::Usage(format!(
                "key {key} not found in frozen table {}",
                self.name()
            ))),
            None => Ok(Cow::Owned(Row::with_defaults(Arc::clone(&self.schema)))),
        }
    }

    /// The stored row, inserting a default row first when `key` is absent.
    pub fn entry_or_default(&mut self, key: impl Into<Key>) -> Result<&mut Row> {
        if self.frozen {
            return Err(frozen_error(&self.schema));
        }
        let key = key.into();
        self.check_key(&key)?;
        let schema = Arc::clone(&self.schema);
        Ok(self
            .rows
            .entry(key)
            .or_insert_with(|| Row::with_defaults(schema)))
    }

    pub fn get_mut(&mut self, key: impl Into<Key>) -> Result<Option<&mut Row>> {
        if self.frozen {
            return Err(frozen_error(&self.schema));
        }
        Ok(self.rows.get_mut(&key.into()))
    }

    /// Remove the row at `key`, keeping the order of the others.
    pub fn remove(&mut self, key: impl Into<Key>) -> Result<Option<Row>> {
        if self.frozen {
            return Err(frozen_error(&self.schema));
        }
        Ok(self.rows.shift_remove(&key.into()))
    }

    pub fn retain<F>(&mut self, mut keep: F) -> Result<()>
    where
        F: FnMut(&Key, &Row) -> bool,
    {
        if self.frozen {
            return Err(frozen_error(&self.schema));
        }
        self.rows.retain(|key, row| keep(key, row));
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Row)> {
        self.rows.iter()
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }
}

/// Keyless rows held in order.
#[derive(Debug, Clone)]
pub struct RowsTable {
    schema: Arc<TableSchema>,
    rows: Vec<Row>,
    frozen: bool,
}

impl RowsTable {
    pub(crate) fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            frozen: false,
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn writable(&self) -> Result<()> {
        if self.frozen {
            Err(frozen_error(&self.schema))
        } else {
            Ok(())
        }
    }

    fn out_of_range(&self, idx: usize) -> Error {
        Error::Usage(format!(
            "row index {idx} out of range for table {} with {} rows",
            self.name(),
            self.rows.len()
        ))
    }

    pub fn push(&mut self, raw: impl Into<RawRow>) -> Result<()> {
        self.writable()?;
        let row = build_row(&self.schema, raw.into())?;
        self.rows.push(row);
        Ok(())
    }

    pub fn insert(&mut self, idx: usize, raw: impl Into<RawRow>) -> Result<()> {
        self.writable()?;
        if idx > self.rows.len() {
            return Err(self.out_of_range(idx));
        }
        let row = build_row(&self.schema, raw.into())?;
        self.rows.insert(idx, row);
        Ok(())
    }

    /// Replace the row at `idx`, returning the old one.
    pub fn set(&mut self, idx: usize, raw: impl Into<RawRow>) -> Result<Row> {
        self.writable()?;
        if idx >= self.rows.len() {
            return Err(self.out_of_range(idx));
        }
        let row = build_row(&self.schema, raw.into())?;
        Ok(std::mem::replace(&mut self.rows[idx], row))
    }

    pub fn remove(&mut self, idx: usize) -> Result<Row> {
        self.writable()?;
        if idx >= self.rows.len() {
            return Err(self.out_of_range(idx));
        }
        Ok(self.rows.remove(idx))
    }

    pub fn get(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Result<Option<&mut Row>> {
        self.writable()?;
        Ok(self.rows.get_mut(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// Drop the rows at the given positions in one pass.
    pub(crate) fn remove_indices(&mut self, indices: &BTreeSet<usize>) -> Result<usize> {
        self.writable()?;
        let before = self.rows.len();
        let mut idx = 0;
        self.rows.retain(|_| {
            let keep = !indices.contains(&idx);
            idx += 1;
            keep
        });
        Ok(before - self.rows.len())
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }
}

/// Keyless rows produced on demand.
#[derive(Debug, Clone)]
pub struct GeneratorTable {
    schema: Arc<TableSchema>,
    generator: RowGenerator,
    frozen: bool,
}

impl GeneratorTable {
    pub(crate) fn new(schema: Arc<TableSchema>, generator: RowGenerator) -> Self {
        Self {
            schema,
            generator,
            frozen: false,
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Restart the producer and build each row it yields.
    pub fn rows(&self) -> impl Iterator<Item = Result<Row>> + '_ {
        self.generator
            .run()
            .map(move |raw| build_row(&self.schema, raw))
    }

    pub fn collect_rows(&self) -> Result<Vec<Row>> {
        self.rows().collect()
    }

    pub(crate) fn generator(&self) -> &RowGenerator {
        &self.generator
    }

    pub(crate) fn replace(&mut self, generator: RowGenerator) -> Result<()> {
        if self.frozen {
            return Err(frozen_error(&self.schema));
        }
        self.generator = generator;
        Ok(())
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }
}

/// One table of a container, tagged by shape.
#[derive(Debug, Clone)]
pub enum Table {
    Keyed(KeyedTable),
    Sequence(RowsTable),
    Generator(GeneratorTable),
}

impl Table {
    pub(crate) fn empty(schema: Arc<TableSchema>) -> Self {
        match schema.shape() {
            TableShape::Keyed => Table::Keyed(KeyedTable::new(schema)),
            TableShape::Sequence => Table::Sequence(RowsTable::new(schema)),
            TableShape::Generator => {
                Table::Generator(GeneratorTable::new(schema, RowGenerator::empty()))
            }
        }
    }

    pub fn name(&self) -> &str {
        self.schema().name()
    }

    pub fn schema(&self) -> &TableSchema {
        match self {
            Table::Keyed(table) => table.schema(),
            Table::Sequence(table) => table.schema(),
            Table::Generator(table) => table.schema(),
        }
    }

    pub fn shape(&self) -> TableShape {
        self.schema().shape()
    }

    pub fn is_frozen(&self) -> bool {
        match self {
            Table::Keyed(table) => table.is_frozen(),
            Table::Sequence(table) => table.is_frozen(),
            Table::Generator(table) => table.is_frozen(),
        }
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        match self {
            Table::Keyed(table) => table.set_frozen(frozen),
            Table::Sequence(table) => table.set_frozen(frozen),
            Table::Generator(table) => table.set_frozen(frozen),
        }
    }

    /// Visit every row with its location. Generator rows are built on the fly.
    pub(crate) fn try_for_each_row<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(RowAt<'_>, &Row) -> Result<()>,
    {
        match self {
            Table::Keyed(table) => {
                for (key, row) in table.iter() {
                    visit(RowAt::Key(key), row)?;
                }
            }
            Table::Sequence(table) => {
                for (idx, row) in table.iter().enumerate() {
                    visit(RowAt::Index(idx), row)?;
                }
            }
            Table::Generator(table) => {
                for (idx, row) in table.rows().enumerate() {
                    visit(RowAt::Index(idx), &row?)?;
                }
            }
        }
        Ok(())
    }

    /// Field values of every row, primary key first, in table order.
    pub fn full_tuples(&self) -> Result<Vec<Vec<Value>>> {
        let mut out = Vec::new();
        self.try_for_each_row(|at, row| {
            let mut values: Vec<_> = at.key().map(|key| key.values().to_vec()).unwrap_or_default();
            values.extend(row.values().iter().cloned());
            out.push(values);
            Ok(())
        })?;
        Ok(out)
    }
}
