use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::container::good_tic_dat_table;
use crate::error::{Error, Result};
use crate::foreign_keys::{FieldMapping, ForeignKey, ForeignKeyGraph};
use crate::graph::{build_fk_graph_report, FkGraphReport};
use crate::predicates::RowPredicate;
use crate::table::RawTable;
use crate::types::DataType;
use crate::value::Value;

/// Table names may not start with this prefix.
pub const RESERVED_PREFIX: &str = "_";

pub(crate) type TableCatalog = IndexMap<String, Arc<TableSchema>>;

/// How a table's rows are stored, fixed when the table is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableShape {
    /// Rows keyed by primary key.
    Keyed,
    /// Keyless rows held in order.
    Sequence,
    /// Keyless rows produced lazily by a restartable generator.
    Generator,
}

/// Static description of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    primary_key_fields: Vec<String>,
    data_fields: Vec<String>,
    default_values: BTreeMap<String, Value>,
    data_types: BTreeMap<String, DataType>,
    shape: TableShape,
}

impl TableSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_fields(&self) -> &[String] {
        &self.primary_key_fields
    }

    pub fn data_fields(&self) -> &[String] {
        &self.data_fields
    }

    /// Primary key fields followed by data fields.
    pub fn all_fields(&self) -> impl Iterator<Item = &str> {
        self.primary_key_fields
            .iter()
            .chain(self.data_fields.iter())
            .map(String::as_str)
    }

    pub fn shape(&self) -> TableShape {
        self.shape
    }

    pub fn is_keyed(&self) -> bool {
        self.shape == TableShape::Keyed
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.primary_key_fields.iter().any(|f| f == field) || self.is_data_field(field)
    }

    pub fn is_data_field(&self, field: &str) -> bool {
        self.data_fields.iter().any(|f| f == field)
    }

    pub(crate) fn data_field_index(&self, field: &str) -> Option<usize> {
        self.data_fields.iter().position(|f| f == field)
    }

    pub(crate) fn primary_key_index(&self, field: &str) -> Option<usize> {
        self.primary_key_fields.iter().position(|f| f == field)
    }

    /// Default for a data field: the declared value, else `Int(0)`.
    pub fn default_value(&self, field: &str) -> Value {
        self.default_values
            .get(field)
            .cloned()
            .unwrap_or(Value::Int(0))
    }

    pub fn explicit_default_values(&self) -> &BTreeMap<String, Value> {
        &self.default_values
    }

    pub fn data_type(&self, field: &str) -> Option<&DataType> {
        self.data_types.get(field)
    }

    pub fn data_types(&self) -> &BTreeMap<String, DataType> {
        &self.data_types
    }

    fn field_error(&self, field: &str) -> Error {
        Error::InvalidSchema(format!("field not found: {}.{}", self.name, field))
    }
}

/// Mutable phase of a schema. `build` freezes it into a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    tables: TableCatalog,
    foreign_keys: ForeignKeyGraph,
    predicates: BTreeMap<String, IndexMap<String, RowPredicate>>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. An empty primary key makes the table keyless.
    pub fn declare_table(
        &mut self,
        name: &str,
        primary_key_fields: &[&str],
        data_fields: &[&str],
    ) -> Result<&mut Self> {
        if name.trim().is_empty() {
            return Err(Error::InvalidSchema("table name cannot be empty".to_string()));
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(Error::InvalidSchema(format!(
                "table name cannot start with '{RESERVED_PREFIX}': {name}"
            )));
        }
        if self.tables.contains_key(name) {
            return Err(Error::InvalidSchema(format!("duplicate table name: {name}")));
        }
        if primary_key_fields.is_empty() && data_fields.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "table {name} needs at least one primary key or data field"
            )));
        }

        let mut seen = BTreeSet::new();
        for field in primary_key_fields.iter().chain(data_fields.iter()) {
            if field.trim().is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "empty field name in table {name}"
                )));
            }
            if !seen.insert(*field) {
                let overlap = primary_key_fields.contains(field) && data_fields.contains(field);
                return Err(Error::InvalidSchema(if overlap {
                    format!("field {name}.{field} is both a primary key field and a data field")
                } else {
                    format!("duplicate field name: {name}.{field}")
                }));
            }
        }

        let shape = if primary_key_fields.is_empty() {
            TableShape::Sequence
        } else {
            TableShape::Keyed
        };
        self.tables.insert(
            name.to_string(),
            Arc::new(TableSchema {
                name: name.to_string(),
                primary_key_fields: primary_key_fields.iter().map(|f| f.to_string()).collect(),
                data_fields: data_fields.iter().map(|f| f.to_string()).collect(),
                default_values: BTreeMap::new(),
                data_types: BTreeMap::new(),
                shape,
            }),
        );
        Ok(self)
    }

    /// Default used when a row omits a data field.
    pub fn set_default_value(
        &mut self,
        table: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        let schema = self.table_mut(table)?;
        if !schema.is_data_field(field) {
            return Err(Error::InvalidSchema(format!(
                "default values apply to data fields only: {table}.{field}"
            )));
        }
        schema.default_values.insert(field.to_string(), value.into());
        Ok(self)
    }

    /// Restrict the legal values of a primary key or data field.
    pub fn set_data_type(&mut self, table: &str, field: &str, data_type: DataType) -> Result<&mut Self> {
        data_type.validate()?;
        let schema = self.table_mut(table)?;
        if !schema.has_field(field) {
            return Err(schema.field_error(field));
        }
        schema.data_types.insert(field.to_string(), data_type);
        Ok(self)
    }

    /// Declare that `mapping` fields of `native_table` reference the full
    /// primary key of `foreign_table`.
    pub fn add_foreign_key(
        &mut self,
        native_table: &str,
        foreign_table: &str,
        mapping: impl Into<FieldMapping>,
    ) -> Result<&mut Self> {
        let mapping = mapping.into();
        self.foreign_keys
            .add(&self.tables, native_table, foreign_table, &mapping)?;
        Ok(self)
    }

    /// Register a named row predicate; a predicate with the same name is replaced.
    pub fn add_data_row_predicate(&mut self, table: &str, predicate: RowPredicate) -> Result<&mut Self> {
        if !self.tables.contains_key(table) {
            return Err(Error::InvalidSchema(format!("table not found: {table}")));
        }
        self.predicates
            .entry(table.to_string())
            .or_default()
            .insert(predicate.name().to_string(), predicate);
        Ok(self)
    }

    pub fn remove_data_row_predicate(&mut self, table: &str, name: &str) -> Result<&mut Self> {
        let removed = self
            .predicates
            .get_mut(table)
            .and_then(|predicates| predicates.shift_remove(name));
        if removed.is_none() {
            return Err(Error::InvalidSchema(format!(
                "row predicate not found: {table}.{name}"
            )));
        }
        Ok(self)
    }

    /// Mark exactly these tables as generator tables.
    pub fn set_generator_tables(&mut self, tables: &[&str]) -> Result<&mut Self> {
        for name in tables {
            let schema = self
                .tables
                .get(*name)
                .ok_or_else(|| Error::InvalidSchema(format!("table not found: {name}")))?;
            if !schema.primary_key_fields.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "generator table {name} cannot have a primary key"
                )));
            }
        }

        for (name, schema) in self.tables.iter_mut() {
            if schema.shape == TableShape::Keyed {
                continue;
            }
            let shape = if tables.contains(&name.as_str()) {
                TableShape::Generator
            } else {
                TableShape::Sequence
            };
            if schema.shape != shape {
                Arc::make_mut(schema).shape = shape;
            }
        }
        Ok(self)
    }

    /// Drop a table together with its foreign keys and predicates.
    pub fn remove_table(&mut self, table: &str) -> Result<&mut Self> {
        if self.tables.shift_remove(table).is_none() {
            return Err(Error::InvalidSchema(format!("table not found: {table}")));
        }
        self.foreign_keys.remove_table(table);
        self.predicates.remove(table);
        Ok(self)
    }

    /// Freeze the declarations and compute derived foreign keys.
    pub fn build(self) -> Result<Arc<Schema>> {
        let SchemaBuilder {
            tables,
            mut foreign_keys,
            predicates,
        } = self;

        let derived = foreign_keys.close(&tables);
        let descriptors = foreign_keys.descriptors(&tables);

        tracing::debug!(
            event = "schema_built",
            tables = tables.len(),
            foreign_keys = descriptors.len(),
            derived_foreign_keys = derived
        );

        Ok(Arc::new(Schema {
            tables,
            foreign_keys,
            descriptors,
            predicates,
        }))
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableSchema> {
        self.tables
            .get_mut(table)
            .map(Arc::make_mut)
            .ok_or_else(|| Error::InvalidSchema(format!("table not found: {table}")))
    }
}

/// Immutable relational schema, shared by every container built from it.
#[derive(Debug)]
pub struct Schema {
    tables: TableCatalog,
    foreign_keys: ForeignKeyGraph,
    descriptors: Vec<ForeignKey>,
    predicates: BTreeMap<String, IndexMap<String, RowPredicate>>,
}

impl Schema {
    /// Table names in declaration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name).map(Arc::as_ref)
    }

    pub fn table_schema(&self, name: &str) -> Result<&TableSchema> {
        self.table(name)
            .ok_or_else(|| Error::Usage(format!("table not found: {name}")))
    }

    #[cfg(test)]
    pub(crate) fn shared_table(&self, name: &str) -> Result<Arc<TableSchema>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Usage(format!("table not found: {name}")))
    }

    pub fn primary_key_fields(&self, table: &str) -> Option<&[String]> {
        self.table(table).map(TableSchema::primary_key_fields)
    }

    pub fn data_fields(&self, table: &str) -> Option<&[String]> {
        self.table(table).map(TableSchema::data_fields)
    }

    pub fn default_value(&self, table: &str, field: &str) -> Option<Value> {
        self.table(table)
            .filter(|schema| schema.is_data_field(field))
            .map(|schema| schema.default_value(field))
    }

    pub fn data_type(&self, table: &str, field: &str) -> Option<&DataType> {
        self.table(table).and_then(|schema| schema.data_type(field))
    }

    pub fn generator_tables(&self) -> Vec<&str> {
        self.tables
            .values()
            .filter(|schema| schema.shape == TableShape::Generator)
            .map(|schema| schema.name.as_str())
            .collect()
    }

    /// Declared and derived foreign keys, without duplicates.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.descriptors
    }

    /// Name under which `fk` links foreign rows to their native rows.
    pub fn link_name(&self, fk: &ForeignKey) -> String {
        self.foreign_keys.link_name(fk)
    }

    pub fn row_predicates(&self, table: &str) -> impl Iterator<Item = &RowPredicate> {
        self.predicates
            .get(table)
            .into_iter()
            .flat_map(|predicates| predicates.values())
    }

    pub(crate) fn all_row_predicates(&self) -> impl Iterator<Item = (&str, &RowPredicate)> {
        self.predicates.iter().flat_map(|(table, predicates)| {
            predicates
                .values()
                .map(move |predicate| (table.as_str(), predicate))
        })
    }

    pub fn fk_graph_report(&self) -> FkGraphReport {
        build_fk_graph_report(self)
    }

    /// Tables ordered so that every foreign table precedes its native tables.
    pub fn table_order(&self) -> Result<Vec<String>> {
        let report = self.fk_graph_report();
        match (report.topo_order, report.cycle) {
            (Some(order), _) => Ok(order),
            (None, cycle) => Err(Error::CyclicForeignKeys(cycle.unwrap_or_default())),
        }
    }

    /// Check raw input for one table without building it.
    pub fn good_tic_dat_table(&self, table: &str, raw: &RawTable) -> Result<()> {
        let schema = self
            .table(table)
            .ok_or_else(|| Error::structure(table, "table is not part of the schema"))?;
        good_tic_dat_table(schema, raw)
    }

    /// Start a new builder holding the same declarations.
    pub fn to_builder(&self) -> SchemaBuilder {
        SchemaBuilder {
            tables: self.tables.clone(),
            foreign_keys: self.foreign_keys.declared_only(),
            predicates: self.predicates.clone(),
        }
    }

    pub(crate) fn table_schemas(&self) -> &TableCatalog {
        &self.tables
    }

    #[cfg(test)]
    pub(crate) fn foreign_key_graph(&self) -> &ForeignKeyGraph {
        &self.foreign_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_declarations() {
        let mut builder = SchemaBuilder::new();
        assert!(builder.declare_table("_hidden", &["id"], &[]).is_err());
        assert!(builder.declare_table("empty", &[], &[]).is_err());
        assert!(builder.declare_table("overlap", &["id"], &["id"]).is_err());
        assert!(builder.declare_table("dupes", &[], &["a", "a"]).is_err());
        assert!(builder.declare_table("blank", &[""], &["a"]).is_err());
        builder.declare_table("ok", &["id"], &["a"]).unwrap();
        assert!(builder.declare_table("ok", &["id"], &["a"]).is_err());
    }

    #[test]
    fn overlap_message_names_both_lists() {
        let mut builder = SchemaBuilder::new();
        let err = builder
            .declare_table("foods", &["name"], &["name", "cost"])
            .unwrap_err();
        assert!(err.to_string().contains("both a primary key field and a data field"));
    }

    #[test]
    fn keyless_tables_are_sequences() {
        let mut builder = SchemaBuilder::new();
        builder.declare_table("log", &[], &["a", "b"]).unwrap();
        let schema = builder.build().unwrap();
        assert_eq!(schema.table_schema("log").unwrap().shape(), TableShape::Sequence);
    }

    #[test]
    fn generator_tables_must_be_keyless() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("keyed", &["id"], &["a"])
            .unwrap()
            .declare_table("stream", &[], &["a"])
            .unwrap();
        assert!(builder.set_generator_tables(&["keyed"]).is_err());
        builder.set_generator_tables(&["stream"]).unwrap();
        let schema = builder.build().unwrap();
        assert_eq!(schema.generator_tables(), vec!["stream"]);
    }

    #[test]
    fn defaults_apply_to_data_fields_only() {
        let mut builder = SchemaBuilder::new();
        builder.declare_table("foods", &["name"], &["cost", "label"]).unwrap();
        assert!(builder.set_default_value("foods", "name", "x").is_err());
        builder.set_default_value("foods", "label", "n/a").unwrap();
        let schema = builder.build().unwrap();
        assert_eq!(schema.default_value("foods", "label"), Some(Value::from("n/a")));
        assert_eq!(schema.default_value("foods", "cost"), Some(Value::Int(0)));
    }

    #[test]
    fn data_types_need_known_fields() {
        let mut builder = SchemaBuilder::new();
        builder.declare_table("foods", &["name"], &["cost"]).unwrap();
        assert!(builder.set_data_type("foods", "price", DataType::number()).is_err());
        builder.set_data_type("foods", "name", DataType::text()).unwrap();
        builder.set_data_type("foods", "cost", DataType::number()).unwrap();
    }

    #[test]
    fn to_builder_drops_derived_keys() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("a", &["x"], &["v"])
            .unwrap()
            .declare_table("b", &["x", "y"], &["v"])
            .unwrap()
            .declare_table("c", &["x", "y", "z"], &["v"])
            .unwrap()
            .add_foreign_key("b", "a", ("x", "x"))
            .unwrap()
            .add_foreign_key("c", "b", [("x", "x"), ("y", "y")])
            .unwrap();
        let schema = builder.build().unwrap();
        let rebuilt = schema.to_builder().build().unwrap();
        assert_eq!(schema.foreign_keys(), rebuilt.foreign_keys());
        assert_eq!(rebuilt.foreign_keys().iter().filter(|fk| fk.derived).count(), 1);
    }
}
