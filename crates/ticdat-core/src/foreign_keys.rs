use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::TableCatalog;

/// One `native field -> foreign field` pair of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct FieldPair {
    pub native_field: String,
    pub foreign_field: String,
}

/// Cardinality of a foreign key, derived from the native primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
}

/// Read-only descriptor of a declared or derived foreign key.
///
/// `mapping` is ordered by the position of each foreign field in the foreign
/// table's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ForeignKey {
    pub native_table: String,
    pub foreign_table: String,
    pub mapping: Vec<FieldPair>,
    pub cardinality: Cardinality,
    pub derived: bool,
}

impl ForeignKey {
    pub fn native_fields(&self) -> impl Iterator<Item = &str> {
        self.mapping.iter().map(|pair| pair.native_field.as_str())
    }

    pub fn foreign_fields(&self) -> impl Iterator<Item = &str> {
        self.mapping.iter().map(|pair| pair.foreign_field.as_str())
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let native: Vec<&str> = self.native_fields().collect();
        let foreign: Vec<&str> = self.foreign_fields().collect();
        write!(
            f,
            "{}({}) -> {}({})",
            self.native_table,
            native.join(", "),
            self.foreign_table,
            foreign.join(", ")
        )
    }
}

/// Field pairs supplied to `add_foreign_key`: one pair or a list of pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping(Vec<(String, String)>);

impl FieldMapping {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl From<(&str, &str)> for FieldMapping {
    fn from((native, foreign): (&str, &str)) -> Self {
        FieldMapping(vec![(native.to_string(), foreign.to_string())])
    }
}

impl From<&[(&str, &str)]> for FieldMapping {
    fn from(pairs: &[(&str, &str)]) -> Self {
        FieldMapping(
            pairs
                .iter()
                .map(|(native, foreign)| (native.to_string(), foreign.to_string()))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, &str); N]> for FieldMapping {
    fn from(pairs: [(&str, &str); N]) -> Self {
        FieldMapping::from(&pairs[..])
    }
}

impl From<Vec<(&str, &str)>> for FieldMapping {
    fn from(pairs: Vec<(&str, &str)>) -> Self {
        FieldMapping::from(pairs.as_slice())
    }
}

impl From<Vec<(String, String)>> for FieldMapping {
    fn from(pairs: Vec<(String, String)>) -> Self {
        FieldMapping(pairs)
    }
}

impl From<&[FieldPair]> for FieldMapping {
    fn from(pairs: &[FieldPair]) -> Self {
        FieldMapping(
            pairs
                .iter()
                .map(|pair| (pair.native_field.clone(), pair.foreign_field.clone()))
                .collect(),
        )
    }
}

type TablePair = (String, String);

/// Per `(native, foreign)` pair, the set of native field tuples aligned with
/// the foreign primary key.
#[derive(Debug, Clone, Default)]
pub(crate) struct ForeignKeyGraph {
    edges: BTreeMap<TablePair, BTreeSet<Vec<String>>>,
    derived: BTreeSet<(TablePair, Vec<String>)>,
}

impl ForeignKeyGraph {
    /// Validate `mapping` and store it. Returns the aligned native fields.
    pub(crate) fn add(
        &mut self,
        tables: &TableCatalog,
        native_table: &str,
        foreign_table: &str,
        mapping: &FieldMapping,
    ) -> Result<Vec<String>> {
        let native = tables.get(native_table).ok_or_else(|| {
            Error::InvalidSchema(format!("foreign key native table not found: {native_table}"))
        })?;
        let foreign = tables.get(foreign_table).ok_or_else(|| {
            Error::InvalidSchema(format!(
                "foreign key foreign table not found: {foreign_table}"
            ))
        })?;

        if mapping.pairs().is_empty() {
            return Err(Error::InvalidSchema(format!(
                "foreign key {native_table} -> {foreign_table} has no field pairs"
            )));
        }

        let mut native_seen = BTreeSet::new();
        let mut foreign_seen = BTreeSet::new();
        for (native_field, foreign_field) in mapping.pairs() {
            if !native.has_field(native_field) {
                return Err(Error::InvalidSchema(format!(
                    "foreign key native field not found: {native_table}.{native_field}"
                )));
            }
            if !foreign.has_field(foreign_field) {
                return Err(Error::InvalidSchema(format!(
                    "foreign key foreign field not found: {foreign_table}.{foreign_field}"
                )));
            }
            if !native_seen.insert(native_field.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "foreign key {native_table} -> {foreign_table} maps native field '{native_field}' twice"
                )));
            }
            if !foreign_seen.insert(foreign_field.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "foreign key {native_table} -> {foreign_table} maps foreign field '{foreign_field}' twice"
                )));
            }
        }

        let foreign_pk: BTreeSet<&str> = foreign
            .primary_key_fields()
            .iter()
            .map(String::as_str)
            .collect();
        if foreign_seen != foreign_pk {
            return Err(Error::InvalidSchema(format!(
                "many-to-many foreign key {native_table} -> {foreign_table} is not supported: \
                 the mapped foreign fields ({}) must be exactly the primary key of {foreign_table} ({})",
                foreign_seen.into_iter().collect::<Vec<_>>().join(", "),
                foreign.primary_key_fields().join(", ")
            )));
        }

        let aligned: Vec<String> = foreign
            .primary_key_fields()
            .iter()
            .filter_map(|pk_field| {
                mapping
                    .pairs()
                    .iter()
                    .find(|(_, foreign_field)| foreign_field == pk_field)
                    .map(|(native_field, _)| native_field.clone())
            })
            .collect();

        self.edges
            .entry((native_table.to_string(), foreign_table.to_string()))
            .or_default()
            .insert(aligned.clone());
        Ok(aligned)
    }

    /// Add derived foreign keys until a fixed point. Returns how many were added.
    ///
    /// A native -> bridge key covers the whole bridge primary key, so any
    /// bridge -> target key built only from bridge primary key fields can be
    /// re-expressed over native fields.
    pub(crate) fn close(&mut self, tables: &TableCatalog) -> usize {
        let mut total = 0;
        loop {
            let mut added: BTreeSet<(TablePair, Vec<String>)> = BTreeSet::new();

            for ((native, bridge), native_sets) in &self.edges {
                let Some(bridge_schema) = tables.get(bridge) else {
                    continue;
                };
                let bridge_pk = bridge_schema.primary_key_fields();

                for native_fields in native_sets {
                    let outgoing = self
                        .edges
                        .range((bridge.clone(), String::new())..)
                        .take_while(|((from, _), _)| from == bridge);

                    for ((_, target), bridge_sets) in outgoing {
                        for bridge_fields in bridge_sets {
                            let composed: Option<Vec<String>> = bridge_fields
                                .iter()
                                .map(|field| {
                                    bridge_pk
                                        .iter()
                                        .position(|pk_field| pk_field == field)
                                        .map(|idx| native_fields[idx].clone())
                                })
                                .collect();
                            let Some(composed) = composed else {
                                continue;
                            };

                            if native == target
                                && tables
                                    .get(native)
                                    .is_some_and(|t| t.primary_key_fields() == composed.as_slice())
                            {
                                continue;
                            }

                            if !self.contains(native, target, &composed) {
                                added.insert(((native.clone(), target.clone()), composed));
                            }
                        }
                    }
                }
            }

            if added.is_empty() {
                break;
            }

            total += added.len();
            for (pair, fields) in added {
                self.edges
                    .entry(pair.clone())
                    .or_default()
                    .insert(fields.clone());
                self.derived.insert((pair, fields));
            }
        }
        total
    }

    fn contains(&self, native: &str, foreign: &str, fields: &[String]) -> bool {
        self.edges
            .get(&(native.to_string(), foreign.to_string()))
            .is_some_and(|sets| sets.iter().any(|existing| existing == fields))
    }

    /// Descriptors in deterministic order, one per stored mapping.
    pub(crate) fn descriptors(&self, tables: &TableCatalog) -> Vec<ForeignKey> {
        let mut out = Vec::new();
        for ((native, foreign), sets) in &self.edges {
            let (Some(native_schema), Some(foreign_schema)) = (tables.get(native), tables.get(foreign))
            else {
                continue;
            };
            let native_pk: BTreeSet<&str> = native_schema
                .primary_key_fields()
                .iter()
                .map(String::as_str)
                .collect();

            for fields in sets {
                let mapping = fields
                    .iter()
                    .zip(foreign_schema.primary_key_fields())
                    .map(|(native_field, foreign_field)| FieldPair {
                        native_field: native_field.clone(),
                        foreign_field: foreign_field.clone(),
                    })
                    .collect();
                let mapped: BTreeSet<&str> = fields.iter().map(String::as_str).collect();
                let cardinality = if mapped == native_pk {
                    Cardinality::OneToOne
                } else {
                    Cardinality::ManyToOne
                };
                let derived = self
                    .derived
                    .contains(&((native.clone(), foreign.clone()), fields.clone()));
                out.push(ForeignKey {
                    native_table: native.clone(),
                    foreign_table: foreign.clone(),
                    mapping,
                    cardinality,
                    derived,
                });
            }
        }
        out
    }

    /// Name of the link a foreign key materializes on rows of its foreign table.
    pub(crate) fn link_name(&self, fk: &ForeignKey) -> String {
        let Some(sets) = self
            .edges
            .get(&(fk.native_table.clone(), fk.foreign_table.clone()))
        else {
            return fk.native_table.clone();
        };
        if sets.len() <= 1 {
            return fk.native_table.clone();
        }

        let own: Vec<&str> = fk.native_fields().collect();
        let others: BTreeSet<&str> = sets
            .iter()
            .filter(|fields| fields.iter().map(String::as_str).ne(own.iter().copied()))
            .flat_map(|fields| fields.iter().map(String::as_str))
            .collect();
        let unique: Vec<&str> = own
            .iter()
            .copied()
            .filter(|field| !others.contains(field))
            .collect();
        let suffix = if unique.is_empty() { own } else { unique };
        format!("{}_{}", fk.native_table, suffix.join("_"))
    }

    /// A copy without the derived entries.
    pub(crate) fn declared_only(&self) -> Self {
        let mut edges = self.edges.clone();
        for (pair, fields) in &self.derived {
            if let Some(sets) = edges.get_mut(pair) {
                sets.remove(fields);
                if sets.is_empty() {
                    edges.remove(pair);
                }
            }
        }
        Self {
            edges,
            derived: BTreeSet::new(),
        }
    }

    /// Drop every mapping that touches `table`.
    pub(crate) fn remove_table(&mut self, table: &str) {
        self.edges
            .retain(|(native, foreign), _| native != table && foreign != table);
        self.derived
            .retain(|((native, foreign), _)| native != table && foreign != table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    fn diet() -> SchemaBuilder {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("categories", &["name"], &["minNutrition", "maxNutrition"])
            .unwrap()
            .declare_table("foods", &["name"], &["cost"])
            .unwrap()
            .declare_table("nutritionQuantities", &["food", "category"], &["qty"])
            .unwrap();
        builder
    }

    #[test]
    fn rejects_many_to_many() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("arcs", &["source", "destination"], &["flow"])
            .unwrap()
            .declare_table("cost", &["source", "destination", "commodity"], &["cost"])
            .unwrap();
        let err = builder
            .add_foreign_key(
                "arcs",
                "cost",
                [("source", "source"), ("destination", "destination")],
            )
            .unwrap_err();
        assert!(err.to_string().contains("many-to-many"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut builder = diet();
        assert!(
            builder
                .add_foreign_key("nutritionQuantities", "foods", ("nope", "name"))
                .is_err()
        );
        assert!(
            builder
                .add_foreign_key("nutritionQuantities", "foods", ("food", "nope"))
                .is_err()
        );
        assert!(
            builder
                .add_foreign_key("nutritionQuantities", "missing", ("food", "name"))
                .is_err()
        );
    }

    #[test]
    fn cardinality_follows_native_primary_key() {
        let mut builder = diet();
        builder
            .declare_table("foodExtras", &["food"], &["note"])
            .unwrap()
            .add_foreign_key("nutritionQuantities", "foods", ("food", "name"))
            .unwrap()
            .add_foreign_key("foodExtras", "foods", ("food", "name"))
            .unwrap();
        let schema = builder.build().unwrap();
        let by_native: BTreeMap<&str, Cardinality> = schema
            .foreign_keys()
            .iter()
            .map(|fk| (fk.native_table.as_str(), fk.cardinality))
            .collect();
        assert_eq!(by_native["nutritionQuantities"], Cardinality::ManyToOne);
        assert_eq!(by_native["foodExtras"], Cardinality::OneToOne);
    }

    #[test]
    fn closure_composes_through_bridge_primary_key() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("plants", &["name"], &["capacity"])
            .unwrap()
            .declare_table("lines", &["plant", "line"], &["speed"])
            .unwrap()
            .declare_table("shifts", &["plant", "line", "shift"], &["hours"])
            .unwrap()
            .add_foreign_key("lines", "plants", ("plant", "name"))
            .unwrap()
            .add_foreign_key(
                "shifts",
                "lines",
                [("plant", "plant"), ("line", "line")],
            )
            .unwrap();
        let schema = builder.build().unwrap();

        let derived: Vec<&ForeignKey> = schema
            .foreign_keys()
            .iter()
            .filter(|fk| fk.derived)
            .collect();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].native_table, "shifts");
        assert_eq!(derived[0].foreign_table, "plants");
        assert_eq!(
            derived[0].mapping,
            vec![FieldPair {
                native_field: "plant".to_string(),
                foreign_field: "name".to_string(),
            }]
        );
        assert_eq!(derived[0].cardinality, Cardinality::ManyToOne);
    }

    #[test]
    fn closure_is_a_fixed_point() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("a", &["x"], &["v"])
            .unwrap()
            .declare_table("b", &["x", "y"], &["v"])
            .unwrap()
            .declare_table("c", &["x", "y", "z"], &["v"])
            .unwrap()
            .declare_table("d", &["x", "y", "z", "w"], &["v"])
            .unwrap()
            .add_foreign_key("b", "a", ("x", "x"))
            .unwrap()
            .add_foreign_key("c", "b", [("x", "x"), ("y", "y")])
            .unwrap()
            .add_foreign_key("d", "c", [("x", "x"), ("y", "y"), ("z", "z")])
            .unwrap();
        let schema = builder.build().unwrap();
        // c->a, d->b, d->a
        assert_eq!(schema.foreign_keys().iter().filter(|fk| fk.derived).count(), 3);

        let mut graph = schema.foreign_key_graph().clone();
        assert_eq!(graph.close(schema.table_schemas()), 0);
    }

    #[test]
    fn link_names_disambiguate_parallel_mappings() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("nodes", &["name"], &[])
            .unwrap()
            .declare_table("arcs", &["source", "destination"], &["capacity"])
            .unwrap()
            .add_foreign_key("arcs", "nodes", ("source", "name"))
            .unwrap()
            .add_foreign_key("arcs", "nodes", ("destination", "name"))
            .unwrap();
        let schema = builder.build().unwrap();
        let mut names: Vec<String> = schema
            .foreign_keys()
            .iter()
            .map(|fk| schema.link_name(fk))
            .collect();
        names.sort();
        assert_eq!(names, vec!["arcs_destination", "arcs_source"]);
    }
}
