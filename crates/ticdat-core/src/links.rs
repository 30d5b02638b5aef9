use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::container::TicDat;
use crate::error::{Error, Result};
use crate::foreign_keys::{Cardinality, ForeignKey};
use crate::row::Row;
use crate::table::{KeyedTable, Table};
use crate::value::{Key, Value};

/// Native rows grouped under the foreign row they reference.
#[derive(Debug)]
struct Link<'a> {
    fk: ForeignKey,
    residual: Vec<usize>,
    children: HashMap<Key, Vec<(&'a Key, &'a Row)>>,
}

/// Parent to child navigation over the foreign keys of a container.
///
/// Built once from the current data and queried by lookup. Only foreign keys
/// whose native and foreign tables both have a primary key are indexed.
#[derive(Debug)]
pub struct LinkIndex<'a> {
    dat: &'a TicDat,
    links: BTreeMap<(String, String), Link<'a>>,
}

/// Values of the mapped native fields of a row, or `None` when any is null.
fn mapped_values(native: &KeyedTable, fk: &ForeignKey, key: &Key, row: &Row) -> Option<Vec<Value>> {
    let schema = native.schema();
    fk.native_fields()
        .map(|field| {
            let value = match schema.primary_key_fields().iter().position(|f| f == field) {
                Some(idx) => key.values().get(idx),
                None => row.get(field),
            };
            value.filter(|value| !value.is_null()).cloned()
        })
        .collect()
}

impl<'a> LinkIndex<'a> {
    pub(crate) fn build(dat: &'a TicDat) -> Self {
        let schema = dat.schema();
        let mut links = BTreeMap::new();

        for fk in schema.foreign_keys() {
            let (Ok(Table::Keyed(native)), Ok(Table::Keyed(foreign))) =
                (dat.table(&fk.native_table), dat.table(&fk.foreign_table))
            else {
                continue;
            };
            let name = schema.link_name(fk);
            if foreign.schema().has_field(&name) {
                continue;
            }

            let mapped: Vec<&str> = fk.native_fields().collect();
            let residual = native
                .schema()
                .primary_key_fields()
                .iter()
                .enumerate()
                .filter(|(_, field)| !mapped.contains(&field.as_str()))
                .map(|(idx, _)| idx)
                .collect();

            let mut children: HashMap<Key, Vec<(&'a Key, &'a Row)>> = HashMap::new();
            for (key, row) in native.iter() {
                let Some(values) = mapped_values(native, fk, key, row) else {
                    continue;
                };
                let parent = Key::from_values(values);
                if foreign.contains_key(&parent) {
                    children.entry(parent).or_default().push((key, row));
                }
            }

            links.insert(
                (fk.foreign_table.clone(), name),
                Link {
                    fk: fk.clone(),
                    residual,
                    children,
                },
            );
        }

        Self { dat, links }
    }

    /// Link names available on rows of `foreign_table`.
    pub fn link_names(&self, foreign_table: &str) -> Vec<&str> {
        self.links
            .keys()
            .filter(|(table, _)| table == foreign_table)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub fn foreign_key(&self, foreign_table: &str, link: &str) -> Option<&ForeignKey> {
        self.find(foreign_table, link).ok().map(|link| &link.fk)
    }

    fn find(&self, foreign_table: &str, link: &str) -> Result<&Link<'a>> {
        self.links
            .get(&(foreign_table.to_string(), link.to_string()))
            .ok_or_else(|| Error::Usage(format!("no link {link} on table {foreign_table}")))
    }

    /// The native row of a one-to-one link, if the parent has one.
    pub fn one_to_one(
        &self,
        foreign_table: &str,
        key: impl Into<Key>,
        link: &str,
    ) -> Result<Option<(&'a Key, &'a Row)>> {
        let found = self.find(foreign_table, link)?;
        if found.fk.cardinality != Cardinality::OneToOne {
            return Err(Error::Usage(format!(
                "link {link} on table {foreign_table} is many-to-one"
            )));
        }
        Ok(found
            .children
            .get(&key.into())
            .and_then(|rows| rows.first().copied()))
    }

    /// Native rows of a many-to-one link keyed by their primary key fields
    /// not covered by the foreign key.
    pub fn children(
        &self,
        foreign_table: &str,
        key: impl Into<Key>,
        link: &str,
    ) -> Result<IndexMap<Key, &'a Row>> {
        let found = self.find(foreign_table, link)?;
        if found.fk.cardinality != Cardinality::ManyToOne {
            return Err(Error::Usage(format!(
                "link {link} on table {foreign_table} is one-to-one"
            )));
        }
        let Some(rows) = found.children.get(&key.into()) else {
            return Ok(IndexMap::new());
        };
        Ok(rows
            .iter()
            .map(|(native_key, row)| {
                let residual = found
                    .residual
                    .iter()
                    .filter_map(|idx| native_key.values().get(*idx).cloned())
                    .collect();
                (Key::from_values(residual), *row)
            })
            .collect())
    }

    /// The foreign row a native row points at through `fk`.
    pub fn parent(
        &self,
        fk: &ForeignKey,
        native_key: impl Into<Key>,
    ) -> Result<Option<(Key, &'a Row)>> {
        let native = self.dat.keyed(&fk.native_table)?;
        let foreign = self.dat.keyed(&fk.foreign_table)?;
        let native_key = native_key.into();
        let Some(row) = native.get(&native_key) else {
            return Ok(None);
        };
        let Some(values) = mapped_values(native, fk, &native_key, row) else {
            return Ok(None);
        };
        let parent = Key::from_values(values);
        Ok(foreign.get(&parent).map(|row| (parent, row)))
    }
}
