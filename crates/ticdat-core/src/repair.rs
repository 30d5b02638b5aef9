use std::collections::{BTreeMap, BTreeSet};

use crate::container::TicDat;
use crate::error::{Error, Result};
use crate::table::{RowRef, Table};
use crate::validation::{find_data_type_failures, find_foreign_key_failures, TableField, Verbosity};
use crate::value::{Key, Value};

/// Delete every native row that fails a foreign key.
///
/// All failures found in one pass are removed together. With `propagate` the
/// pass repeats until nothing fails. Generator tables are never modified.
/// Returns the number of rows removed.
pub fn remove_foreign_key_failures(dat: &mut TicDat, propagate: bool) -> Result<usize> {
    if dat.is_frozen() {
        return Err(Error::Frozen("all tables".to_string()));
    }

    let mut removed = 0;
    let mut pass = 0;
    loop {
        pass += 1;
        let failures = find_foreign_key_failures(dat, Verbosity::Low, None)?;

        let mut keys: BTreeMap<String, BTreeSet<Key>> = BTreeMap::new();
        let mut indices: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for (fk, failure) in failures {
            for row in failure.native_rows {
                match row {
                    RowRef::Key(key) => {
                        keys.entry(fk.native_table.clone()).or_default().insert(key);
                    }
                    RowRef::Index(idx) => {
                        indices.entry(fk.native_table.clone()).or_default().insert(idx);
                    }
                }
            }
        }

        let mut pass_removed = 0;
        for (name, keys) in keys {
            if let Table::Keyed(table) = dat.table_mut(&name)? {
                let before = table.len();
                table.retain(|key, _| !keys.contains(key))?;
                pass_removed += before - table.len();
            }
        }
        for (name, indices) in indices {
            match dat.table_mut(&name)? {
                Table::Sequence(table) => pass_removed += table.remove_indices(&indices)?,
                Table::Generator(_) => {
                    tracing::warn!(
                        event = "generator_failures_kept",
                        table = %name,
                        rows = indices.len()
                    );
                }
                Table::Keyed(_) => {}
            }
        }

        removed += pass_removed;
        tracing::info!(
            event = "foreign_key_repair_pass",
            pass,
            removed = pass_removed
        );

        if !propagate || pass_removed == 0 {
            break;
        }
    }
    Ok(removed)
}

/// Rewrite data-field values that fail their data type, using the given
/// replacement or the field default. Returns the number of values replaced.
pub fn replace_data_type_failures(
    dat: &mut TicDat,
    replacements: &BTreeMap<TableField, Value>,
) -> Result<usize> {
    let failures = find_data_type_failures(dat, None)?;
    let schema = dat.schema().clone();

    let mut replaced = 0;
    for (table_field, failure) in failures {
        let table_schema = schema.table_schema(&table_field.table)?;
        if !table_schema.is_data_field(&table_field.field) {
            return Err(Error::Usage(format!(
                "cannot replace failing values of primary key field {table_field}"
            )));
        }
        let replacement = replacements
            .get(&table_field)
            .cloned()
            .unwrap_or_else(|| table_schema.default_value(&table_field.field));
        if let Some(data_type) = table_schema.data_type(&table_field.field) {
            if !data_type.valid_data(&replacement) {
                return Err(Error::Usage(format!(
                    "replacement {replacement} for {table_field} fails the field's data type"
                )));
            }
        }

        match dat.table_mut(&table_field.table)? {
            Table::Keyed(table) => {
                for row in &failure.rows {
                    if let RowRef::Key(key) = row {
                        if let Some(row) = table.get_mut(key)? {
                            row.set(&table_field.field, replacement.clone())?;
                            replaced += 1;
                        }
                    }
                }
            }
            Table::Sequence(table) => {
                for row in &failure.rows {
                    if let RowRef::Index(idx) = row {
                        if let Some(row) = table.get_mut(*idx)? {
                            row.set(&table_field.field, replacement.clone())?;
                            replaced += 1;
                        }
                    }
                }
            }
            Table::Generator(_) => {
                tracing::warn!(
                    event = "generator_failures_kept",
                    table = %table_field.table,
                    rows = failure.rows.len()
                );
            }
        }
    }

    tracing::info!(event = "data_type_repair", replaced);
    Ok(replaced)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::row::RawRow;
    use crate::schema::{Schema, SchemaBuilder};
    use crate::table::RowGenerator;
    use crate::types::DataType;

    fn chain() -> Arc<Schema> {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("plants", &["name"], &["capacity"])
            .unwrap()
            .declare_table("lines", &["line"], &["plant"])
            .unwrap()
            .declare_table("jobs", &["job"], &["line"])
            .unwrap()
            .add_foreign_key("lines", "plants", ("plant", "name"))
            .unwrap()
            .add_foreign_key("jobs", "lines", ("line", "line"))
            .unwrap();
        builder.build().unwrap()
    }

    fn chain_data() -> TicDat {
        let mut dat = TicDat::new(chain());
        dat.keyed_mut("plants").unwrap().insert("p1", RawRow::values([5])).unwrap();
        let lines = dat.keyed_mut("lines").unwrap();
        lines.insert("l1", RawRow::values(["p1"])).unwrap();
        lines.insert("l2", RawRow::values(["gone"])).unwrap();
        let jobs = dat.keyed_mut("jobs").unwrap();
        jobs.insert("j1", RawRow::values(["l1"])).unwrap();
        jobs.insert("j2", RawRow::values(["l2"])).unwrap();
        dat
    }

    #[test]
    fn single_pass_leaves_new_orphans() {
        let mut dat = chain_data();
        assert_eq!(remove_foreign_key_failures(&mut dat, false).unwrap(), 1);
        assert!(dat.keyed("lines").unwrap().get("l2").is_none());
        assert!(dat.keyed("jobs").unwrap().get("j2").is_some());
        assert_eq!(find_foreign_key_failures(&dat, Verbosity::High, None).unwrap().len(), 1);
    }

    #[test]
    fn propagation_reaches_fixed_point() {
        let mut dat = chain_data();
        assert_eq!(remove_foreign_key_failures(&mut dat, true).unwrap(), 2);
        assert!(find_foreign_key_failures(&dat, Verbosity::High, None).unwrap().is_empty());
        assert_eq!(remove_foreign_key_failures(&mut dat, true).unwrap(), 0);
    }

    #[test]
    fn keyless_native_tables_fail_by_index() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("plants", &["name"], &[])
            .unwrap()
            .declare_table("log", &[], &["plant", "note"])
            .unwrap()
            .declare_table("stream", &[], &["plant"])
            .unwrap()
            .set_generator_tables(&["stream"])
            .unwrap()
            .add_foreign_key("log", "plants", ("plant", "name"))
            .unwrap()
            .add_foreign_key("stream", "plants", ("plant", "name"))
            .unwrap();
        let mut dat = TicDat::new(builder.build().unwrap());
        dat.keyed_mut("plants").unwrap().insert("p1", RawRow::empty()).unwrap();
        let log = dat.sequence_mut("log").unwrap();
        for (plant, note) in [("p1", "a"), ("gone", "b"), ("p1", "c"), ("x", "d")] {
            log.push(RawRow::values([plant, note])).unwrap();
        }
        dat.set_generator(
            "stream",
            RowGenerator::from_rows(vec![RawRow::values(["gone"]), RawRow::values(["p1"])]),
        )
        .unwrap();

        let failures = find_foreign_key_failures(&dat, Verbosity::High, None).unwrap();
        let rows_of = |table: &str| {
            failures
                .iter()
                .find(|(fk, _)| fk.native_table == table)
                .map(|(_, failure)| failure.native_rows.clone())
                .unwrap()
        };
        assert_eq!(rows_of("log"), vec![RowRef::Index(1), RowRef::Index(3)]);
        assert_eq!(rows_of("stream"), vec![RowRef::Index(0)]);

        assert_eq!(remove_foreign_key_failures(&mut dat, true).unwrap(), 2);
        let log = dat.sequence("log").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap()["note"], Value::from("c"));
        assert_eq!(dat.generator("stream").unwrap().collect_rows().unwrap().len(), 2);

        let remaining = find_foreign_key_failures(&dat, Verbosity::Low, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.keys().all(|fk| fk.native_table == "stream"));
    }

    #[test]
    fn frozen_containers_are_not_repaired() {
        let mut dat = chain_data().frozen();
        assert!(matches!(
            remove_foreign_key_failures(&mut dat, true),
            Err(Error::Frozen(_))
        ));
    }

    #[test]
    fn replaces_bad_values() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("foods", &["name"], &["cost", "grade"])
            .unwrap()
            .set_data_type("foods", "cost", DataType::number())
            .unwrap()
            .set_data_type("foods", "grade", DataType::one_of(["a", "b"]))
            .unwrap()
            .set_default_value("foods", "grade", "a")
            .unwrap();
        let mut dat = TicDat::new(builder.build().unwrap());
        let foods = dat.keyed_mut("foods").unwrap();
        foods.insert("pizza", RawRow::values([Value::Int(-1), Value::from("z")])).unwrap();
        foods.insert("salad", RawRow::values([Value::Int(2), Value::from("b")])).unwrap();

        let replacements = BTreeMap::from([(TableField::new("foods", "cost"), Value::Int(1))]);
        assert_eq!(replace_data_type_failures(&mut dat, &replacements).unwrap(), 2);
        let pizza = dat.keyed("foods").unwrap().get("pizza").unwrap();
        assert_eq!(pizza["cost"], Value::Int(1));
        assert_eq!(pizza["grade"], Value::from("a"));
        assert!(find_data_type_failures(&dat, None).unwrap().is_empty());

        let bad = BTreeMap::from([(TableField::new("foods", "cost"), Value::Int(-5))]);
        dat.keyed_mut("foods")
            .unwrap()
            .insert("soup", RawRow::values([Value::Int(-3), Value::from("a")]))
            .unwrap();
        assert!(replace_data_type_failures(&mut dat, &bad).is_err());
    }
}
