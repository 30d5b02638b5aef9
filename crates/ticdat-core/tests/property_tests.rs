//! Property-based tests for the schema and validation engine.
//!
//! ```bash
//! PROPTEST_CASES=2000 cargo test -p ticdat-core --test property_tests
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use ticdat_core::{
    find_foreign_key_failures, remove_foreign_key_failures, Cardinality, Error, Key, RawRow,
    RawTable, RawTicDat, Schema, SchemaBuilder, TicDat, Value, Verbosity,
};

// =============================================================================
// Strategies
// =============================================================================

/// Names drawn from a small pool so that references often hit and often miss.
fn name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
}

/// Keep the first row for each primary key; keyed tables reject repeats.
fn first_per_key<T, K: Ord>(rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut seen = BTreeSet::new();
    rows.into_iter().filter(|row| seen.insert(key(row))).collect()
}

fn plants_rows() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec((name(), 0i64..100), 0..5)
        .prop_map(|rows| first_per_key(rows, |(name, _)| name.clone()))
}

fn lines_rows() -> impl Strategy<Value = Vec<(String, String, i64)>> {
    prop::collection::vec((name(), name(), 0i64..10), 0..8)
        .prop_map(|rows| first_per_key(rows, |(plant, line, _)| (plant.clone(), line.clone())))
}

fn shifts_rows() -> impl Strategy<Value = Vec<(String, String, i64, Option<String>)>> {
    prop::collection::vec(
        (name(), name(), 0i64..3, prop::option::of(name())),
        0..12,
    )
    .prop_map(|rows| {
        first_per_key(rows, |(plant, line, shift, _)| {
            (plant.clone(), line.clone(), *shift)
        })
    })
}

fn log_rows() -> impl Strategy<Value = Vec<(i64, String)>> {
    prop::collection::vec((0i64..4, name()), 0..10)
}

fn factory_schema() -> Arc<Schema> {
    let mut builder = SchemaBuilder::new();
    builder
        .declare_table("plants", &["name"], &["capacity"])
        .expect("plants")
        .declare_table("lines", &["plant", "line"], &["speed"])
        .expect("lines")
        .declare_table("shifts", &["plant", "line", "shift"], &["supervisor"])
        .expect("shifts")
        .declare_table("log", &[], &["value", "tag"])
        .expect("log")
        .add_foreign_key("lines", "plants", ("plant", "name"))
        .expect("lines -> plants")
        .add_foreign_key("shifts", "lines", [("plant", "plant"), ("line", "line")])
        .expect("shifts -> lines")
        .add_foreign_key("shifts", "plants", ("supervisor", "name"))
        .expect("shifts -> plants")
        .add_foreign_key("log", "plants", ("tag", "name"))
        .expect("log -> plants");
    builder.build().expect("build factory schema")
}

type FactoryRows = (
    Vec<(String, i64)>,
    Vec<(String, String, i64)>,
    Vec<(String, String, i64, Option<String>)>,
    Vec<(i64, String)>,
);

fn factory_raw((plants, lines, shifts, log): FactoryRows) -> RawTicDat {
    RawTicDat::new()
        .with(
            "plants",
            RawTable::Keyed(
                plants
                    .into_iter()
                    .map(|(name, capacity)| (Key::from(name), RawRow::values([capacity])))
                    .collect(),
            ),
        )
        .with(
            "lines",
            RawTable::Keyed(
                lines
                    .into_iter()
                    .map(|(plant, line, speed)| (Key::from((plant, line)), RawRow::values([speed])))
                    .collect(),
            ),
        )
        .with(
            "shifts",
            RawTable::Keyed(
                shifts
                    .into_iter()
                    .map(|(plant, line, shift, supervisor)| {
                        (
                            Key::from((plant, line, shift)),
                            RawRow::Scalar(Value::from(supervisor)),
                        )
                    })
                    .collect(),
            ),
        )
        .with(
            "log",
            RawTable::Rows(
                log.into_iter()
                    .map(|(value, tag)| RawRow::values([Value::from(value), Value::from(tag)]))
                    .collect(),
            ),
        )
}

fn factory_rows() -> impl Strategy<Value = FactoryRows> {
    (plants_rows(), lines_rows(), shifts_rows(), log_rows())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn freezing_twice_matches_freezing_once(rows in factory_rows()) {
        let schema = factory_schema();
        let once = TicDat::from_raw(Arc::clone(&schema), factory_raw(rows.clone()))
            .expect("build")
            .frozen();
        let mut twice = TicDat::from_raw(schema, factory_raw(rows)).expect("build");
        twice.freeze();
        twice.freeze();

        prop_assert!(once.data_eq(&twice).expect("compare"));
        prop_assert!(twice.is_frozen());
        let err = twice
            .keyed_mut("plants")
            .expect("plants")
            .insert("z", RawRow::values([1]))
            .expect_err("frozen insert");
        prop_assert!(matches!(err, Error::Frozen(_)));
        prop_assert!(matches!(
            twice.sequence_mut("log").expect("log").push(RawRow::values([1, 2])),
            Err(Error::Frozen(_))
        ));
    }

    #[test]
    fn round_trip_through_raw_preserves_data(rows in factory_rows()) {
        let schema = factory_schema();
        let dat = TicDat::from_raw(Arc::clone(&schema), factory_raw(rows)).expect("build");
        let rebuilt = TicDat::from_raw(schema, dat.to_raw()).expect("rebuild");
        prop_assert!(dat.data_eq(&rebuilt).expect("compare"));
    }

    #[test]
    fn propagated_repair_is_a_fixed_point(rows in factory_rows()) {
        let mut dat = TicDat::from_raw(factory_schema(), factory_raw(rows)).expect("build");
        remove_foreign_key_failures(&mut dat, true).expect("repair");
        prop_assert!(find_foreign_key_failures(&dat, Verbosity::High, None)
            .expect("scan")
            .is_empty());
        prop_assert_eq!(remove_foreign_key_failures(&mut dat, true).expect("repair again"), 0);
    }

    #[test]
    fn validation_is_idempotent(rows in factory_rows(), cap in prop::option::of(0usize..6)) {
        let dat = TicDat::from_raw(factory_schema(), factory_raw(rows)).expect("build");
        let first = find_foreign_key_failures(&dat, Verbosity::High, cap).expect("scan");
        let second = find_foreign_key_failures(&dat, Verbosity::High, cap).expect("scan");
        prop_assert_eq!(&first, &second);
        if let Some(cap) = cap {
            let total: usize = first.values().map(|failure| failure.native_rows.len()).sum();
            prop_assert!(total <= cap);
        }
    }
}

/// Random acyclic chains of tables whose primary keys extend their parent's.
fn chain_depth() -> impl Strategy<Value = (usize, Vec<bool>)> {
    (2usize..6).prop_flat_map(|depth| (Just(depth), prop::collection::vec(any::<bool>(), depth)))
}

proptest! {
    #[test]
    fn cardinality_follows_primary_key(
        (depth, one_to_one) in chain_depth()
    ) {
        let mut builder = SchemaBuilder::new();
        let fields: Vec<String> = (0..depth).map(|idx| format!("k{idx}")).collect();
        for level in 0..depth {
            let pk: Vec<&str> = fields[..=level].iter().map(String::as_str).collect();
            builder.declare_table(&format!("t{level}"), &pk, &["v"]).expect("declare");
        }
        for level in 1..depth {
            let parent_pk: Vec<(&str, &str)> = fields[..level]
                .iter()
                .map(|field| (field.as_str(), field.as_str()))
                .collect();
            builder
                .add_foreign_key(&format!("t{level}"), &format!("t{}", level - 1), parent_pk)
                .expect("chain fk");
        }
        // one-to-one side tables hanging off each level
        for (level, flag) in one_to_one.iter().enumerate() {
            if *flag {
                let pk: Vec<&str> = fields[..=level].iter().map(String::as_str).collect();
                let side = format!("side{level}");
                builder.declare_table(&side, &pk, &["note"]).expect("declare side");
                let mapping: Vec<(&str, &str)> = pk.iter().map(|field| (*field, *field)).collect();
                builder
                    .add_foreign_key(&side, &format!("t{level}"), mapping)
                    .expect("side fk");
            }
        }
        let schema = builder.build().expect("build");

        for fk in schema.foreign_keys() {
            let native_pk = schema.primary_key_fields(&fk.native_table).expect("native");
            let mut mapped: Vec<&str> = fk.native_fields().collect();
            let mut pk: Vec<&str> = native_pk.iter().map(String::as_str).collect();
            mapped.sort_unstable();
            pk.sort_unstable();
            let expected = if mapped == pk {
                Cardinality::OneToOne
            } else {
                Cardinality::ManyToOne
            };
            prop_assert_eq!(fk.cardinality, expected);
        }

        // every ancestor is reachable from the deepest level
        let derived = schema
            .foreign_keys()
            .iter()
            .filter(|fk| fk.native_table == format!("t{}", depth - 1) && fk.derived)
            .count();
        prop_assert_eq!(derived, depth.saturating_sub(2));

        // rebuilding from the declared keys adds exactly the same closure
        let rebuilt = schema.to_builder().build().expect("rebuild");
        prop_assert_eq!(rebuilt.foreign_keys(), schema.foreign_keys());
    }
}
