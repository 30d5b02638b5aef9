use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use ticdat_core::{
    find_foreign_key_failures, DataType, Key, RawRow, RawTable, RawTicDat, Schema, SchemaBuilder,
    TicDat, Value, Verbosity,
};
use ticdat_io::{csv, json, IoError};

fn netflow_schema() -> Arc<Schema> {
    let mut builder = SchemaBuilder::new();
    builder
        .declare_table("nodes", &["name"], &[])
        .expect("nodes")
        .declare_table("arcs", &["source", "destination"], &["capacity"])
        .expect("arcs")
        .declare_table("notes", &[], &["text", "weight"])
        .expect("notes")
        .add_foreign_key("arcs", "nodes", ("source", "name"))
        .expect("source fk")
        .add_foreign_key("arcs", "nodes", ("destination", "name"))
        .expect("destination fk")
        .set_data_type("arcs", "capacity", DataType::number().nullable())
        .expect("capacity type")
        .set_data_type("notes", "text", DataType::text())
        .expect("text type");
    builder.build().expect("build")
}

fn netflow_data(schema: &Arc<Schema>) -> TicDat {
    TicDat::from_raw(
        Arc::clone(schema),
        RawTicDat::new()
            .with(
                "nodes",
                RawTable::Keyed(vec![
                    (Key::from("Detroit"), RawRow::empty()),
                    (Key::from("Boston"), RawRow::empty()),
                ]),
            )
            .with(
                "arcs",
                RawTable::Keyed(vec![
                    (Key::from(("Detroit", "Boston")), RawRow::values([100])),
                    (Key::from(("Boston", "Denver")), RawRow::Scalar(Value::Null)),
                ]),
            )
            .with(
                "notes",
                RawTable::Rows(vec![
                    RawRow::values([Value::from("42"), Value::Float(0.5)]),
                    RawRow::values([Value::from("hello, world"), Value::Int(1)]),
                ]),
            ),
    )
    .expect("build data")
}

#[test]
fn csv_directory_round_trip() {
    let schema = netflow_schema();
    let dat = netflow_data(&schema);
    let dir = tempdir().expect("tempdir");

    csv::write_directory(&dat, dir.path()).expect("write");
    let header = fs::read_to_string(dir.path().join("arcs.csv")).expect("arcs.csv");
    assert!(header.starts_with("source,destination,capacity"));

    let again = csv::read_directory(&schema, dir.path()).expect("read");
    assert!(dat.data_eq(&again).expect("compare"));

    // text typed cells stay text even when they look numeric
    let notes = again.sequence("notes").expect("notes");
    assert_eq!(notes.get(0).expect("row")["text"], Value::from("42"));

    let failures = find_foreign_key_failures(&again, Verbosity::High, None).expect("fk scan");
    assert_eq!(failures.len(), 1);
}

#[test]
fn missing_files_are_empty_tables() {
    let schema = netflow_schema();
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("nodes.csv"), "name\nDetroit\n").expect("write nodes");

    let dat = csv::read_directory(&schema, dir.path()).expect("read");
    assert_eq!(dat.keyed("nodes").expect("nodes").len(), 1);
    assert!(dat.keyed("arcs").expect("arcs").is_empty());
}

#[test]
fn omitted_data_columns_take_defaults() {
    let schema = netflow_schema();
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("arcs.csv"), "destination,source\nBoston,Detroit\n")
        .expect("write arcs");

    let dat = csv::read_directory(&schema, dir.path()).expect("read");
    let row = dat
        .keyed("arcs")
        .expect("arcs")
        .get(("Detroit", "Boston"))
        .expect("row")
        .clone();
    assert_eq!(row["capacity"], Value::Int(0));
}

#[test]
fn bad_headers_are_format_errors() {
    let schema = netflow_schema();
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("arcs.csv"), "source,capacity\nDetroit,3\n").expect("write arcs");
    let err = csv::read_directory(&schema, dir.path()).expect_err("missing pk column");
    assert!(matches!(err, IoError::Format { .. }));

    fs::write(dir.path().join("arcs.csv"), "source,destination,cost\nA,B,1\n").expect("write arcs");
    let err = csv::read_directory(&schema, dir.path()).expect_err("unknown column");
    assert!(err.to_string().contains("unrecognized column: cost"));
}

#[test]
fn json_file_round_trip() {
    let schema = netflow_schema();
    let dat = netflow_data(&schema);
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("netflow.json");

    json::write_file(&dat, &path).expect("write");
    let again = json::read_file(&schema, &path).expect("read");
    assert!(dat.data_eq(&again).expect("compare"));
}

#[test]
fn repeated_keys_in_a_file_are_rejected() {
    let schema = netflow_schema();
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("arcs.csv"),
        "source,destination,capacity\nDetroit,Boston,3\nDetroit,Boston,99\n",
    )
    .expect("write arcs");

    let err = csv::read_directory(&schema, dir.path()).expect_err("repeated key");
    assert!(matches!(err, IoError::Core(_)));
    assert!(err.to_string().contains("duplicate primary key"));
}
