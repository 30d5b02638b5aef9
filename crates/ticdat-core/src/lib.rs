//! Schema-driven tabular data for optimization models.
//!
//! A [`SchemaBuilder`] declares tables, primary keys, data types, foreign keys
//! and row predicates, then builds an immutable [`Schema`]. A [`TicDat`]
//! holds the rows of every table, and the validation functions report data
//! type, foreign key, predicate and duplicate failures as plain data.

pub mod container;
pub mod error;
pub mod foreign_keys;
pub mod graph;
pub mod links;
pub mod predicates;
pub mod repair;
pub mod row;
pub mod schema;
pub mod spec;
pub mod table;
pub mod types;
pub mod validation;
pub mod value;

pub use container::{RawTicDat, TicDat};
pub use error::{Error, Result};
pub use foreign_keys::{Cardinality, FieldMapping, FieldPair, ForeignKey};
pub use graph::{build_fk_graph_report, FkGraphReport, FkGraphSummary};
pub use links::LinkIndex;
pub use predicates::{
    FailureResponse, KwargsMaker, PredicateArgs, PredicateError, RowPredicate, Verdict,
};
pub use repair::{remove_foreign_key_failures, replace_data_type_failures};
pub use row::{RawRow, Row, RowView};
pub use schema::{Schema, SchemaBuilder, TableSchema, TableShape, RESERVED_PREFIX};
pub use spec::{
    check_spec, schema_spec_json_schema, validate_spec_json, ForeignKeySpec, IssueSeverity,
    SchemaSpec, TableSpec, ValidationIssue, ValidationReport,
};
pub use table::{GeneratorTable, KeyedTable, RawTable, RowGenerator, RowRef, RowsTable, Table};
pub use types::{DataType, StringsAllowed};
pub use validation::{
    duplicate_flags, find_data_row_failures, find_data_type_failures, find_duplicates,
    find_foreign_key_failures, DataTypeFailure, ExceptionHandling, ForeignKeyFailure, Keep,
    RowFailure, TableField, TablePredicate, Verbosity,
};
pub use value::{parse_datetime, Key, Value};
