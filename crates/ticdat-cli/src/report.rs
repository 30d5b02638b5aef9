use chrono::{DateTime, Utc};
use serde::Serialize;
use ticdat_core::{
    find_data_row_failures, find_data_type_failures, find_duplicates, find_foreign_key_failures,
    Cardinality, DataTypeFailure, ExceptionHandling, FieldPair, ForeignKeyFailure, Keep,
    RowFailure, TicDat, Value, Verbosity,
};

/// Options shared by every check of a report.
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub max_failures: Option<usize>,
    pub verbosity: Verbosity,
    pub exception_handling: ExceptionHandling,
    pub keep: Keep,
}

#[derive(Debug, Serialize)]
pub struct DataTypeEntry {
    pub table: String,
    pub field: String,
    #[serde(flatten)]
    pub failure: DataTypeFailure,
}

#[derive(Debug, Serialize)]
pub struct ForeignKeyEntry {
    pub native_table: String,
    pub foreign_table: String,
    pub mapping: Vec<FieldPair>,
    pub cardinality: Cardinality,
    pub derived: bool,
    #[serde(flatten)]
    pub failure: ForeignKeyFailure,
}

#[derive(Debug, Serialize)]
pub struct PredicateEntry {
    pub table: String,
    pub predicate: String,
    pub rows: Vec<RowFailure>,
}

#[derive(Debug, Serialize)]
pub struct DuplicateEntry {
    pub table: String,
    pub values: Vec<Value>,
    pub count: usize,
}

/// Every failure found in one dataset, flattened for printing.
#[derive(Debug, Serialize)]
pub struct DataReport {
    pub generated_at: DateTime<Utc>,
    pub data_type_failures: Vec<DataTypeEntry>,
    pub foreign_key_failures: Vec<ForeignKeyEntry>,
    pub predicate_failures: Vec<PredicateEntry>,
    pub duplicates: Vec<DuplicateEntry>,
}

impl DataReport {
    pub fn collect(dat: &TicDat, options: &ReportOptions) -> ticdat_core::Result<Self> {
        let data_type_failures = find_data_type_failures(dat, options.max_failures)?
            .into_iter()
            .map(|(table_field, failure)| DataTypeEntry {
                table: table_field.table,
                field: table_field.field,
                failure,
            })
            .collect();

        let foreign_key_failures =
            find_foreign_key_failures(dat, options.verbosity, options.max_failures)?
                .into_iter()
                .map(|(fk, failure)| ForeignKeyEntry {
                    native_table: fk.native_table,
                    foreign_table: fk.foreign_table,
                    mapping: fk.mapping,
                    cardinality: fk.cardinality,
                    derived: fk.derived,
                    failure,
                })
                .collect();

        let predicate_failures =
            find_data_row_failures(dat, options.exception_handling, options.max_failures)?
                .into_iter()
                .map(|(table_predicate, rows)| PredicateEntry {
                    table: table_predicate.table,
                    predicate: table_predicate.predicate,
                    rows,
                })
                .collect();

        let mut duplicates = Vec::new();
        for (table, groups) in find_duplicates(dat, options.keep)? {
            for (values, count) in groups {
                duplicates.push(DuplicateEntry {
                    table: table.clone(),
                    values,
                    count,
                });
            }
        }

        let report = Self {
            generated_at: Utc::now(),
            data_type_failures,
            foreign_key_failures,
            predicate_failures,
            duplicates,
        };
        tracing::info!(
            event = "report_collected",
            data_type = report.data_type_failures.len(),
            foreign_key = report.foreign_key_failures.len(),
            predicate = report.predicate_failures.len(),
            duplicates = report.duplicates.len()
        );
        Ok(report)
    }

    /// Failing rows across all checks.
    pub fn failure_count(&self) -> usize {
        self.data_type_failures
            .iter()
            .map(|entry| entry.failure.rows.len())
            .chain(
                self.foreign_key_failures
                    .iter()
                    .map(|entry| entry.failure.native_rows.len()),
            )
            .chain(self.predicate_failures.iter().map(|entry| entry.rows.len()))
            .chain(self.duplicates.iter().map(|entry| entry.count))
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }
}
