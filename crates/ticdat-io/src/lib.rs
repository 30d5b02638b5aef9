//! Readers and writers that move [`ticdat_core::TicDat`] data in and out of
//! CSV directories and JSON files.

pub mod cell;
pub mod csv;
pub mod error;
pub mod json;

pub use error::{IoError, Result};

use ticdat_core::{Schema, TicDat};

/// Tables in the order a writer should emit them: parents first when the
/// foreign keys allow it, declaration order otherwise.
pub(crate) fn write_order(schema: &Schema) -> Vec<String> {
    match schema.table_order() {
        Ok(order) => order,
        Err(err) => {
            tracing::warn!(event = "table_order_unavailable", error = %err);
            schema.table_names().map(str::to_string).collect()
        }
    }
}

/// Primary key fields followed by data fields.
pub(crate) fn header(dat: &TicDat, table: &str) -> Result<Vec<String>> {
    let schema = dat.schema().table_schema(table)?;
    Ok(schema.all_fields().map(str::to_string).collect())
}
