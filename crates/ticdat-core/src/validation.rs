use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::container::TicDat;
use crate::error::{Error, Result};
use crate::foreign_keys::ForeignKey;
use crate::predicates::{FailureResponse, PredicateArgs, Verdict};
use crate::row::RowView;
use crate::schema::TableShape;
use crate::table::{RowRef, Table};
use crate::types::DataType;
use crate::value::{Key, Value};

/// How much detail foreign key failures carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Failing rows and the unmatched values.
    #[default]
    High,
    /// Failing rows only.
    Low,
}

/// What to do when a predicate or its argument maker raises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionHandling {
    #[default]
    Propagate,
    TreatAsFailure,
}

/// Which occurrences of a duplicate group are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    /// Every occurrence but the first.
    #[default]
    First,
    /// Every occurrence but the last.
    Last,
    /// Every occurrence.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableField {
    pub table: String,
    pub field: String,
}

impl TableField {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for TableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}

/// Rows of one field whose values fall outside its data type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataTypeFailure {
    /// Distinct offending values, sorted.
    pub bad_values: Vec<Value>,
    pub rows: Vec<RowRef>,
}

/// Native rows whose mapped values have no matching foreign row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForeignKeyFailure {
    pub native_rows: Vec<RowRef>,
    /// Distinct unmatched value tuples; empty at low verbosity.
    pub native_values: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TablePredicate {
    pub table: String,
    pub predicate: String,
}

impl fmt::Display for TablePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.predicate)
    }
}

/// One row rejected by a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row: RowRef,
    pub message: Option<String>,
}

/// Cap per group so that the total stays within `max`, filling the smallest
/// groups first.
fn allowances<K: Ord + Clone>(sizes: &BTreeMap<K, usize>, max: Option<usize>) -> BTreeMap<K, usize> {
    let Some(max) = max else {
        return sizes.clone();
    };
    let mut ordered: Vec<(&K, usize)> = sizes.iter().map(|(key, size)| (key, *size)).collect();
    ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let mut remaining = max;
    let mut out = BTreeMap::new();
    for (key, size) in ordered {
        if remaining == 0 {
            break;
        }
        let take = size.min(remaining);
        remaining -= take;
        out.insert(key.clone(), take);
    }
    out
}

/// Values of every field with a data type that its type rejects.
pub fn find_data_type_failures(
    dat: &TicDat,
    max_failures: Option<usize>,
) -> Result<BTreeMap<TableField, DataTypeFailure>> {
    let mut found: BTreeMap<TableField, Vec<(RowRef, Value)>> = BTreeMap::new();

    for table in dat.tables() {
        let schema = table.schema();
        let checks: Vec<(String, Option<usize>, Option<usize>, &DataType)> = schema
            .data_types()
            .iter()
            .map(|(field, data_type)| {
                let pk_idx = schema.primary_key_fields().iter().position(|f| f == field);
                let data_idx = schema.data_fields().iter().position(|f| f == field);
                (field.clone(), pk_idx, data_idx, data_type)
            })
            .collect();
        if checks.is_empty() {
            continue;
        }

        table.try_for_each_row(|at, row| {
            for (field, pk_idx, data_idx, data_type) in &checks {
                let value = match (pk_idx, data_idx, at.key()) {
                    (Some(idx), _, Some(key)) => key.values().get(*idx),
                    (_, Some(idx), _) => row.values().get(*idx),
                    _ => None,
                };
                let Some(value) = value else {
                    continue;
                };
                if !data_type.valid_data(value) {
                    found
                        .entry(TableField::new(schema.name(), field.clone()))
                        .or_default()
                        .push((at.to_ref(), value.clone()));
                }
            }
            Ok(())
        })?;
    }

    let sizes: BTreeMap<_, usize> = found.iter().map(|(key, rows)| (key.clone(), rows.len())).collect();
    let allowed = allowances(&sizes, max_failures);

    Ok(found
        .into_iter()
        .filter_map(|(key, mut rows)| {
            let take = *allowed.get(&key)?;
            rows.truncate(take);
            let bad_values: BTreeSet<Value> = rows.iter().map(|(_, value)| value.clone()).collect();
            Some((
                key,
                DataTypeFailure {
                    bad_values: bad_values.into_iter().collect(),
                    rows: rows.into_iter().map(|(row, _)| row).collect(),
                },
            ))
        })
        .collect())
}

/// Native rows, per foreign key, whose mapped values match no foreign row.
/// Rows with a null in any mapped field are not checked.
pub fn find_foreign_key_failures(
    dat: &TicDat,
    verbosity: Verbosity,
    max_failures: Option<usize>,
) -> Result<BTreeMap<ForeignKey, ForeignKeyFailure>> {
    let mut found: BTreeMap<ForeignKey, Vec<(RowRef, Key)>> = BTreeMap::new();

    for fk in dat.schema().foreign_keys() {
        let native = dat.table(&fk.native_table)?;
        let foreign = match dat.table(&fk.foreign_table)? {
            Table::Keyed(foreign) => foreign,
            _ => continue,
        };
        let schema = native.schema();
        let positions: Vec<(Option<usize>, Option<usize>)> = fk
            .native_fields()
            .map(|field| {
                (
                    schema.primary_key_fields().iter().position(|f| f == field),
                    schema.data_fields().iter().position(|f| f == field),
                )
            })
            .collect();

        native.try_for_each_row(|at, row| {
            let values: Option<Vec<Value>> = positions
                .iter()
                .map(|(pk_idx, data_idx)| {
                    let value = match (pk_idx, data_idx, at.key()) {
                        (Some(idx), _, Some(key)) => key.values().get(*idx),
                        (_, Some(idx), _) => row.values().get(*idx),
                        _ => None,
                    };
                    value.filter(|value| !value.is_null()).cloned()
                })
                .collect();
            let Some(values) = values else {
                return Ok(());
            };
            let target = Key::from_values(values);
            if !foreign.contains_key(&target) {
                found.entry(fk.clone()).or_default().push((at.to_ref(), target));
            }
            Ok(())
        })?;
    }

    let sizes: BTreeMap<_, usize> = found.iter().map(|(key, rows)| (key.clone(), rows.len())).collect();
    let allowed = allowances(&sizes, max_failures);

    Ok(found
        .into_iter()
        .filter_map(|(fk, mut rows)| {
            let take = *allowed.get(&fk)?;
            rows.truncate(take);
            let native_values = match verbosity {
                Verbosity::High => rows
                    .iter()
                    .map(|(_, key)| key.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                Verbosity::Low => Vec::new(),
            };
            Some((
                fk,
                ForeignKeyFailure {
                    native_rows: rows.into_iter().map(|(row, _)| row).collect(),
                    native_values,
                },
            ))
        })
        .collect())
}

/// Rows rejected by each row predicate.
///
/// Argument makers run at most once per call; predicates sharing a maker
/// share its result.
pub fn find_data_row_failures(
    dat: &TicDat,
    exception_handling: ExceptionHandling,
    max_failures: Option<usize>,
) -> Result<BTreeMap<TablePredicate, Vec<RowFailure>>> {
    let schema = dat.schema();
    let empty_args = PredicateArgs::new();

    let mut made: HashMap<usize, std::result::Result<PredicateArgs, String>> = HashMap::new();
    for (table, predicate) in schema.all_row_predicates() {
        let Some(maker) = predicate.kwargs_maker() else {
            continue;
        };
        if made.contains_key(&maker.id()) {
            continue;
        }
        let outcome = match maker.make(dat) {
            Ok(args) => Ok(args),
            Err(err) => match exception_handling {
                ExceptionHandling::Propagate => {
                    return Err(Error::Predicate {
                        table: table.to_string(),
                        predicate: predicate.name().to_string(),
                        message: err.to_string(),
                    });
                }
                ExceptionHandling::TreatAsFailure => Err(err.to_string()),
            },
        };
        made.insert(maker.id(), outcome);
    }

    let mut found: BTreeMap<TablePredicate, Vec<RowFailure>> = BTreeMap::new();
    for (table_name, predicate) in schema.all_row_predicates() {
        let table = dat.table(table_name)?;
        let key = TablePredicate {
            table: table_name.to_string(),
            predicate: predicate.name().to_string(),
        };
        let args = match predicate.kwargs_maker().and_then(|maker| made.get(&maker.id())) {
            Some(Ok(args)) => Ok(args),
            Some(Err(message)) => Err(message.clone()),
            None => Ok(&empty_args),
        };

        let mut failures = Vec::new();
        table.try_for_each_row(|at, row| {
            let args = match &args {
                Ok(args) => *args,
                Err(message) => {
                    failures.push(RowFailure {
                        row: at.to_ref(),
                        message: Some(message.clone()),
                    });
                    return Ok(());
                }
            };
            let view = RowView::new(at.key(), row);
            let failure = match predicate.evaluate(&view, args) {
                Ok(Verdict::Pass) => None,
                Ok(verdict) => Some(match predicate.failure_response() {
                    FailureResponse::Boolean => None,
                    FailureResponse::ErrorMessage => verdict.message().map(str::to_string),
                }),
                Err(err) => match exception_handling {
                    ExceptionHandling::Propagate => {
                        return Err(Error::Predicate {
                            table: table_name.to_string(),
                            predicate: predicate.name().to_string(),
                            message: err.to_string(),
                        });
                    }
                    ExceptionHandling::TreatAsFailure => Some(Some(err.to_string())),
                },
            };
            if let Some(message) = failure {
                failures.push(RowFailure {
                    row: at.to_ref(),
                    message,
                });
            }
            Ok(())
        })?;

        if !failures.is_empty() {
            found.insert(key, failures);
        }
    }

    let sizes: BTreeMap<_, usize> = found.iter().map(|(key, rows)| (key.clone(), rows.len())).collect();
    let allowed = allowances(&sizes, max_failures);
    Ok(found
        .into_iter()
        .filter_map(|(key, mut rows)| {
            rows.truncate(*allowed.get(&key)?);
            Some((key, rows))
        })
        .collect())
}

fn keyless_tables(dat: &TicDat) -> impl Iterator<Item = &Table> {
    dat.tables().filter(|table| table.shape() != TableShape::Keyed)
}

/// Duplicated rows of keyless tables. Each group maps to the number of rows
/// `keep` reports for it. Tables without duplicates are left out.
pub fn find_duplicates(
    dat: &TicDat,
    keep: Keep,
) -> Result<BTreeMap<String, BTreeMap<Vec<Value>, usize>>> {
    let mut out = BTreeMap::new();
    for table in keyless_tables(dat) {
        let mut counts: BTreeMap<Vec<Value>, usize> = BTreeMap::new();
        for values in table.full_tuples()? {
            *counts.entry(values).or_default() += 1;
        }
        let duplicates: BTreeMap<Vec<Value>, usize> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(values, count)| match keep {
                Keep::First | Keep::Last => (values, count - 1),
                Keep::None => (values, count),
            })
            .collect();
        if !duplicates.is_empty() {
            out.insert(table.name().to_string(), duplicates);
        }
    }
    Ok(out)
}

/// Per keyless table, one flag per row marking the duplicates `keep` reports.
pub fn duplicate_flags(dat: &TicDat, keep: Keep) -> Result<BTreeMap<String, Vec<bool>>> {
    let mut out = BTreeMap::new();
    for table in keyless_tables(dat) {
        let tuples = table.full_tuples()?;
        let mut counts: HashMap<&[Value], usize> = HashMap::new();
        for values in &tuples {
            *counts.entry(values.as_slice()).or_default() += 1;
        }

        let mut seen: HashMap<&[Value], usize> = HashMap::new();
        let flags = tuples
            .iter()
            .map(|values| {
                let total = counts[values.as_slice()];
                let position = seen.entry(values.as_slice()).or_default();
                *position += 1;
                total > 1
                    && match keep {
                        Keep::First => *position > 1,
                        Keep::Last => *position < total,
                        Keep::None => true,
                    }
            })
            .collect();
        out.insert(table.name().to_string(), flags);
    }
    Ok(out)
}
