use std::collections::BTreeMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use schemars::schema::RootSchema;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::foreign_keys::{FieldMapping, FieldPair};
use crate::schema::{Schema, SchemaBuilder, TableShape};
use crate::types::DataType;
use crate::value::Value;

/// Serializable description of a schema. Row predicates are code and are
/// not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SchemaSpec {
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub primary_key_fields: Vec<String>,
    #[serde(default)]
    pub data_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub generator: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_types: BTreeMap<String, DataType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeySpec {
    pub native_table: String,
    pub foreign_table: String,
    pub mappings: Vec<FieldPair>,
}

/// Emit the JSON Schema of [`SchemaSpec`] documents.
pub fn schema_spec_json_schema() -> RootSchema {
    schema_for!(SchemaSpec)
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// Structured validation issue with location and hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub path: String,
    pub message: String,
    pub hint: Option<String>,
}

impl ValidationIssue {
    pub fn new(
        severity: IssueSeverity,
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            path: path.into(),
            message: message.into(),
            hint,
        }
    }
}

/// Aggregated validation report with errors and warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns true when there are no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    pub fn push_warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }
}

fn normalized_json_pointer(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Validate a JSON document against the [`SchemaSpec`] JSON Schema.
pub fn validate_spec_json(spec_json: &serde_json::Value) -> Result<ValidationReport> {
    let schema_json = serde_json::to_value(schema_spec_json_schema())
        .map_err(|err| Error::InvalidSchema(err.to_string()))?;
    let compiled =
        JSONSchema::compile(&schema_json).map_err(|err| Error::InvalidSchema(err.to_string()))?;

    let mut report = ValidationReport::default();
    if let Err(errors) = compiled.validate(spec_json) {
        for error in errors {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "schema_violation",
                normalized_json_pointer(&error.instance_path.to_string()),
                error.to_string(),
                None,
            ));
        }
    }
    Ok(report)
}

/// Validate a JSON document and, when it is well formed, check that it
/// builds into a schema.
pub fn check_spec(spec_json: &serde_json::Value) -> Result<ValidationReport> {
    let mut report = validate_spec_json(spec_json)?;
    if !report.is_ok() {
        return Ok(report);
    }

    let spec: SchemaSpec = match serde_json::from_value(spec_json.clone()) {
        Ok(spec) => spec,
        Err(err) => {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "invalid_spec_json",
                "/",
                err.to_string(),
                None,
            ));
            return Ok(report);
        }
    };

    match SchemaBuilder::from_spec(&spec).and_then(SchemaBuilder::build) {
        Ok(schema) => {
            if let Err(Error::CyclicForeignKeys(tables)) = schema.table_order() {
                report.push_warning(ValidationIssue::new(
                    IssueSeverity::Warning,
                    "cyclic_foreign_keys",
                    "/foreign_keys",
                    format!("foreign keys form a cycle through: {}", tables.join(", ")),
                    Some("writers that need parent tables first cannot order this schema".to_string()),
                ));
            }
            for table in &spec.tables {
                for (field, value) in &table.default_values {
                    let Some(data_type) = table.data_types.get(field) else {
                        continue;
                    };
                    if !data_type.valid_data(value) {
                        report.push_warning(ValidationIssue::new(
                            IssueSeverity::Warning,
                            "default_fails_data_type",
                            format!("/tables/{}/default_values/{field}", table.name),
                            format!("default {value} of {}.{field} fails its data type", table.name),
                            None,
                        ));
                    }
                }
            }
        }
        Err(err) => report.push_error(ValidationIssue::new(
            IssueSeverity::Error,
            "invalid_schema",
            "/",
            err.to_string(),
            None,
        )),
    }
    Ok(report)
}

impl SchemaBuilder {
    /// Start a builder from a serializable description.
    pub fn from_spec(spec: &SchemaSpec) -> Result<Self> {
        let mut builder = SchemaBuilder::new();
        for table in &spec.tables {
            let pk: Vec<&str> = table.primary_key_fields.iter().map(String::as_str).collect();
            let data: Vec<&str> = table.data_fields.iter().map(String::as_str).collect();
            builder.declare_table(&table.name, &pk, &data)?;
            for (field, value) in &table.default_values {
                builder.set_default_value(&table.name, field, value.clone())?;
            }
            for (field, data_type) in &table.data_types {
                builder.set_data_type(&table.name, field, data_type.clone())?;
            }
        }

        let generators: Vec<&str> = spec
            .tables
            .iter()
            .filter(|table| table.generator)
            .map(|table| table.name.as_str())
            .collect();
        if !generators.is_empty() {
            builder.set_generator_tables(&generators)?;
        }

        for fk in &spec.foreign_keys {
            builder.add_foreign_key(
                &fk.native_table,
                &fk.foreign_table,
                FieldMapping::from(fk.mappings.as_slice()),
            )?;
        }
        Ok(builder)
    }
}

impl Schema {
    /// Serializable description of the declared tables and foreign keys.
    pub fn to_spec(&self) -> SchemaSpec {
        let tables = self
            .table_schemas()
            .values()
            .map(|table| TableSpec {
                name: table.name().to_string(),
                primary_key_fields: table.primary_key_fields().to_vec(),
                data_fields: table.data_fields().to_vec(),
                generator: table.shape() == TableShape::Generator,
                default_values: table.explicit_default_values().clone(),
                data_types: table.data_types().clone(),
            })
            .collect();
        let foreign_keys = self
            .foreign_keys()
            .iter()
            .filter(|fk| !fk.derived)
            .map(|fk| ForeignKeySpec {
                native_table: fk.native_table.clone(),
                foreign_table: fk.foreign_table.clone(),
                mappings: fk.mapping.clone(),
            })
            .collect();
        SchemaSpec {
            tables,
            foreign_keys,
        }
    }
}

impl SchemaSpec {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::InvalidSchema(err.to_string()))
    }

    pub fn build(&self) -> Result<Arc<Schema>> {
        SchemaBuilder::from_spec(self)?.build()
    }
}
