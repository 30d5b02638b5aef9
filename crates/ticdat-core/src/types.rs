use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Which text values a field accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StringsAllowed {
    #[default]
    None,
    Any,
    Only(BTreeSet<String>),
}

impl StringsAllowed {
    pub fn only<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StringsAllowed::Only(values.into_iter().map(Into::into).collect())
    }

    fn allows(&self, text: &str) -> bool {
        match self {
            StringsAllowed::None => false,
            StringsAllowed::Any => true,
            StringsAllowed::Only(values) => values.contains(text),
        }
    }
}

/// Domain of legal values for one field.
///
/// `None` bounds are unbounded; an unbounded side admits the matching
/// infinity only when it is inclusive. The default admits finite
/// non-negative numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DataType {
    pub number_allowed: bool,
    pub min: Option<f64>,
    pub inclusive_min: bool,
    pub max: Option<f64>,
    pub inclusive_max: bool,
    pub must_be_int: bool,
    pub strings_allowed: StringsAllowed,
    pub nullable: bool,
    pub datetime: bool,
}

impl Default for DataType {
    fn default() -> Self {
        Self {
            number_allowed: true,
            min: Some(0.0),
            inclusive_min: true,
            max: None,
            inclusive_max: false,
            must_be_int: false,
            strings_allowed: StringsAllowed::None,
            nullable: false,
            datetime: false,
        }
    }
}

impl DataType {
    /// Non-negative numbers.
    pub fn number() -> Self {
        Self::default()
    }

    /// Any text, no numbers.
    pub fn text() -> Self {
        Self {
            number_allowed: false,
            strings_allowed: StringsAllowed::Any,
            ..Self::default()
        }
    }

    /// A closed set of literal strings, no numbers.
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            number_allowed: false,
            strings_allowed: StringsAllowed::only(values),
            ..Self::default()
        }
    }

    /// Date-time values (or text that parses as one).
    pub fn datetime() -> Self {
        Self {
            number_allowed: false,
            datetime: true,
            ..Self::default()
        }
    }

    pub fn with_min(mut self, min: f64, inclusive: bool) -> Self {
        self.min = if min.is_infinite() { None } else { Some(min) };
        self.inclusive_min = inclusive;
        self
    }

    pub fn with_max(mut self, max: f64, inclusive: bool) -> Self {
        self.max = if max.is_infinite() { None } else { Some(max) };
        self.inclusive_max = inclusive;
        self
    }

    /// Any finite number.
    pub fn unbounded(mut self) -> Self {
        self.min = None;
        self.inclusive_min = false;
        self.max = None;
        self.inclusive_max = false;
        self
    }

    pub fn integer(mut self) -> Self {
        self.must_be_int = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_strings(mut self, strings_allowed: StringsAllowed) -> Self {
        self.strings_allowed = strings_allowed;
        self
    }

    /// Check the descriptor itself is coherent.
    pub fn validate(&self) -> Result<()> {
        if !self.number_allowed
            && self.strings_allowed == StringsAllowed::None
            && !self.nullable
            && !self.datetime
        {
            return Err(Error::InvalidSchema(
                "data type admits no values at all".to_string(),
            ));
        }

        for bound in [self.min, self.max].into_iter().flatten() {
            if bound.is_nan() {
                return Err(Error::InvalidSchema(
                    "data type bounds cannot be NaN".to_string(),
                ));
            }
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::InvalidSchema(format!(
                    "data type min {min} is greater than max {max}"
                )));
            }
            if min == max && !(self.inclusive_min && self.inclusive_max) {
                return Err(Error::InvalidSchema(format!(
                    "data type with min == max == {min} must be inclusive on both ends"
                )));
            }
        }

        Ok(())
    }

    /// Whether `value` lies in this domain.
    pub fn valid_data(&self, value: &Value) -> bool {
        match value {
            Value::Null => self.nullable,
            Value::DateTime(_) => self.datetime,
            Value::Text(text) => {
                self.strings_allowed.allows(text) || (self.datetime && value.as_datetime().is_some())
            }
            other => match other.as_number() {
                Some(number) => self.number_allowed && self.number_in_range(number),
                None => false,
            },
        }
    }

    fn number_in_range(&self, number: f64) -> bool {
        if number.is_nan() {
            return false;
        }
        match self.min {
            Some(min) => {
                if number < min || (!self.inclusive_min && number == min) {
                    return false;
                }
            }
            None => {
                if number == f64::NEG_INFINITY && !self.inclusive_min {
                    return false;
                }
            }
        }
        match self.max {
            Some(max) => {
                if number > max || (!self.inclusive_max && number == max) {
                    return false;
                }
            }
            None => {
                if number == f64::INFINITY && !self.inclusive_max {
                    return false;
                }
            }
        }
        !self.must_be_int || number.fract() == 0.0
    }
}
