use ticdat_core::{parse_datetime, DataType, Value};

/// Interpret one text cell, guided by the field's data type when it has one.
///
/// Without a type, empty cells are null and numeric text becomes a number.
/// With a type, numbers are only parsed when the type admits numbers and
/// date-times only when it admits date-times.
pub fn parse_cell(text: &str, data_type: Option<&DataType>) -> Value {
    let trimmed = text.trim();
    let Some(data_type) = data_type else {
        if trimmed.is_empty() {
            return Value::Null;
        }
        return parse_number(trimmed).unwrap_or_else(|| Value::Text(text.to_string()));
    };

    if data_type.nullable && (trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null")) {
        return Value::Null;
    }
    if data_type.number_allowed {
        if let Some(number) = parse_number(trimmed) {
            return number;
        }
    }
    if data_type.datetime {
        if let Some(value) = parse_datetime(trimmed) {
            return Value::DateTime(value);
        }
    }
    Value::Text(text.to_string())
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(value) = text.parse::<i64>() {
        return Some(Value::Int(value));
    }
    match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => return Some(Value::Float(f64::INFINITY)),
        "-inf" | "-infinity" => return Some(Value::Float(f64::NEG_INFINITY)),
        "nan" => return None,
        _ => {}
    }
    text.parse::<f64>().ok().map(Value::Float)
}

/// Text form of a value for a CSV cell. Null is the empty cell.
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(value) => value.to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => {
            if value.is_infinite() {
                if *value > 0.0 { "inf".to_string() } else { "-inf".to_string() }
            } else {
                value.to_string()
            }
        }
        Value::Text(value) => value.clone(),
        Value::DateTime(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_cells() {
        assert_eq!(parse_cell("", None), Value::Null);
        assert_eq!(parse_cell("12", None), Value::Int(12));
        assert_eq!(parse_cell("2.5", None), Value::Float(2.5));
        assert_eq!(parse_cell("pizza", None), Value::from("pizza"));
    }

    #[test]
    fn typed_cells_follow_the_type() {
        let text = DataType::text();
        assert_eq!(parse_cell("12", Some(&text)), Value::from("12"));

        let nullable = DataType::number().nullable();
        assert_eq!(parse_cell("", Some(&nullable)), Value::Null);
        assert_eq!(parse_cell("inf", Some(&nullable)), Value::Float(f64::INFINITY));

        let when = DataType::datetime();
        assert!(matches!(parse_cell("2024-05-01 08:00:00", Some(&when)), Value::DateTime(_)));
    }

    #[test]
    fn formatting_round_trips_numbers() {
        for value in [Value::Int(3), Value::Float(2.5), Value::Float(f64::NEG_INFINITY)] {
            assert_eq!(parse_cell(&format_cell(&value), None), value);
        }
        assert_eq!(format_cell(&Value::Null), "");
    }
}
