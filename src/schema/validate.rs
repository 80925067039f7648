use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use crate::core::error::{Error, Result};
use crate::core::types::is_reserved;
use crate::schema::schema::{FieldType, TableStructure, DATE_FORMAT};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern compiles")
});

/// Check `raw` against `field_type` and return the form that gets stored and indexed
pub fn coerce_value(field: &str, field_type: FieldType, raw: &str, max_string_length: usize) -> Result<String> {
    let invalid = || Error::validation(format!("Value '{}' is not a valid {} for field '{}'", raw, field_type, field));

    let value = match field_type {
        FieldType::Int => raw.parse::<i64>().map_err(|_| invalid())?.to_string(),
        FieldType::Float => {
            let value = raw.parse::<f64>().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            value.to_string()
        }
        FieldType::Bool => match raw {
            "t" | "f" => raw.to_string(),
            _ => return Err(invalid()),
        },
        FieldType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| invalid())?
            .format(DATE_FORMAT)
            .to_string(),
        FieldType::Datetime => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| invalid())?
            .to_rfc3339(),
        FieldType::String => {
            if raw.chars().count() > max_string_length {
                return Err(Error::validation(format!(
                    "Value for field '{}' is longer than {} characters", field, max_string_length
                )));
            }
            if raw.contains('\n') {
                return Err(Error::validation(format!("Value for string field '{}' spans lines", field)));
            }
            raw.to_string()
        }
        FieldType::Text => raw.to_string(),
        FieldType::Email => {
            if !EMAIL.is_match(raw) {
                return Err(invalid());
            }
            raw.to_string()
        }
        FieldType::Url => {
            url::Url::parse(raw).map_err(|_| invalid())?;
            raw.to_string()
        }
        FieldType::IpAddr => raw.parse::<IpAddr>().map_err(|_| invalid())?.to_string(),
    };

    Ok(value)
}

/// Validate user-supplied fields against a structure version.
///
/// Empty values count as absent. Returns the coerced field set, without `id`/`_version`.
pub fn validate_fields(
    structure: &TableStructure,
    fields: &BTreeMap<String, String>,
    max_string_length: usize,
) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();

    for (name, raw) in fields {
        if is_reserved(name) {
            return Err(Error::validation(format!("Field '{}' is managed by the store", name)));
        }
        let def = structure.field(name).ok_or_else(|| {
            Error::validation(format!("Table '{}' has no field '{}'", structure.name, name))
        })?;
        if raw.is_empty() {
            continue;
        }
        out.insert(name.clone(), coerce_value(name, def.field_type, raw, max_string_length)?);
    }

    for def in structure.fields.iter().filter(|f| f.required) {
        if !out.contains_key(&def.name) {
            return Err(Error::constraint(format!(
                "Field '{}' is required in table '{}'", def.name, structure.name
            )));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::schema::schema::FieldDefinition;

    fn coerce(field_type: FieldType, raw: &str) -> Result<String> {
        coerce_value("f", field_type, raw, 10)
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(coerce(FieldType::Int, "007").unwrap(), "7");
        assert_eq!(coerce(FieldType::Float, "1.50").unwrap(), "1.5");
        assert_eq!(coerce(FieldType::Date, "2024-03-05").unwrap(), "2024-03-05");
        assert_eq!(coerce(FieldType::IpAddr, "::1").unwrap(), "::1");
        assert!(coerce(FieldType::Datetime, "2024-03-05T10:00:00+01:00").is_ok());
    }

    #[test]
    fn rejections() {
        assert!(coerce(FieldType::Int, "1.5").is_err());
        assert!(coerce(FieldType::Float, "NaN").is_err());
        assert!(coerce(FieldType::Bool, "true").is_err());
        assert!(coerce(FieldType::Date, "05/03/2024").is_err());
        assert!(coerce(FieldType::Datetime, "2024-03-05 10:00").is_err());
        assert!(coerce(FieldType::String, "eleven chars").is_err());
        assert!(coerce(FieldType::Email, "not-an-email").is_err());
        assert!(coerce(FieldType::Url, "no scheme").is_err());
        assert!(coerce(FieldType::IpAddr, "300.1.1.1").is_err());
        assert!(coerce(FieldType::Text, "anything at all, any length").is_ok());
    }

    #[test]
    fn required_unknown_and_reserved() {
        let structure = TableStructure::new("users")
            .with_field(FieldDefinition::new("email", FieldType::Email).required())
            .with_field(FieldDefinition::new("age", FieldType::Int));

        let missing = BTreeMap::from([("age".to_string(), "3".to_string())]);
        assert!(validate_fields(&structure, &missing, 220).unwrap_err().is(ErrorKind::Constraint));

        let empty = BTreeMap::from([("email".to_string(), String::new())]);
        assert!(validate_fields(&structure, &empty, 220).unwrap_err().is(ErrorKind::Constraint));

        let unknown = BTreeMap::from([
            ("email".to_string(), "a@b.co".to_string()),
            ("ghost".to_string(), "x".to_string()),
        ]);
        assert!(validate_fields(&structure, &unknown, 220).unwrap_err().is(ErrorKind::Validation));

        let reserved = BTreeMap::from([
            ("email".to_string(), "a@b.co".to_string()),
            ("id".to_string(), "9".to_string()),
        ]);
        assert!(validate_fields(&structure, &reserved, 220).unwrap_err().is(ErrorKind::Validation));

        let ok = BTreeMap::from([
            ("email".to_string(), "a@b.co".to_string()),
            ("age".to_string(), "042".to_string()),
        ]);
        let coerced = validate_fields(&structure, &ok, 220).unwrap();
        assert_eq!(coerced["age"], "42");
    }
}
