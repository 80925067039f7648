use std::cmp::Ordering;
use chrono::{DateTime, FixedOffset, NaiveDate};
use crate::schema::schema::{FieldType, DATE_FORMAT};

/// A stored value converted to its declared type for ordering
#[derive(Debug, Clone, PartialEq)]
pub enum Comparable {
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Datetime(DateTime<FixedOffset>),
    Text(String),
}

impl Comparable {
    /// `None` when `raw` does not satisfy `field_type`
    pub fn parse(field_type: FieldType, raw: &str) -> Option<Self> {
        match field_type {
            FieldType::Int => raw.parse().ok().map(Comparable::Int),
            FieldType::Float => raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(Comparable::Float),
            FieldType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT).ok().map(Comparable::Date),
            FieldType::Datetime => DateTime::parse_from_rfc3339(raw).ok().map(Comparable::Datetime),
            _ => Some(Comparable::Text(raw.to_string())),
        }
    }

    pub fn compare(&self, other: &Comparable) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Int(a), Comparable::Int(b)) => Some(a.cmp(b)),
            (Comparable::Float(a), Comparable::Float(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Float(b)) => (*a as f64).partial_cmp(b),
            (Comparable::Float(a), Comparable::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Comparable::Date(a), Comparable::Date(b)) => Some(a.cmp(b)),
            (Comparable::Datetime(a), Comparable::Datetime(b)) => Some(a.cmp(b)),
            (Comparable::Text(a), Comparable::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_ordering() {
        let int = |s| Comparable::parse(FieldType::Int, s).unwrap();
        assert_eq!(int("9").compare(&int("10")), Some(Ordering::Less));

        let dt = |s| Comparable::parse(FieldType::Datetime, s).unwrap();
        // Same instant, different offsets
        assert_eq!(
            dt("2024-01-01T10:00:00+01:00").compare(&dt("2024-01-01T09:00:00+00:00")),
            Some(Ordering::Equal)
        );

        let text = |s| Comparable::parse(FieldType::String, s).unwrap();
        assert_eq!(text("9").compare(&text("10")), Some(Ordering::Greater));

        assert!(Comparable::parse(FieldType::Int, "x").is_none());
        assert_eq!(int("1").compare(&text("1")), None);
    }
}
