use std::cmp::Ordering;
use std::collections::HashSet;
use crate::core::table::TableContext;
use crate::core::types::{Row, ID_FIELD, VERSION_FIELD};
use crate::query::ast::{OrderBy, SortOrder};

/// `id`, `_version` and the `{fk}.id` / `{fk}._version` markers added by expand
pub fn is_marker(field: &str) -> bool {
    field == ID_FIELD
        || field == VERSION_FIELD
        || field.ends_with(".id")
        || field.ends_with("._version")
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Missing,
    Number(f64),
    Text(String),
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
        }
    }

    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Numeric when the field is int/float in the structure the row was written under
fn sort_key(table: &TableContext, row: &Row, field: &str) -> SortKey {
    let Some(value) = row.get(field).filter(|v| !v.is_empty()) else {
        return SortKey::Missing;
    };

    let numeric = is_marker(field)
        || table
            .structure_of(row)
            .ok()
            .and_then(|s| s.resolve_field(field))
            .is_some_and(|f| f.value_type().is_numeric());

    if numeric {
        if let Ok(number) = value.parse::<f64>() {
            return SortKey::Number(number);
        }
    }
    SortKey::Text(value.clone())
}

/// Stable sort; rows without the field come first in ascending order
pub fn order(table: &TableContext, rows: &mut Vec<Row>, order_by: Option<&OrderBy>) {
    let Some(order_by) = order_by else {
        return;
    };

    let mut keyed: Vec<(SortKey, Row)> = rows
        .drain(..)
        .map(|row| (sort_key(table, &row, &order_by.field), row))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match order_by.order {
        SortOrder::Asc => a.compare(b),
        SortOrder::Desc => b.compare(a),
    });
    rows.extend(keyed.into_iter().map(|(_, row)| row));
}

pub fn paginate(rows: Vec<Row>, start_index: usize, limit: Option<usize>) -> Vec<Row> {
    let rows = rows.into_iter().skip(start_index);
    match limit {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    }
}

/// Keep requested fields plus the markers; no-op when nothing was requested
pub fn project(rows: Vec<Row>, fields: &[String]) -> Vec<Row> {
    if fields.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(name, _)| is_marker(name) || fields.iter().any(|f| f == name))
                .collect()
        })
        .collect()
}

/// First row per distinct content, ignoring the markers
pub fn distinct(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let content: Vec<(&String, &String)> =
                row.iter().filter(|(name, _)| !is_marker(name)).collect();
            // BTreeMap iteration is ordered, so equal rows render equally
            seen.insert(format!("{:?}", content))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn pagination_skips_before_capping() {
        let rows: Vec<Row> = (0..10).map(|i| row(&[("id", &i.to_string())])).collect();
        let page = paginate(rows, 2, Some(3));
        let ids: Vec<&str> = page.iter().map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);

        assert!(paginate(vec![row(&[("id", "1")])], 5, None).is_empty());
    }

    #[test]
    fn projection_keeps_markers() {
        let rows = vec![row(&[
            ("id", "1"),
            ("_version", "2"),
            ("name", "Ana"),
            ("age", "30"),
            ("owner.id", "4"),
            ("owner.name", "Bo"),
        ])];
        let projected = project(rows, &["name".to_string()]);
        let keys: Vec<&str> = projected[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_version", "id", "name", "owner.id"]);
    }

    #[test]
    fn distinct_ignores_ids() {
        let rows = vec![
            row(&[("id", "1"), ("_version", "1"), ("city", "Oslo")]),
            row(&[("id", "2"), ("_version", "2"), ("city", "Oslo")]),
            row(&[("id", "3"), ("_version", "1"), ("city", "Rome")]),
        ];
        let kept = distinct(rows);
        let ids: Vec<&str> = kept.iter().map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn sort_keys_are_totally_ordered() {
        let mut keys = vec![
            SortKey::Text("b".into()),
            SortKey::Number(10.0),
            SortKey::Missing,
            SortKey::Number(9.0),
            SortKey::Text("a".into()),
        ];
        keys.sort_by(|a, b| a.compare(b));
        assert_eq!(
            keys,
            vec![
                SortKey::Missing,
                SortKey::Number(9.0),
                SortKey::Number(10.0),
                SortKey::Text("a".into()),
                SortKey::Text("b".into()),
            ]
        );
    }
}
