use std::collections::HashSet;
use std::fmt;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use crate::core::error::{Error, Result};
use crate::core::types::{is_reserved, ID_FIELD, VERSION_FIELD};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Float,
    String,
    Text,      // Free text, handled by the full-text indexer only
    Bool,      // 't' or 'f'
    Date,      // YYYY-MM-DD
    Datetime,  // RFC 3339 with offset
    Email,
    Url,
    IpAddr,
}

impl FieldType {
    pub fn parse(name: &str) -> Option<Self> {
        let field_type = match name {
            "int" => FieldType::Int,
            "float" => FieldType::Float,
            "string" => FieldType::String,
            "text" => FieldType::Text,
            "bool" => FieldType::Bool,
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "email" => FieldType::Email,
            "url" => FieldType::Url,
            "ipaddr" => FieldType::IpAddr,
            _ => return None,
        };
        Some(field_type)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::IpAddr => "ipaddr",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Datetime)
    }

    pub fn supports_like(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Email | FieldType::Url)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    pub not_indexed: bool,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        FieldDefinition {
            name: name.to_string(),
            field_type,
            required: false,
            unique: false,
            not_indexed: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_indexed(mut self) -> Self {
        self.not_indexed = true;
        self
    }

    /// Maintained by the field index manager. Text fields never are.
    pub fn is_indexed(&self) -> bool {
        !self.not_indexed && self.field_type != FieldType::Text
    }

    pub fn is_full_text(&self) -> bool {
        !self.not_indexed && self.field_type == FieldType::Text
    }

    pub fn has_like_index(&self) -> bool {
        self.is_indexed() && self.field_type.supports_like()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    Restrict,  // Refuse to delete a referenced row
    Delete,    // Delete referencing rows too
    Empty,     // Clear the referencing field
}

impl OnDelete {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "on_delete_restrict" => Some(OnDelete::Restrict),
            "on_delete_delete" => Some(OnDelete::Delete),
            "on_delete_empty" => Some(OnDelete::Empty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnDelete::Restrict => "on_delete_restrict",
            OnDelete::Delete => "on_delete_delete",
            OnDelete::Empty => "on_delete_empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub field: String,
    pub pointed_table: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    #[default]
    Proper,
    Logs,      // Append-only: no update, no delete
}

impl TableType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "proper" => Some(TableType::Proper),
            "logs" => Some(TableType::Logs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::Proper => "proper",
            TableType::Logs => "logs",
        }
    }
}

/// Components fanned out of date/datetime values into their own indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateComponent {
    Year,
    Month,
    Day,
    Hour,
    TzName,
    Date,
}

impl DateComponent {
    const DATE: [DateComponent; 3] = [DateComponent::Year, DateComponent::Month, DateComponent::Day];
    const DATETIME: [DateComponent; 6] = [
        DateComponent::Year,
        DateComponent::Month,
        DateComponent::Day,
        DateComponent::Hour,
        DateComponent::TzName,
        DateComponent::Date,
    ];

    pub fn for_type(field_type: FieldType) -> &'static [DateComponent] {
        match field_type {
            FieldType::Date => &Self::DATE,
            FieldType::Datetime => &Self::DATETIME,
            _ => &[],
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            DateComponent::Year => "_year",
            DateComponent::Month => "_month",
            DateComponent::Day => "_day",
            DateComponent::Hour => "_hour",
            DateComponent::TzName => "_tzname",
            DateComponent::Date => "_date",
        }
    }

    pub fn field_name(&self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }

    pub fn value_type(&self) -> FieldType {
        match self {
            DateComponent::TzName => FieldType::String,
            DateComponent::Date => FieldType::Date,
            _ => FieldType::Int,
        }
    }

    /// Component value of an already-validated date or datetime
    pub fn extract(&self, field_type: FieldType, raw: &str) -> Option<String> {
        match field_type {
            FieldType::Date => {
                let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()?;
                match self {
                    DateComponent::Year => Some(date.year().to_string()),
                    DateComponent::Month => Some(date.month().to_string()),
                    DateComponent::Day => Some(date.day().to_string()),
                    _ => None,
                }
            }
            FieldType::Datetime => {
                let datetime = DateTime::parse_from_rfc3339(raw).ok()?;
                let value = match self {
                    DateComponent::Year => datetime.year().to_string(),
                    DateComponent::Month => datetime.month().to_string(),
                    DateComponent::Day => datetime.day().to_string(),
                    DateComponent::Hour => datetime.hour().to_string(),
                    DateComponent::TzName => datetime.format("%:z").to_string(),
                    DateComponent::Date => datetime.format(DATE_FORMAT).to_string(),
                };
                Some(value)
            }
            _ => None,
        }
    }
}

/// A queryable name resolved against one structure version
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    Id,
    Version,
    Field(&'a FieldDefinition),
    Derived {
        base: &'a FieldDefinition,
        component: DateComponent,
    },
}

impl FieldRef<'_> {
    pub fn value_type(&self) -> FieldType {
        match self {
            FieldRef::Id | FieldRef::Version => FieldType::Int,
            FieldRef::Field(def) => def.field_type,
            FieldRef::Derived { component, .. } => component.value_type(),
        }
    }
}

/// One immutable schema version of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStructure {
    pub name: String,
    pub table_type: TableType,
    pub fields: Vec<FieldDefinition>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique_groups: Vec<Vec<String>>,
}

impl TableStructure {
    pub fn new(name: &str) -> Self {
        TableStructure {
            name: name.to_string(),
            table_type: TableType::Proper,
            fields: Vec::new(),
            foreign_keys: Vec::new(),
            unique_groups: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_foreign_key(mut self, field: &str, pointed_table: &str, on_delete: OnDelete) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.to_string(),
            pointed_table: pointed_table.to_string(),
            on_delete,
        });
        self
    }

    pub fn with_unique_group(mut self, fields: &[&str]) -> Self {
        self.unique_groups.push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn foreign_key(&self, field: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.field == field)
    }

    pub fn resolve_field(&self, name: &str) -> Option<FieldRef<'_>> {
        if name == ID_FIELD {
            return Some(FieldRef::Id);
        }
        if name == VERSION_FIELD {
            return Some(FieldRef::Version);
        }
        if let Some(def) = self.field(name) {
            return Some(FieldRef::Field(def));
        }

        self.fields.iter()
            .filter(|f| f.field_type.is_temporal())
            .find_map(|base| {
                DateComponent::for_type(base.field_type)
                    .iter()
                    .find(|c| c.field_name(&base.name) == name)
                    .map(|&component| FieldRef::Derived { base, component })
            })
    }

    /// Semantic checks that the line grammar cannot express
    pub fn check(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(Error::validation(format!("Invalid table name '{}'", self.name)));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if is_reserved(&field.name) {
                return Err(Error::validation(format!("Field name '{}' is reserved", field.name)));
            }
            if !is_valid_name(&field.name) {
                return Err(Error::validation(format!("Invalid field name '{}'", field.name)));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::validation(format!("Field '{}' is defined twice", field.name)));
            }
            if field.unique && !field.is_indexed() {
                return Err(Error::validation(format!(
                    "Field '{}' cannot be unique: only indexed, non-text fields can", field.name
                )));
            }
        }

        for field in self.fields.iter().filter(|f| f.field_type.is_temporal()) {
            for component in DateComponent::for_type(field.field_type) {
                let derived = component.field_name(&field.name);
                if seen.contains(derived.as_str()) {
                    return Err(Error::validation(format!(
                        "Field '{}' clashes with a derived field of '{}'", derived, field.name
                    )));
                }
            }
        }

        let mut fk_fields = HashSet::new();
        for fk in &self.foreign_keys {
            let field = self.field(&fk.field).ok_or_else(|| {
                Error::validation(format!("Foreign key on unknown field '{}'", fk.field))
            })?;
            if field.field_type != FieldType::Int || !field.is_indexed() {
                return Err(Error::validation(format!(
                    "Foreign key field '{}' must be an indexed int field", fk.field
                )));
            }
            if !is_valid_name(&fk.pointed_table) {
                return Err(Error::validation(format!("Invalid table name '{}'", fk.pointed_table)));
            }
            if !fk_fields.insert(fk.field.as_str()) {
                return Err(Error::validation(format!("Field '{}' has two foreign keys", fk.field)));
            }
        }

        for group in &self.unique_groups {
            if group.is_empty() {
                return Err(Error::validation("Empty unique group".to_string()));
            }
            for name in group {
                match self.field(name) {
                    Some(field) if field.is_indexed() => {}
                    Some(_) => {
                        return Err(Error::validation(format!(
                            "Unique group field '{}' must be indexed and not text", name
                        )));
                    }
                    None => {
                        return Err(Error::validation(format!("Unique group on unknown field '{}'", name)));
                    }
                }
            }
        }

        Ok(())
    }

    /// Render back to a table-definition statement
    pub fn to_statement(&self) -> String {
        let mut out = format!("table: {}\ntable_type: {}\nfields:\n", self.name, self.table_type.as_str());
        for field in &self.fields {
            out.push_str(&format!("  {} {}", field.name, field.field_type));
            if field.required {
                out.push_str(" required");
            }
            if field.unique {
                out.push_str(" unique");
            }
            if field.not_indexed {
                out.push_str(" nindex");
            }
            out.push('\n');
        }
        out.push_str("::\n");

        if !self.foreign_keys.is_empty() {
            out.push_str("foreign_keys:\n");
            for fk in &self.foreign_keys {
                out.push_str(&format!("  {} {} {}\n", fk.field, fk.pointed_table, fk.on_delete.as_str()));
            }
            out.push_str("::\n");
        }

        if !self.unique_groups.is_empty() {
            out.push_str("unique_groups:\n");
            for group in &self.unique_groups {
                out.push_str(&format!("  {}\n", group.join(" ")));
            }
            out.push_str("::\n");
        }

        out
    }
}

/// Project, table and field names: ASCII letters, digits and `_`, not starting with a digit
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> TableStructure {
        TableStructure::new("events")
            .with_field(FieldDefinition::new("title", FieldType::String).required())
            .with_field(FieldDefinition::new("starts", FieldType::Datetime))
            .with_field(FieldDefinition::new("day", FieldType::Date))
            .with_field(FieldDefinition::new("body", FieldType::Text))
    }

    #[test]
    fn derived_date_fields_resolve() {
        let structure = events();

        match structure.resolve_field("starts_tzname") {
            Some(FieldRef::Derived { base, component }) => {
                assert_eq!(base.name, "starts");
                assert_eq!(component, DateComponent::TzName);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(structure.resolve_field("day_year").unwrap().value_type(), FieldType::Int);
        assert!(structure.resolve_field("day_hour").is_none());
        assert!(matches!(structure.resolve_field("id"), Some(FieldRef::Id)));
        assert!(structure.resolve_field("nope").is_none());
    }

    #[test]
    fn components_extract_from_datetime() {
        let raw = "2024-03-05T22:10:00+01:00";
        let get = |c: DateComponent| c.extract(FieldType::Datetime, raw).unwrap();
        assert_eq!(get(DateComponent::Year), "2024");
        assert_eq!(get(DateComponent::Month), "3");
        assert_eq!(get(DateComponent::Day), "5");
        assert_eq!(get(DateComponent::Hour), "22");
        assert_eq!(get(DateComponent::TzName), "+01:00");
        assert_eq!(get(DateComponent::Date), "2024-03-05");
    }

    #[test]
    fn check_rejects_bad_definitions() {
        assert!(events().check().is_ok());

        let unique_text = events().with_field(FieldDefinition::new("notes", FieldType::Text).unique());
        assert!(unique_text.check().is_err());

        let clash = events().with_field(FieldDefinition::new("day_year", FieldType::Int));
        assert!(clash.check().is_err());

        let bad_fk = events().with_foreign_key("title", "users", OnDelete::Restrict);
        assert!(bad_fk.check().is_err());

        let unknown_group = events().with_unique_group(&["title", "ghost"]);
        assert!(unknown_group.check().is_err());
    }

    #[test]
    fn names() {
        assert!(is_valid_name("user_2"));
        assert!(!is_valid_name("2users"));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name(""));
    }
}
