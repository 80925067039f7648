use crate::core::error::{Error, Result};
use crate::core::types::is_reserved;
use crate::query::sections::{find, split_sections, Grammar};
use crate::schema::schema::{FieldDefinition, FieldType, ForeignKey, OnDelete, TableStructure, TableType};

const GRAMMAR: Grammar = Grammar {
    inline: &["table", "table_type"],
    blocks: &["fields", "foreign_keys", "unique_groups"],
};

/// Parse a table-definition statement
///
/// ```text
/// table: users
/// table_type: proper
/// fields:
///   email email required unique
///   team int
///   bio text
/// ::
/// foreign_keys:
///   team teams on_delete_restrict
/// ::
/// unique_groups:
///   email team
/// ::
/// ```
pub fn parse_definition(input: &str) -> Result<TableStructure> {
    let sections = split_sections(input, &GRAMMAR)?;

    let table = find(&sections, "table")
        .ok_or_else(|| Error::validation("table: section is required"))?;
    let mut names = table.inline.split_whitespace();
    let name = match (names.next(), names.next()) {
        (Some(name), None) => name,
        _ => return Err(Error::validation(format!("table: expected a single name, found '{}'", table.inline))),
    };
    let mut structure = TableStructure::new(name);

    if let Some(section) = find(&sections, "table_type") {
        structure.table_type = TableType::parse(section.inline).ok_or_else(|| {
            Error::validation(format!("table_type: unknown type '{}' (proper, logs)", section.inline))
        })?;
    }

    let fields = find(&sections, "fields")
        .ok_or_else(|| Error::validation("fields: section is required"))?;
    if fields.lines.is_empty() {
        return Err(Error::validation("fields: section declares no field"));
    }
    for line in &fields.lines {
        structure.fields.push(parse_field_line(line)?);
    }

    if let Some(section) = find(&sections, "foreign_keys") {
        for line in &section.lines {
            structure.foreign_keys.push(parse_foreign_key_line(line)?);
        }
    }

    if let Some(section) = find(&sections, "unique_groups") {
        for line in &section.lines {
            structure.unique_groups.push(line.split_whitespace().map(String::from).collect());
        }
    }

    structure.check()?;
    Ok(structure)
}

fn parse_field_line(line: &str) -> Result<FieldDefinition> {
    let mut tokens = line.split_whitespace();
    let (Some(name), Some(type_name)) = (tokens.next(), tokens.next()) else {
        return Err(Error::validation(format!(
            "fields: expected 'name type [required] [unique] [nindex]', found '{}'", line
        )));
    };

    if is_reserved(name) {
        return Err(Error::validation(format!("fields: '{}' is a reserved field name", name)));
    }
    let field_type = FieldType::parse(type_name).ok_or_else(|| {
        Error::validation(format!("fields: unknown type '{}' for field '{}'", type_name, name))
    })?;

    let mut field = FieldDefinition::new(name, field_type);
    for flag in tokens {
        match flag {
            "required" => field.required = true,
            "unique" => field.unique = true,
            "nindex" => field.not_indexed = true,
            other => {
                return Err(Error::validation(format!("fields: unknown flag '{}' on field '{}'", other, name)));
            }
        }
    }

    Ok(field)
}

fn parse_foreign_key_line(line: &str) -> Result<ForeignKey> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [field, pointed_table, policy] = tokens.as_slice() else {
        return Err(Error::validation(format!(
            "foreign_keys: expected 'field pointed_table on_delete_policy', found '{}'", line
        )));
    };

    let on_delete = OnDelete::parse(policy).ok_or_else(|| {
        Error::validation(format!(
            "foreign_keys: unknown policy '{}' (on_delete_restrict, on_delete_delete, on_delete_empty)", policy
        ))
    })?;

    Ok(ForeignKey {
        field: field.to_string(),
        pointed_table: pointed_table.to_string(),
        on_delete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = "
table: users
fields:
  email email required unique
  team int
  bio text nindex
  joined date
::
foreign_keys:
  team teams on_delete_empty
::
unique_groups:
  email team
::
";

    #[test]
    fn parses_a_full_definition() {
        let structure = parse_definition(USERS).unwrap();

        assert_eq!(structure.name, "users");
        assert_eq!(structure.table_type, TableType::Proper);
        assert_eq!(structure.fields.len(), 4);

        let email = structure.field("email").unwrap();
        assert_eq!(email.field_type, FieldType::Email);
        assert!(email.required && email.unique && !email.not_indexed);
        assert!(structure.field("bio").unwrap().not_indexed);

        let fk = structure.foreign_key("team").unwrap();
        assert_eq!(fk.pointed_table, "teams");
        assert_eq!(fk.on_delete, OnDelete::Empty);
        assert_eq!(structure.unique_groups, vec![vec!["email".to_string(), "team".to_string()]]);
    }

    #[test]
    fn rendering_parses_back_to_the_same_structure() {
        let structure = parse_definition(USERS).unwrap();
        assert_eq!(parse_definition(&structure.to_statement()).unwrap(), structure);
    }

    #[test]
    fn logs_tables() {
        let structure = parse_definition("table: audit\ntable_type: logs\nfields:\n  line string\n::\n").unwrap();
        assert_eq!(structure.table_type, TableType::Logs);
    }

    #[test]
    fn malformed_definitions() {
        let cases = [
            ("fields:\n a int\n::\n", "table"),
            ("table: t\n", "fields"),
            ("table: t\nfields:\n::\n", "fields"),
            ("table: t\nfields:\n a integer\n::\n", "integer"),
            ("table: t\nfields:\n a int indexed\n::\n", "indexed"),
            ("table: t\nfields:\n id int\n::\n", "reserved"),
            ("table: t\nfields:\n _version int\n::\n", "reserved"),
            ("table: t\nfields:\n a int\n::\nforeign_keys:\n a u\n::\n", "foreign_keys"),
            ("table: t\nfields:\n a int\n::\nforeign_keys:\n a u on_delete_nothing\n::\n", "on_delete_nothing"),
            ("table: t\ntable_type: ledger\nfields:\n a int\n::\n", "ledger"),
            ("table: t u\nfields:\n a int\n::\n", "table"),
        ];

        for (text, needle) in cases {
            let err = parse_definition(text).unwrap_err();
            assert!(err.context.contains(needle), "'{}' should mention '{}', got '{}'", text, needle, err);
        }
    }
}
