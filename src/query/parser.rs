use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, multispace0},
    multi::many0,
    sequence::{delimited, preceded},
};
use crate::core::error::{Error, Result};
use crate::query::ast::{Joiner, OrderBy, Relation, SearchStatement, SortOrder, WhereClause};
use crate::query::sections::{find, split_sections, Grammar};
use crate::schema::schema::is_valid_name;

const GRAMMAR: Grammar = Grammar {
    inline: &["table", "fields", "start_index", "limit", "order_by"],
    blocks: &["where"],
};

/// Parser for search statements
///
/// ```text
/// table: users expand distinct
/// fields: name team.name
/// start_index: 10
/// limit: 5
/// order_by: name asc
/// where:
///   age >= 18
///   and team.name = 'blue team'
///   or id in 1 2 3
/// ::
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        QueryParser
    }

    pub fn parse(&self, input: &str) -> Result<SearchStatement> {
        let sections = split_sections(input, &GRAMMAR)?;

        let table = find(&sections, "table")
            .ok_or_else(|| Error::validation("table: section is required"))?;
        let mut tokens = table.inline.split_whitespace();
        let name = tokens.next()
            .ok_or_else(|| Error::validation("table: expected a table name"))?;
        if !is_valid_name(name) {
            return Err(Error::validation(format!("table: invalid table name '{}'", name)));
        }
        let mut statement = SearchStatement::new(name);
        for flag in tokens {
            match flag {
                "expand" => statement.expand = true,
                "distinct" => statement.distinct = true,
                other => {
                    return Err(Error::validation(format!("table: unknown flag '{}' (expand, distinct)", other)));
                }
            }
        }

        if let Some(section) = find(&sections, "fields") {
            statement.fields = section.inline.split_whitespace().map(String::from).collect();
            if statement.fields.is_empty() {
                return Err(Error::validation("fields: lists no field"));
            }
            for field in &statement.fields {
                check_field_path("fields", field)?;
            }
        }

        if let Some(section) = find(&sections, "start_index") {
            statement.start_index = parse_count("start_index", section.inline)?;
        }
        if let Some(section) = find(&sections, "limit") {
            statement.limit = Some(parse_count("limit", section.inline)?);
        }

        if let Some(section) = find(&sections, "order_by") {
            let tokens: Vec<&str> = section.inline.split_whitespace().collect();
            let (field, order) = match tokens.as_slice() {
                [field] => (*field, SortOrder::Asc),
                [field, "asc"] => (*field, SortOrder::Asc),
                [field, "desc"] => (*field, SortOrder::Desc),
                _ => {
                    return Err(Error::validation(format!(
                        "order_by: expected 'field [asc|desc]', found '{}'", section.inline
                    )));
                }
            };
            check_field_path("order_by", field)?;
            statement.order_by = Some(OrderBy { field: field.to_string(), order });
        }

        if let Some(section) = find(&sections, "where") {
            for (index, line) in section.lines.iter().enumerate() {
                statement.where_clauses.push(parse_where_line(index, line)?);
            }
        }

        Ok(statement)
    }
}

/// Shorthand for `QueryParser::new().parse(input)`
pub fn parse_search(input: &str) -> Result<SearchStatement> {
    QueryParser::new().parse(input)
}

fn parse_count(section: &str, text: &str) -> Result<usize> {
    text.parse::<usize>().map_err(|_| {
        Error::validation(format!("{}: expected a non-negative integer, found '{}'", section, text))
    })
}

fn check_field_path(section: &str, path: &str) -> Result<()> {
    let valid = match path.split_once('.') {
        Some((fk, field)) => is_valid_name(fk) && is_valid_name(field),
        None => is_valid_name(path),
    };
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("{}: invalid field '{}'", section, path)))
    }
}

fn parse_where_line(index: usize, line: &str) -> Result<WhereClause> {
    let tokens = tokenize(line)?;
    let mut rest = tokens.as_slice();

    let joiner = match (index, rest.first().and_then(|t| Joiner::parse(t))) {
        (0, Some(_)) => {
            return Err(Error::validation(format!("where: the first clause cannot start with a joiner: '{}'", line)));
        }
        (0, None) => None,
        (_, Some(joiner)) => {
            rest = &rest[1..];
            Some(joiner)
        }
        (_, None) => {
            return Err(Error::validation(format!("where: clause must start with 'and' or 'or': '{}'", line)));
        }
    };

    let [field, relation, values @ ..] = rest else {
        return Err(Error::validation(format!("where: expected 'field relation value', found '{}'", line)));
    };
    check_field_path("where", field)?;
    let relation = Relation::parse(relation).ok_or_else(|| {
        Error::validation(format!("where: unknown relation '{}' in '{}'", relation, line))
    })?;

    let arity_ok = if relation.takes_no_value() {
        values.is_empty()
    } else if relation.takes_list() {
        !values.is_empty()
    } else {
        values.len() == 1
    };
    if !arity_ok {
        return Err(Error::validation(format!(
            "where: wrong number of values for '{}' in '{}'", relation, line
        )));
    }

    Ok(WhereClause {
        joiner,
        field: field.clone(),
        relation,
        values: values.to_vec(),
    })
}

fn token(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace0,
        alt((
            delimited(char('\''), take_till(|c: char| c == '\''), char('\'')),
            take_while1(|c: char| !c.is_whitespace() && c != '\''),
        )),
    )
    .parse(input)
}

/// Split a where line into words; `'...'` groups whitespace into one word
fn tokenize(line: &str) -> Result<Vec<String>> {
    let (rest, tokens) = many0(token)
        .parse(line)
        .map_err(|e| Error::validation(format!("where: cannot read '{}': {}", line, e)))?;

    if !rest.trim().is_empty() {
        return Err(Error::validation(format!("where: unbalanced quote in '{}'", line)));
    }

    Ok(tokens.into_iter().map(String::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_statement() {
        let statement = parse_search(
            "table: users expand distinct
fields: name team.name
start_index: 10
limit: 5
order_by: name desc
where:
  age >= 18
  and team.name = 'blue team'
  or id in 1 2 3
  and note isnull
::
",
        ).unwrap();

        assert_eq!(statement.table, "users");
        assert!(statement.expand && statement.distinct);
        assert_eq!(statement.fields, vec!["name", "team.name"]);
        assert_eq!(statement.start_index, 10);
        assert_eq!(statement.limit, Some(5));
        assert_eq!(statement.order_by, Some(OrderBy { field: "name".into(), order: SortOrder::Desc }));

        let clauses = &statement.where_clauses;
        assert_eq!(clauses.len(), 4);
        assert_eq!(clauses[0].joiner, None);
        assert_eq!(clauses[0].relation, Relation::Gte);
        assert_eq!(clauses[1].joiner, Some(Joiner::And));
        assert_eq!(clauses[1].foreign_path(), Some(("team", "name")));
        assert_eq!(clauses[1].value(), "blue team");
        assert_eq!(clauses[2].joiner, Some(Joiner::Or));
        assert_eq!(clauses[2].values, vec!["1", "2", "3"]);
        assert!(clauses[3].values.is_empty());
    }

    #[test]
    fn minimal_statement_has_defaults() {
        let statement = parse_search("table: users").unwrap();
        assert_eq!(statement, SearchStatement::new("users"));
    }

    #[test]
    fn quoted_values() {
        let tokens = tokenize("title = ''").unwrap();
        assert_eq!(tokens, vec!["title", "=", ""]);

        let tokens = tokenize("tags in 'a b'  c 'd'").unwrap();
        assert_eq!(tokens, vec!["tags", "in", "a b", "c", "d"]);

        assert!(tokenize("title = 'open").is_err());
        assert!(tokenize("title = o'brien").is_err());
    }

    #[test]
    fn builder_renders_parseable_text() {
        let statement = SearchStatement::new("orders")
            .expand()
            .with_fields(&["total"])
            .order_by("total", SortOrder::Desc)
            .start_at(2)
            .limit(3)
            .and_where("status", Relation::Eq, &["open now"])
            .and_where("total", Relation::Gt, &["10"])
            .or_where("customer", Relation::In, &["1", "2"]);

        assert_eq!(parse_search(&statement.to_statement()).unwrap(), statement);
    }

    #[test]
    fn malformed_statements() {
        let cases = [
            ("limit: 3", "table"),
            ("table: users sorted", "sorted"),
            ("table: users\nlimit: -1", "limit"),
            ("table: users\nstart_index: x", "start_index"),
            ("table: users\norder_by: name sideways", "order_by"),
            ("table: users\nfields:", "fields"),
            ("table: users\nwhere:\n and a = 1\n::", "first clause"),
            ("table: users\nwhere:\n a = 1\n b = 2\n::", "'and' or 'or'"),
            ("table: users\nwhere:\n a ~ 1\n::", "~"),
            ("table: users\nwhere:\n a = 1 2\n::", "wrong number"),
            ("table: users\nwhere:\n a in\n::", "wrong number"),
            ("table: users\nwhere:\n a isnull 1\n::", "wrong number"),
            ("table: users\nwhere:\n a.b.c = 1\n::", "a.b.c"),
            ("table: users\nwhere:\n a = 1\n", "where"),
        ];

        for (text, needle) in cases {
            let err = parse_search(text).unwrap_err();
            assert!(err.context.contains(needle), "'{}' should mention '{}', got '{}'", text, needle, err);
        }
    }
}
