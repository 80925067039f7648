use std::fmt;
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Joiner {
    And,
    Or,
}

impl Joiner {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "and" => Some(Joiner::And),
            "or" => Some(Joiner::Or),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Joiner::And => "and",
            Joiner::Or => "or",
        }
    }
}

/// Where-clause relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,       // Trailing value list
    NotIn,
    IsNull,   // No value
    NotNull,
    Like,     // Character-gram match
}

impl Relation {
    pub fn parse(token: &str) -> Option<Self> {
        let relation = match token {
            "=" => Relation::Eq,
            "!=" => Relation::NotEq,
            ">" => Relation::Gt,
            ">=" => Relation::Gte,
            "<" => Relation::Lt,
            "<=" => Relation::Lte,
            "in" => Relation::In,
            "nin" => Relation::NotIn,
            "isnull" => Relation::IsNull,
            "notnull" => Relation::NotNull,
            "like" => Relation::Like,
            _ => return None,
        };
        Some(relation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::NotEq => "!=",
            Relation::Gt => ">",
            Relation::Gte => ">=",
            Relation::Lt => "<",
            Relation::Lte => "<=",
            Relation::In => "in",
            Relation::NotIn => "nin",
            Relation::IsNull => "isnull",
            Relation::NotNull => "notnull",
            Relation::Like => "like",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Relation::Gt | Relation::Gte | Relation::Lt | Relation::Lte)
    }

    pub fn takes_list(&self) -> bool {
        matches!(self, Relation::In | Relation::NotIn)
    }

    pub fn takes_no_value(&self) -> bool {
        matches!(self, Relation::IsNull | Relation::NotNull)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a `where:` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereClause {
    pub joiner: Option<Joiner>,  // None on the first clause only
    pub field: String,           // `field` or `fkfield.field`
    pub relation: Relation,
    pub values: Vec<String>,
}

impl WhereClause {
    pub fn new(field: &str, relation: Relation, values: &[&str]) -> Self {
        WhereClause {
            joiner: None,
            field: field.to_string(),
            relation,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// The single operand of a scalar relation
    pub fn value(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or("")
    }

    /// `(fkfield, field)` when the clause reaches through a foreign key
    pub fn foreign_path(&self) -> Option<(&str, &str)> {
        self.field.split_once('.')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

/// Parsed search statement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchStatement {
    pub table: String,
    pub expand: bool,
    pub distinct: bool,
    pub fields: Vec<String>,  // Empty keeps every field
    pub start_index: usize,
    pub limit: Option<usize>,
    pub order_by: Option<OrderBy>,
    pub where_clauses: Vec<WhereClause>,
}

impl SearchStatement {
    pub fn new(table: &str) -> Self {
        SearchStatement {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn expand(mut self) -> Self {
        self.expand = true;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn start_at(mut self, start_index: usize) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), order });
        self
    }

    /// Add a clause joined with `and` (the joiner is dropped on the first clause)
    pub fn and_where(self, field: &str, relation: Relation, values: &[&str]) -> Self {
        self.push_clause(Joiner::And, WhereClause::new(field, relation, values))
    }

    pub fn or_where(self, field: &str, relation: Relation, values: &[&str]) -> Self {
        self.push_clause(Joiner::Or, WhereClause::new(field, relation, values))
    }

    fn push_clause(mut self, joiner: Joiner, mut clause: WhereClause) -> Self {
        if !self.where_clauses.is_empty() {
            clause.joiner = Some(joiner);
        }
        self.where_clauses.push(clause);
        self
    }

    /// Render back to statement text. Values holding a single quote cannot be expressed.
    pub fn to_statement(&self) -> String {
        let mut out = format!("table: {}", self.table);
        if self.expand {
            out.push_str(" expand");
        }
        if self.distinct {
            out.push_str(" distinct");
        }
        out.push('\n');

        if !self.fields.is_empty() {
            out.push_str(&format!("fields: {}\n", self.fields.join(" ")));
        }
        if self.start_index > 0 {
            out.push_str(&format!("start_index: {}\n", self.start_index));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!("limit: {}\n", limit));
        }
        if let Some(order_by) = &self.order_by {
            let order = match order_by.order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            out.push_str(&format!("order_by: {} {}\n", order_by.field, order));
        }

        if !self.where_clauses.is_empty() {
            out.push_str("where:\n");
            for clause in &self.where_clauses {
                out.push_str("  ");
                if let Some(joiner) = clause.joiner {
                    out.push_str(joiner.as_str());
                    out.push(' ');
                }
                out.push_str(&format!("{} {}", clause.field, clause.relation));
                for value in &clause.values {
                    out.push(' ');
                    out.push_str(&quote(value));
                }
                out.push('\n');
            }
            out.push_str("::\n");
        }

        out
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) || value.contains('\'') {
        format!("'{}'", value)
    } else {
        value.to_string()
    }
}
