use crate::query::ast::{Joiner, WhereClause};

/// Logical shape of a where block
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Scan,                                   // No clause: every live row
    Clause(WhereClause),
    Intersection { inputs: Vec<LogicalPlan> },
    Union { inputs: Vec<LogicalPlan> },
}

/// Groups clauses left to right into runs of consecutive `and`s, intersected
/// within a run; the runs are unioned. `and` binds tighter than `or`.
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn plan(clauses: &[WhereClause]) -> LogicalPlan {
        let mut runs: Vec<Vec<LogicalPlan>> = Vec::new();

        for clause in clauses {
            let leaf = LogicalPlan::Clause(clause.clone());
            if clause.joiner == Some(Joiner::And) {
                if let Some(run) = runs.last_mut() {
                    run.push(leaf);
                    continue;
                }
            }
            runs.push(vec![leaf]);
        }

        let mut inputs: Vec<LogicalPlan> = runs.into_iter()
            .map(|mut run| {
                if run.len() == 1 {
                    run.remove(0)
                } else {
                    LogicalPlan::Intersection { inputs: run }
                }
            })
            .collect();

        match inputs.len() {
            0 => LogicalPlan::Scan,
            1 => inputs.remove(0),
            _ => LogicalPlan::Union { inputs },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{Relation, SearchStatement};

    fn leaf(field: &str) -> LogicalPlan {
        LogicalPlan::Clause(WhereClause::new(field, Relation::Eq, &["1"]))
    }

    fn fields(plan: &LogicalPlan) -> String {
        match plan {
            LogicalPlan::Scan => "*".to_string(),
            LogicalPlan::Clause(c) => c.field.clone(),
            LogicalPlan::Intersection { inputs } => {
                format!("({})", inputs.iter().map(fields).collect::<Vec<_>>().join(" & "))
            }
            LogicalPlan::Union { inputs } => {
                format!("({})", inputs.iter().map(fields).collect::<Vec<_>>().join(" | "))
            }
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let statement = SearchStatement::new("t")
            .and_where("a", Relation::Eq, &["1"])
            .and_where("b", Relation::Eq, &["1"])
            .or_where("c", Relation::Eq, &["1"]);
        assert_eq!(fields(&QueryPlanner::plan(&statement.where_clauses)), "((a & b) | c)");

        let statement = SearchStatement::new("t")
            .and_where("a", Relation::Eq, &["1"])
            .or_where("b", Relation::Eq, &["1"])
            .and_where("c", Relation::Eq, &["1"])
            .or_where("d", Relation::Eq, &["1"])
            .and_where("e", Relation::Eq, &["1"]);
        assert_eq!(fields(&QueryPlanner::plan(&statement.where_clauses)), "(a | (b & c) | (d & e))");
    }

    #[test]
    fn uniform_joiners() {
        let all_and = SearchStatement::new("t")
            .and_where("a", Relation::Eq, &["1"])
            .and_where("b", Relation::Eq, &["1"]);
        assert_eq!(fields(&QueryPlanner::plan(&all_and.where_clauses)), "(a & b)");

        let all_or = SearchStatement::new("t")
            .or_where("a", Relation::Eq, &["1"])
            .or_where("b", Relation::Eq, &["1"]);
        assert_eq!(fields(&QueryPlanner::plan(&all_or.where_clauses)), "(a | b)");
    }

    #[test]
    fn degenerate_plans() {
        assert_eq!(QueryPlanner::plan(&[]), LogicalPlan::Scan);
        let single = SearchStatement::new("t").and_where("a", Relation::Eq, &["1"]);
        assert_eq!(QueryPlanner::plan(&single.where_clauses), leaf("a"));
    }
}
