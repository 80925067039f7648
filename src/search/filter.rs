use std::cell::RefCell;
use roaring::RoaringTreemap;
use crate::analysis::analyzer::Analyzer;
use crate::core::error::{Error, Result};
use crate::core::table::TableContext;
use crate::index::text_index::TextIndex;
use crate::query::ast::Relation;
use crate::schema::schema::{FieldDefinition, FieldRef, FieldType};
use crate::schema::validate::coerce_value;

/// Evaluates single where-clauses of one table into row-id sets.
///
/// Fields resolve against the table's current structure, including the derived
/// date fields. Foreign-key paths are handled by the caller.
pub struct ClauseFilter<'t> {
    table: &'t TableContext,
    live: RefCell<Option<RoaringTreemap>>,
}

impl<'t> ClauseFilter<'t> {
    pub fn new(table: &'t TableContext) -> Self {
        ClauseFilter {
            table,
            live: RefCell::new(None),
        }
    }

    /// Ids of every live row, read once per filter
    pub fn live_ids(&self) -> Result<RoaringTreemap> {
        if let Some(live) = self.live.borrow().as_ref() {
            return Ok(live.clone());
        }
        let live = self.table.rows.live_ids()?;
        *self.live.borrow_mut() = Some(live.clone());
        Ok(live)
    }

    pub fn evaluate(&self, field: &str, relation: Relation, values: &[String]) -> Result<RoaringTreemap> {
        let structure = self.table.current();
        let field_ref = structure.resolve_field(field).ok_or_else(|| {
            Error::validation(format!("Table '{}' has no field '{}'", self.table.name, field))
        })?;

        match field_ref {
            FieldRef::Id => self.by_id(relation, values),
            FieldRef::Version => Err(Error::validation(format!("Field '{}' cannot be searched", field))),
            FieldRef::Field(def) | FieldRef::Derived { base: def, .. } if def.not_indexed => {
                Err(Error::validation(format!(
                    "Field '{}' of table '{}' is not indexed and cannot be searched", def.name, self.table.name
                )))
            }
            FieldRef::Field(def) if def.field_type == FieldType::Text => self.full_text(def, relation, values),
            FieldRef::Field(def) => self.indexed(&def.name, def.field_type, def.has_like_index(), relation, values),
            FieldRef::Derived { base, component } => {
                let name = component.field_name(&base.name);
                self.indexed(&name, component.value_type(), false, relation, values)
            }
        }
    }

    fn by_id(&self, relation: Relation, values: &[String]) -> Result<RoaringTreemap> {
        let parse = |value: &str| {
            value.parse::<u64>().map_err(|_| Error::validation(format!("'{}' is not a valid id", value)))
        };
        let listed = || -> Result<RoaringTreemap> {
            let mut ids = RoaringTreemap::new();
            for value in values {
                ids.insert(parse(value)?);
            }
            Ok(ids)
        };

        let live = self.live_ids()?;
        match relation {
            Relation::Eq | Relation::In => Ok(listed()? & live),
            Relation::NotEq | Relation::NotIn => Ok(live - listed()?),
            Relation::Gt | Relation::Gte | Relation::Lt | Relation::Lte => {
                let bound = parse(first(values))?;
                Ok(live.iter().filter(|&id| in_range(relation, id, bound)).collect())
            }
            Relation::IsNull => Ok(RoaringTreemap::new()),
            Relation::NotNull => Ok(live),
            Relation::Like => Err(Error::validation("Field 'id' does not support like")),
        }
    }

    fn indexed(
        &self,
        name: &str,
        value_type: FieldType,
        has_like: bool,
        relation: Relation,
        values: &[String],
    ) -> Result<RoaringTreemap> {
        let index = self.table.indexes.field(name);
        // Stored values are canonical, so operands must be too
        let coerce = |value: &str| coerce_value(name, value_type, value, usize::MAX);
        let union = || -> Result<RoaringTreemap> {
            let mut ids = RoaringTreemap::new();
            for value in values {
                ids |= index.ids(&coerce(value)?)?;
            }
            Ok(ids)
        };

        match relation {
            Relation::Eq => index.ids(&coerce(first(values))?),
            Relation::NotEq => Ok(index.all_ids()? - index.ids(&coerce(first(values))?)?),
            Relation::In => union(),
            Relation::NotIn => Ok(index.all_ids()? - union()?),
            Relation::Gt | Relation::Gte | Relation::Lt | Relation::Lte => {
                index.range(value_type, relation, &coerce(first(values))?)
            }
            Relation::IsNull => Ok(self.live_ids()? - index.all_ids()?),
            Relation::NotNull => index.all_ids(),
            Relation::Like => {
                if !has_like {
                    return Err(Error::validation(format!(
                        "Field '{}' does not support like (string, email and url fields only)", name
                    )));
                }
                let pattern = first(values);
                if pattern.is_empty() {
                    return Err(Error::validation(format!("Empty like pattern for field '{}'", name)));
                }
                self.table.indexes.like_index(name).search(pattern)
            }
        }
    }

    /// `=`/`in` match rows holding every word of a value
    fn full_text(&self, def: &FieldDefinition, relation: Relation, values: &[String]) -> Result<RoaringTreemap> {
        match relation {
            Relation::Eq | Relation::In => {
                let analyzer = Analyzer::full_text();
                let index = TextIndex::open(&self.table.layout, &def.name);
                let mut ids = RoaringTreemap::new();
                for value in values {
                    ids |= index.search(&analyzer.terms(value))?;
                }
                Ok(ids)
            }
            Relation::IsNull => Ok(self.live_ids()? - self.rows_with_value(&def.name)?),
            Relation::NotNull => self.rows_with_value(&def.name),
            other => Err(Error::validation(format!(
                "Text field '{}' supports =, in, isnull and notnull, not '{}'", def.name, other
            ))),
        }
    }

    fn rows_with_value(&self, name: &str) -> Result<RoaringTreemap> {
        let mut ids = RoaringTreemap::new();
        for (id, range) in self.table.rows.locations()? {
            let row = self.table.rows.read_at(range)?;
            if row.get(name).is_some_and(|v| !v.is_empty()) {
                ids.insert(id.0);
            }
        }
        Ok(ids)
    }
}

fn first(values: &[String]) -> &str {
    values.first().map(String::as_str).unwrap_or("")
}

fn in_range(relation: Relation, id: u64, bound: u64) -> bool {
    match relation {
        Relation::Gt => id > bound,
        Relation::Gte => id >= bound,
        Relation::Lt => id < bound,
        Relation::Lte => id <= bound,
        _ => false,
    }
}
