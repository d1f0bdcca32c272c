//! Interpretation of the query IR over in-memory rows.

use std::cmp::Ordering;
use std::collections::HashMap;

use restkit::model::Multiplicity;
use restkit::query::{BinaryOp, Expr, Lambda, QueryExpr};
use restkit::{Model, Record, Value};

use crate::Relation;
use crate::error::MemoryStoreError;

pub(crate) struct Evaluator<'a> {
    pub(crate) model: &'a Model,
    pub(crate) provider: &'a str,
    pub(crate) tables: &'a HashMap<String, Vec<Record>>,
    pub(crate) relations: &'a [Relation],
}

impl Evaluator<'_> {
    pub(crate) fn run(&self, query: &QueryExpr) -> Result<Vec<Value>, MemoryStoreError> {
        match query {
            QueryExpr::Source(source) => Err(MemoryStoreError::NotSourced(source.name.clone())),
            QueryExpr::Root(root) => {
                if root.provider != self.provider {
                    return Err(MemoryStoreError::ForeignRoot(root.provider.clone()));
                }
                let rows = self
                    .tables
                    .get(&root.resource)
                    .ok_or_else(|| MemoryStoreError::UnknownResource(root.resource.clone()))?;
                Ok(rows.iter().cloned().map(Value::Record).collect())
            }
            QueryExpr::Filter { input, predicate } => {
                let mut kept = Vec::new();
                for row in self.run(input)? {
                    if truthy(&self.apply(predicate, &row)?) {
                        kept.push(row);
                    }
                }
                Ok(kept)
            }
            QueryExpr::Select {
                input, selector, ..
            } => self
                .run(input)?
                .iter()
                .map(|row| self.apply(selector, row))
                .collect(),
            QueryExpr::SelectMany {
                input, selector, ..
            } => {
                let mut flattened = Vec::new();
                for row in self.run(input)? {
                    match self.apply(selector, &row)? {
                        Value::Collection(items) => flattened.extend(items),
                        Value::Null => {}
                        other => return Err(MemoryStoreError::NotACollection(other.kind_name())),
                    }
                }
                Ok(flattened)
            }
            QueryExpr::OfType { input, type_name } => Ok(self
                .run(input)?
                .into_iter()
                .filter(|row| {
                    row.as_record()
                        .is_some_and(|r| self.model.is_assignable(r.type_name(), type_name))
                })
                .collect()),
            QueryExpr::Skip { input, count } => {
                Ok(self.run(input)?.into_iter().skip(to_usize(*count)).collect())
            }
            QueryExpr::Take { input, count } => {
                Ok(self.run(input)?.into_iter().take(to_usize(*count)).collect())
            }
        }
    }

    fn apply(&self, lambda: &Lambda, row: &Value) -> Result<Value, MemoryStoreError> {
        self.eval(&lambda.body, &lambda.parameter, row)
    }

    fn eval(&self, expr: &Expr, parameter: &str, row: &Value) -> Result<Value, MemoryStoreError> {
        match expr {
            Expr::Parameter(name) if name == parameter => Ok(row.clone()),
            Expr::Parameter(name) => Err(MemoryStoreError::UnboundParameter(name.clone())),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Member { target, name } => match self.eval(target, parameter, row)? {
                Value::Null => Ok(Value::Null),
                Value::Record(record) => Ok(self.member(&record, name)),
                other => Err(MemoryStoreError::NotARecord {
                    member: name.clone(),
                    kind: other.kind_name(),
                }),
            },
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval(inner, parameter, row)?))),
            Expr::Binary { left, op, right } => {
                let left = self.eval(left, parameter, row)?;
                // Short-circuit so the right side may rely on the left.
                match op {
                    BinaryOp::And if !truthy(&left) => return Ok(Value::Bool(false)),
                    BinaryOp::Or if truthy(&left) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let right = self.eval(right, parameter, row)?;
                Ok(Value::Bool(binary(*op, &left, &right)))
            }
        }
    }

    /// A stored field, else a joined navigation, else null.
    fn member(&self, record: &Record, name: &str) -> Value {
        if let Some(value) = record.get(name) {
            return value.clone();
        }
        self.navigate(record, name).unwrap_or(Value::Null)
    }

    fn navigate(&self, record: &Record, name: &str) -> Option<Value> {
        let relation = self.relations.iter().find(|r| {
            r.navigation == name && self.model.is_assignable(record.type_name(), &r.source_type)
        })?;
        let navigation = self.model.navigation(record.type_name(), name)?;
        let source = record.get(&relation.source_property).filter(|v| !v.is_null());
        let targets: Vec<Value> = match (source, self.tables.get(&relation.target_set)) {
            (Some(source), Some(rows)) => rows
                .iter()
                .filter(|row| {
                    row.get(&relation.target_property)
                        .is_some_and(|v| v.compare(source) == Some(Ordering::Equal))
                })
                .cloned()
                .map(Value::Record)
                .collect(),
            _ => Vec::new(),
        };
        Some(match navigation.multiplicity {
            Multiplicity::Many => Value::Collection(targets),
            Multiplicity::ZeroOrOne | Multiplicity::One => {
                targets.into_iter().next().unwrap_or(Value::Null)
            }
        })
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Comparisons with null only succeed for `==`/`!=`; incomparable values are unequal.
fn binary(op: BinaryOp, left: &Value, right: &Value) -> bool {
    let ordering = left.compare(right);
    match op {
        BinaryOp::Eq => ordering == Some(Ordering::Equal),
        BinaryOp::Ne => ordering != Some(Ordering::Equal),
        BinaryOp::Gt => ordering == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        BinaryOp::Lt => ordering == Some(Ordering::Less),
        BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::And => truthy(left) && truthy(right),
        BinaryOp::Or => truthy(left) || truthy(right),
    }
}

fn to_usize(count: u64) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}
