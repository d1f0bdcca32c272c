//! Translation of a parsed resource path into a query expression.
//!
//! Each segment kind has a handler in a dispatch table; kinds without one are
//! reported as not implemented rather than silently skipped.

use std::collections::HashMap;

use tracing::debug;

use crate::api::Api;
use crate::error::Error;
use crate::model::{Model, Multiplicity, StructuredKind, TypeRef};
use crate::query::{Expr, KeyValue, Lambda, PathSegment, QueryExpr, ResourcePath, SegmentKind};
use crate::value::Value;

type SegmentHandler<'a> = fn(&mut QueryBuilder<'a>, &PathSegment) -> Result<(), Error>;

/// Output of [`QueryBuilder::build`].
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltQuery {
    pub query: QueryExpr,
    /// Element type of the addressed resource.
    pub element_type: TypeRef,
    pub is_count_path_segment_present: bool,
    pub is_value_path_segment_present: bool,
}

pub struct QueryBuilder<'a> {
    api: &'a Api,
    model: &'a Model,
    handlers: HashMap<SegmentKind, SegmentHandler<'a>>,
    query: Option<QueryExpr>,
    current_type: Option<TypeRef>,
    is_count_path_segment_present: bool,
    is_value_path_segment_present: bool,
}

impl<'a> QueryBuilder<'a> {
    #[must_use]
    pub fn new(api: &'a Api, model: &'a Model) -> Self {
        let mut handlers: HashMap<SegmentKind, SegmentHandler<'a>> = HashMap::new();
        handlers.insert(SegmentKind::EntitySet, Self::handle_root);
        handlers.insert(SegmentKind::Singleton, Self::handle_root);
        handlers.insert(SegmentKind::Key, Self::handle_key);
        handlers.insert(SegmentKind::Navigation, Self::handle_navigation);
        handlers.insert(SegmentKind::Property, Self::handle_property);
        handlers.insert(SegmentKind::TypeCast, Self::handle_type_cast);
        handlers.insert(SegmentKind::Count, Self::handle_count);
        handlers.insert(SegmentKind::Value, Self::handle_value);
        handlers.insert(SegmentKind::OperationImport, Self::handle_operation);
        handlers.insert(SegmentKind::Operation, Self::handle_operation);

        Self {
            api,
            model,
            handlers,
            query: None,
            current_type: None,
            is_count_path_segment_present: false,
            is_value_path_segment_present: false,
        }
    }

    /// Walks `path` left to right and composes the query it addresses.
    ///
    /// # Errors
    /// - `Error::NotImplemented` for segment kinds with no handler (`$ref`, dynamic properties)
    /// - `Error::Precondition` for a second root or a key before any root
    /// - `Error::InvalidPath` for unknown members or malformed keys
    /// - `Error::Unsupported` for casts to complex types
    pub fn build(mut self, path: &ResourcePath) -> Result<BuiltQuery, Error> {
        for segment in path.segments() {
            let handler = self
                .handlers
                .get(&segment.kind())
                .copied()
                .ok_or_else(|| Error::NotImplemented {
                    segment: segment.to_string(),
                })?;
            handler(&mut self, segment)?;
        }

        let (Some(query), Some(element_type)) = (self.query, self.current_type) else {
            return Err(Error::invalid_path(format!(
                "'{path}' does not address a queryable resource"
            )));
        };
        Ok(BuiltQuery {
            query,
            element_type,
            is_count_path_segment_present: self.is_count_path_segment_present,
            is_value_path_segment_present: self.is_value_path_segment_present,
        })
    }

    fn take_query(&mut self, segment: &PathSegment) -> Result<QueryExpr, Error> {
        self.query.take().ok_or_else(|| {
            Error::precondition(format!("'{segment}' appears before any root segment"))
        })
    }

    fn current_structured(&self, segment: &PathSegment) -> Result<String, Error> {
        self.current_type
            .as_ref()
            .and_then(TypeRef::structured_name)
            .map(str::to_owned)
            .ok_or_else(|| Error::invalid_path(format!("'{segment}' does not follow a structured value")))
    }

    fn null_guarded(query: QueryExpr, parameter: &str, member: &str) -> QueryExpr {
        query.filter(Lambda::new(
            parameter,
            Expr::param(parameter)
                .member(member)
                .not_equals(Expr::Literal(Value::Null)),
        ))
    }

    fn handle_root(&mut self, segment: &PathSegment) -> Result<(), Error> {
        let (PathSegment::EntitySet(name) | PathSegment::Singleton(name)) = segment else {
            return Err(Error::precondition(format!("'{segment}' is not a root segment")));
        };
        if self.query.is_some() {
            return Err(Error::precondition(format!(
                "root segment '{name}' must be the first segment of the path"
            )));
        }
        let source = self.api.source(self.model, name)?;
        self.current_type = Some(source.element_type());
        self.query = Some(source);
        Ok(())
    }

    fn handle_key(&mut self, segment: &PathSegment) -> Result<(), Error> {
        let PathSegment::Key(values) = segment else {
            return Err(Error::precondition(format!("'{segment}' is not a key segment")));
        };
        if self.query.is_none() {
            return Err(Error::precondition("key segment appears before any root segment"));
        }
        let type_name = self.current_structured(segment)?;
        let parameter = Lambda::parameter_for(&TypeRef::entity(type_name.as_str()));

        let mut predicate: Option<Expr> = None;
        for (name, literal) in resolve_key(self.model, &type_name, values)? {
            let comparison = Expr::param(&parameter)
                .member(name)
                .equals(Expr::Literal(literal));
            predicate = Some(match predicate {
                Some(acc) => acc.and(comparison),
                None => comparison,
            });
        }

        let Some(predicate) = predicate else {
            return Err(Error::invalid_path("empty key"));
        };
        let query = self.take_query(segment)?;
        self.query = Some(query.filter(Lambda::new(parameter, predicate)));
        Ok(())
    }

    fn handle_navigation(&mut self, segment: &PathSegment) -> Result<(), Error> {
        let PathSegment::Navigation(name) = segment else {
            return Err(Error::precondition(format!("'{segment}' is not a navigation")));
        };
        let source_type = self.current_structured(segment)?;
        let nav = self.model.navigation(&source_type, name).ok_or_else(|| {
            Error::invalid_path(format!("'{source_type}' has no navigation property '{name}'"))
        })?;
        let parameter = Lambda::parameter_for(&TypeRef::entity(source_type.as_str()));
        let target = TypeRef::entity(nav.target.as_str());
        let selector = Lambda::new(parameter.as_str(), Expr::param(&parameter).member(name));

        let query = self.take_query(segment)?;
        self.query = Some(match nav.multiplicity {
            Multiplicity::Many => query.select_many(selector, target.clone()),
            Multiplicity::ZeroOrOne | Multiplicity::One => {
                Self::null_guarded(query, &parameter, name).select(selector, target.clone())
            }
        });
        self.current_type = Some(target);
        Ok(())
    }

    fn handle_property(&mut self, segment: &PathSegment) -> Result<(), Error> {
        let PathSegment::Property(name) = segment else {
            return Err(Error::precondition(format!("'{segment}' is not a property")));
        };
        let source_type = self.current_structured(segment)?;
        let property = self.model.property(&source_type, name).ok_or_else(|| {
            Error::invalid_path(format!("'{source_type}' has no property '{name}'"))
        })?;
        let parameter = Lambda::parameter_for(&TypeRef::entity(source_type.as_str()));
        let selector = Lambda::new(parameter.as_str(), Expr::param(&parameter).member(name));

        let query = self.take_query(segment)?;
        let (query, element_type) = match &property.ty {
            TypeRef::Collection(inner) => {
                let element = inner.as_ref().clone();
                (query.select_many(selector, element.clone()), element)
            }
            ty @ (TypeRef::Complex(_) | TypeRef::Entity(_)) if property.nullable => (
                Self::null_guarded(query, &parameter, name).select(selector, ty.clone()),
                ty.clone(),
            ),
            ty => (query.select(selector, ty.clone()), ty.clone()),
        };
        self.query = Some(query);
        self.current_type = Some(element_type);
        Ok(())
    }

    fn handle_type_cast(&mut self, segment: &PathSegment) -> Result<(), Error> {
        let PathSegment::TypeCast(name) = segment else {
            return Err(Error::precondition(format!("'{segment}' is not a type cast")));
        };
        let target = self
            .model
            .structured_type(name)
            .ok_or_else(|| Error::invalid_path(format!("unknown type '{name}'")))?;
        if target.kind == StructuredKind::Complex {
            return Err(Error::unsupported(format!(
                "casting to complex type '{name}' is not supported"
            )));
        }
        let current = self.current_structured(segment)?;
        if !self.model.is_assignable(&target.name, &current)
            && !self.model.is_assignable(&current, &target.name)
        {
            return Err(Error::invalid_path(format!(
                "'{}' is not related to '{current}'",
                target.name
            )));
        }

        let query = self.take_query(segment)?;
        self.query = Some(query.of_type(target.name.as_str()));
        self.current_type = Some(TypeRef::entity(target.name.as_str()));
        Ok(())
    }

    fn handle_count(&mut self, _segment: &PathSegment) -> Result<(), Error> {
        self.is_count_path_segment_present = true;
        Ok(())
    }

    fn handle_value(&mut self, _segment: &PathSegment) -> Result<(), Error> {
        self.is_value_path_segment_present = true;
        Ok(())
    }

    fn handle_operation(&mut self, segment: &PathSegment) -> Result<(), Error> {
        debug!(%segment, "operation segment left to the operation layer");
        Ok(())
    }
}

/// Names and converts the values of a key segment addressing `type_name`,
/// keeping segment order.
///
/// # Errors
/// `Error::InvalidPath` for unknown, repeated, missing or unnamed composite
/// key parts, `Error::Conversion` when a value does not fit the key's
/// declared type.
pub(crate) fn resolve_key(
    model: &Model,
    type_name: &str,
    values: &[KeyValue],
) -> Result<Vec<(String, Value)>, Error> {
    if values.is_empty() {
        return Err(Error::invalid_path("empty key"));
    }
    let keys = model.key_properties(type_name);
    let mut resolved = Vec::with_capacity(values.len());
    for value in values {
        let name = match (&value.name, keys.as_slice()) {
            (Some(name), _) => name.as_str(),
            (None, [single]) if values.len() == 1 => *single,
            (None, _) => {
                return Err(Error::invalid_path(format!(
                    "composite key of '{type_name}' must name every key property"
                )));
            }
        };
        if !keys.contains(&name) {
            return Err(Error::invalid_path(format!(
                "'{name}' is not a key property of '{type_name}'"
            )));
        }
        if resolved.iter().any(|(seen, _)| seen == name) {
            return Err(Error::invalid_path(format!(
                "key property '{name}' of '{type_name}' is given more than once"
            )));
        }
        let Some(TypeRef::Primitive(kind)) = model.property(type_name, name).map(|p| &p.ty) else {
            return Err(Error::invalid_path(format!(
                "key property '{name}' of '{type_name}' is not primitive"
            )));
        };
        resolved.push((name.to_owned(), value.value.coerce_to(*kind)?));
    }
    // Every name is a distinct key property, so equal lengths mean a full key.
    if resolved.len() != keys.len() {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|key| !resolved.iter().any(|(name, _)| name == key))
            .collect();
        return Err(Error::invalid_path(format!(
            "key of '{type_name}' is missing {}",
            missing.join(", ")
        )));
    }
    Ok(resolved)
}
