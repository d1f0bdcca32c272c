//! Resource paths: typed segments and a model-aware parser for relative URLs.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::error::Error;
use crate::model::{Model, ResourceKind};
use crate::value::Value;

/// One `name=value` (or bare `value`) entry of a key segment.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue {
    /// `None` for the single-key short form, e.g. `Products(1)`.
    pub name: Option<String>,
    pub value: Value,
}

impl KeyValue {
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }

    pub fn positional(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    EntitySet(String),
    Singleton(String),
    Key(Vec<KeyValue>),
    Navigation(String),
    Property(String),
    TypeCast(String),
    Count,
    Value,
    OperationImport(String),
    Operation(String),
    Ref,
    DynamicProperty(String),
}

/// Discriminant of [`PathSegment`], used to key segment handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    EntitySet,
    Singleton,
    Key,
    Navigation,
    Property,
    TypeCast,
    Count,
    Value,
    OperationImport,
    Operation,
    Ref,
    DynamicProperty,
}

impl PathSegment {
    #[must_use]
    pub fn kind(&self) -> SegmentKind {
        match self {
            PathSegment::EntitySet(_) => SegmentKind::EntitySet,
            PathSegment::Singleton(_) => SegmentKind::Singleton,
            PathSegment::Key(_) => SegmentKind::Key,
            PathSegment::Navigation(_) => SegmentKind::Navigation,
            PathSegment::Property(_) => SegmentKind::Property,
            PathSegment::TypeCast(_) => SegmentKind::TypeCast,
            PathSegment::Count => SegmentKind::Count,
            PathSegment::Value => SegmentKind::Value,
            PathSegment::OperationImport(_) => SegmentKind::OperationImport,
            PathSegment::Operation(_) => SegmentKind::Operation,
            PathSegment::Ref => SegmentKind::Ref,
            PathSegment::DynamicProperty(_) => SegmentKind::DynamicProperty,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::EntitySet(n)
            | PathSegment::Singleton(n)
            | PathSegment::Navigation(n)
            | PathSegment::Property(n)
            | PathSegment::TypeCast(n)
            | PathSegment::DynamicProperty(n) => f.write_str(n),
            PathSegment::OperationImport(n) | PathSegment::Operation(n) => write!(f, "{n}()"),
            PathSegment::Key(values) => {
                f.write_str("(")?;
                for (i, kv) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match &kv.name {
                        Some(name) => write!(f, "{name}={}", kv.value)?,
                        None => write!(f, "{}", kv.value)?,
                    }
                }
                f.write_str(")")
            }
            PathSegment::Count => f.write_str("$count"),
            PathSegment::Value => f.write_str("$value"),
            PathSegment::Ref => f.write_str("$ref"),
        }
    }
}

/// An ordered list of path segments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourcePath {
    segments: Vec<PathSegment>,
}

impl ResourcePath {
    #[must_use]
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Parses a relative URL path such as `Customers(1)/Orders/$count`.
    ///
    /// Names are resolved against `model` so navigations, structural properties and
    /// type casts come out as distinct segment kinds.
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` for unknown names or malformed key syntax.
    pub fn parse(model: &Model, path: &str) -> Result<Self, Error> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = Vec::new();
        // Structured type reached so far; `None` once a primitive value is addressed.
        let mut current: Option<String> = None;

        for (index, raw) in split_segments(path)?.into_iter().enumerate() {
            let (name, key) = split_key(raw)?;

            if index == 0 {
                if let Some(resource) = model.resource(name) {
                    segments.push(match resource.kind {
                        ResourceKind::EntitySet => PathSegment::EntitySet(name.to_owned()),
                        ResourceKind::Singleton => PathSegment::Singleton(name.to_owned()),
                    });
                    current = Some(resource.entity_type.clone());
                } else if key.as_deref() == Some("") {
                    segments.push(PathSegment::OperationImport(name.to_owned()));
                    continue;
                } else {
                    return Err(Error::invalid_path(format!("unknown resource '{name}'")));
                }
            } else {
                match name {
                    "$count" => segments.push(PathSegment::Count),
                    "$value" => segments.push(PathSegment::Value),
                    "$ref" => segments.push(PathSegment::Ref),
                    _ => {
                        let ty = current.as_deref().ok_or_else(|| {
                            Error::invalid_path(format!("'{name}' follows a primitive value"))
                        })?;
                        let (segment, next) = resolve_member(model, ty, name, key.as_deref())?;
                        segments.push(segment);
                        current = next;
                        if key.as_deref() == Some("") {
                            continue;
                        }
                    }
                }
            }

            if let Some(key) = key {
                segments.push(PathSegment::Key(parse_key(&key)?));
            }
        }

        if segments.is_empty() {
            return Err(Error::invalid_path("empty path"));
        }
        Ok(Self { segments })
    }
}

impl From<Vec<PathSegment>> for ResourcePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 && !matches!(segment, PathSegment::Key(_)) {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

fn resolve_member(
    model: &Model,
    type_name: &str,
    name: &str,
    key: Option<&str>,
) -> Result<(PathSegment, Option<String>), Error> {
    if key == Some("") {
        return Ok((PathSegment::Operation(name.to_owned()), Some(type_name.to_owned())));
    }
    if let Some(nav) = model.navigation(type_name, name) {
        return Ok((
            PathSegment::Navigation(name.to_owned()),
            Some(nav.target.clone()),
        ));
    }
    if let Some(prop) = model.property(type_name, name) {
        let next = prop.ty.element().structured_name().map(str::to_owned);
        return Ok((PathSegment::Property(name.to_owned()), next));
    }
    // Casts may be namespace-qualified; the model uses simple names.
    let simple = name.rsplit('.').next().unwrap_or(name);
    if let Some(target) = model.structured_type(simple) {
        return Ok((
            PathSegment::TypeCast(target.name.clone()),
            Some(target.name.clone()),
        ));
    }
    Err(Error::invalid_path(format!(
        "type '{type_name}' has no member '{name}'"
    )))
}

/// Splits on `/` outside quoted key literals.
fn split_segments(path: &str) -> Result<Vec<&str>, Error> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in path.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '/' if !quoted => {
                if i > start {
                    out.push(&path[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err(Error::invalid_path("unterminated string literal"));
    }
    if start < path.len() {
        out.push(&path[start..]);
    }
    Ok(out)
}

/// `Name(key)` -> (`Name`, `Some("key")`); `Name` -> (`Name`, `None`).
fn split_key(raw: &str) -> Result<(&str, Option<String>), Error> {
    let Some(open) = raw.find('(') else {
        return Ok((raw, None));
    };
    let inner = raw[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| Error::invalid_path(format!("unbalanced parentheses in '{raw}'")))?;
    Ok((&raw[..open], Some(inner.to_owned())))
}

fn parse_key(raw: &str) -> Result<Vec<KeyValue>, Error> {
    let mut values = Vec::new();
    for part in split_top_level(raw, ',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(Error::invalid_path(format!("empty key value in '({raw})'")));
        }
        match split_top_level(part, '=').as_slice() {
            [value] => values.push(KeyValue::positional(parse_literal(value)?)),
            [name, value] => values.push(KeyValue::named(name.trim(), parse_literal(value)?)),
            _ => return Err(Error::invalid_path(format!("malformed key '{part}'"))),
        }
    }
    Ok(values)
}

fn split_top_level(raw: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in raw.char_indices() {
        if c == '\'' {
            quoted = !quoted;
        } else if c == sep && !quoted {
            out.push(&raw[start..i]);
            start = i + c.len_utf8();
        }
    }
    out.push(&raw[start..]);
    out
}

/// URL literal syntax: `'text'` (with `''` escapes), integers, decimals, booleans, `null`.
/// Anything else is kept as text and converted against the key's declared type later.
fn parse_literal(raw: &str) -> Result<Value, Error> {
    let raw = raw.trim();
    if let Some(body) = raw.strip_prefix('\'') {
        let body = body
            .strip_suffix('\'')
            .ok_or_else(|| Error::invalid_path(format!("unterminated literal {raw}")))?;
        return Ok(Value::String(body.replace("''", "'")));
    }
    if raw == "null" {
        return Ok(Value::Null);
    }
    if raw == "true" || raw == "false" {
        return Ok(Value::Bool(raw == "true"));
    }
    if let Ok(i) = i64::from_str(raw) {
        return Ok(Value::Int(i));
    }
    if raw.contains('.')
        && let Ok(d) = BigDecimal::from_str(raw)
    {
        return Ok(Value::Decimal(d));
    }
    Ok(Value::String(raw.to_owned()))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::model::tests::sales_model;

    #[test]
    fn parses_keys_navigations_and_count() {
        let model = sales_model();
        let path = ResourcePath::parse(&model, "/Customers(1)/Orders/$count").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::EntitySet("Customers".to_owned()),
                PathSegment::Key(vec![KeyValue::positional(1)]),
                PathSegment::Navigation("Orders".to_owned()),
                PathSegment::Count,
            ]
        );
        assert_eq!(path.to_string(), "Customers(1)/Orders/$count");
    }

    #[test]
    fn parses_composite_and_quoted_keys() {
        let model = sales_model();
        let path = ResourcePath::parse(&model, "OrderLines(OrderId=1,LineNo=2)").unwrap();
        assert_eq!(
            path.segments()[1],
            PathSegment::Key(vec![
                KeyValue::named("OrderId", 1),
                KeyValue::named("LineNo", 2)
            ])
        );

        let quoted = ResourcePath::parse(&model, "Products('it''s/odd')").unwrap();
        assert_eq!(
            quoted.segments()[1],
            PathSegment::Key(vec![KeyValue::positional("it's/odd")])
        );
    }

    #[test]
    fn resolves_casts_properties_and_singletons() {
        let model = sales_model();
        let path = ResourcePath::parse(&model, "Me/Address/Street/$value").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Singleton("Me".to_owned()),
                PathSegment::Property("Address".to_owned()),
                PathSegment::Property("Street".to_owned()),
                PathSegment::Value,
            ]
        );

        let cast = ResourcePath::parse(&model, "Customers/Sales.VipCustomer/Level").unwrap();
        assert_eq!(
            cast.segments()[1],
            PathSegment::TypeCast("VipCustomer".to_owned())
        );
        assert_eq!(cast.segments()[2], PathSegment::Property("Level".to_owned()));
    }

    #[test]
    fn operations_and_refs_are_recognised() {
        let model = sales_model();
        let import = ResourcePath::parse(&model, "ResetData()").unwrap();
        assert_eq!(
            import.segments(),
            &[PathSegment::OperationImport("ResetData".to_owned())]
        );

        let op = ResourcePath::parse(&model, "Customers(1)/Promote()").unwrap();
        assert_eq!(op.segments()[2], PathSegment::Operation("Promote".to_owned()));

        let r = ResourcePath::parse(&model, "Orders(1)/Customer/$ref").unwrap();
        assert_eq!(r.segments()[3], PathSegment::Ref);
    }

    #[test]
    fn rejects_unknown_names_and_bad_syntax() {
        let model = sales_model();
        assert!(matches!(
            ResourcePath::parse(&model, "Nope(1)"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            ResourcePath::parse(&model, "Products(1)/Colour"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            ResourcePath::parse(&model, "Products('open"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            ResourcePath::parse(&model, "Products(1)/Name/Length"),
            Err(Error::InvalidPath(_))
        ));
        assert!(ResourcePath::parse(&model, "").is_err());
    }
}
