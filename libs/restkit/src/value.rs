//! Dynamic values carried by query expressions, keys and change-set payloads.
//!
//! Conversions between values are culture-invariant: textual input is only ever
//! parsed with locale-independent parsers (`FromStr`, RFC 3339, ISO-8601 dates).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::model::{Model, TypeRef};

/// Primitive EDM kinds understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Int32,
    Int64,
    Decimal,
    String,
    Guid,
    Date,
    DateTimeOffset,
}

impl PrimitiveKind {
    #[must_use]
    pub fn edm_name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Edm.Boolean",
            PrimitiveKind::Int32 => "Edm.Int32",
            PrimitiveKind::Int64 => "Edm.Int64",
            PrimitiveKind::Decimal => "Edm.Decimal",
            PrimitiveKind::String => "Edm.String",
            PrimitiveKind::Guid => "Edm.Guid",
            PrimitiveKind::Date => "Edm.Date",
            PrimitiveKind::DateTimeOffset => "Edm.DateTimeOffset",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edm_name())
    }
}

/// Errors raised while converting values between representations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("cannot convert {found} to {expected}")]
    TypeMismatch {
        expected: String,
        found: &'static str,
    },

    #[error("'{raw}' is not a valid {expected} literal")]
    InvalidLiteral { expected: &'static str, raw: String },

    #[error("{value} is out of range for {expected}")]
    OutOfRange { expected: &'static str, value: String },

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("type '{type_name}' has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },
}

/// A structured instance: an entity or a complex value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copies every field of `other` over this record.
    pub fn merge_from(&mut self, other: Record) {
        self.fields.extend(other.fields);
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Decimal(BigDecimal),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Record(Record),
    Collection(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Guid(_) => "guid",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Record(_) => "record",
            Value::Collection(_) => "collection",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts this value to the given primitive kind without consulting any locale.
    ///
    /// `Null` converts to `Null` for every kind.
    ///
    /// # Errors
    /// Returns `ConversionError` when the value has no representation in `kind`.
    pub fn coerce_to(&self, kind: PrimitiveKind) -> Result<Value, ConversionError> {
        let mismatch = || ConversionError::TypeMismatch {
            expected: kind.edm_name().to_owned(),
            found: self.kind_name(),
        };
        let invalid = |raw: &str| ConversionError::InvalidLiteral {
            expected: kind.edm_name(),
            raw: raw.to_owned(),
        };

        if self.is_null() {
            return Ok(Value::Null);
        }

        match kind {
            PrimitiveKind::Boolean => match self {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("false") => {
                    Ok(Value::Bool(false))
                }
                Value::String(s) => Err(invalid(s)),
                _ => Err(mismatch()),
            },
            PrimitiveKind::Int32 | PrimitiveKind::Int64 => {
                let wide = match self {
                    Value::Int(i) => *i,
                    Value::Decimal(d) => decimal_to_i64(d).ok_or_else(|| {
                        ConversionError::OutOfRange {
                            expected: kind.edm_name(),
                            value: d.to_string(),
                        }
                    })?,
                    Value::String(s) => i64::from_str(s.trim()).map_err(|_| invalid(s))?,
                    _ => return Err(mismatch()),
                };
                if kind == PrimitiveKind::Int32 && i32::try_from(wide).is_err() {
                    return Err(ConversionError::OutOfRange {
                        expected: kind.edm_name(),
                        value: wide.to_string(),
                    });
                }
                Ok(Value::Int(wide))
            }
            PrimitiveKind::Decimal => match self {
                Value::Int(i) => Ok(Value::Decimal(BigDecimal::from(*i))),
                Value::Decimal(d) => Ok(Value::Decimal(d.clone())),
                Value::String(s) => BigDecimal::from_str(s.trim())
                    .map(Value::Decimal)
                    .map_err(|_| invalid(s)),
                _ => Err(mismatch()),
            },
            PrimitiveKind::String => match self {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Bool(_)
                | Value::Int(_)
                | Value::Decimal(_)
                | Value::Guid(_)
                | Value::Date(_)
                | Value::DateTime(_) => Ok(Value::String(self.to_plain_string())),
                _ => Err(mismatch()),
            },
            PrimitiveKind::Guid => match self {
                Value::Guid(g) => Ok(Value::Guid(*g)),
                Value::String(s) => Uuid::parse_str(s.trim())
                    .map(Value::Guid)
                    .map_err(|_| invalid(s)),
                _ => Err(mismatch()),
            },
            PrimitiveKind::Date => match self {
                Value::Date(d) => Ok(Value::Date(*d)),
                Value::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| invalid(s)),
                _ => Err(mismatch()),
            },
            PrimitiveKind::DateTimeOffset => match self {
                Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(|n| Value::DateTime(n.and_utc()))
                    .ok_or_else(mismatch),
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|_| invalid(s)),
                _ => Err(mismatch()),
            },
        }
    }

    /// Orders two values of compatible kinds. Integers and decimals compare numerically.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Decimal(b)) => BigDecimal::from(*a).partial_cmp(b),
            (Value::Decimal(a), Value::Int(b)) => a.partial_cmp(&BigDecimal::from(*b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Record(a), Value::Record(b)) if a == b => Some(Ordering::Equal),
            (Value::Collection(a), Value::Collection(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(|| Json::String(d.to_string()), Json::Number),
            Value::String(_) | Value::Guid(_) | Value::Date(_) | Value::DateTime(_) => {
                Json::String(self.to_plain_string())
            }
            Value::Record(r) => Json::Object(
                r.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Collection(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Materialises a JSON payload as a value of the given model type.
    ///
    /// Object payloads may carry an `@odata.type` annotation naming a derived type;
    /// other annotations are ignored.
    ///
    /// # Errors
    /// Returns `ConversionError` when the JSON shape does not fit the type.
    pub fn from_json(
        json: &serde_json::Value,
        ty: &TypeRef,
        model: &Model,
    ) -> Result<Value, ConversionError> {
        use serde_json::Value as Json;

        if json.is_null() {
            return Ok(Value::Null);
        }

        match ty {
            TypeRef::Primitive(kind) => {
                let raw = match json {
                    Json::Bool(b) => Value::Bool(*b),
                    Json::Number(n) => match n.as_i64() {
                        Some(i) => Value::Int(i),
                        None => BigDecimal::from_str(&n.to_string())
                            .map(Value::Decimal)
                            .map_err(|_| ConversionError::InvalidLiteral {
                                expected: kind.edm_name(),
                                raw: n.to_string(),
                            })?,
                    },
                    Json::String(s) => Value::String(s.clone()),
                    other => {
                        return Err(ConversionError::TypeMismatch {
                            expected: kind.edm_name().to_owned(),
                            found: json_kind(other),
                        });
                    }
                };
                raw.coerce_to(*kind)
            }
            TypeRef::Entity(name) | TypeRef::Complex(name) => {
                let Json::Object(map) = json else {
                    return Err(ConversionError::TypeMismatch {
                        expected: name.clone(),
                        found: json_kind(json),
                    });
                };
                let type_name = match map.get("@odata.type").and_then(Json::as_str) {
                    Some(annotated) => {
                        let annotated = annotated.trim_start_matches('#');
                        if !model.is_assignable(annotated, name) {
                            return Err(ConversionError::UnknownType(annotated.to_owned()));
                        }
                        annotated.to_owned()
                    }
                    None => name.clone(),
                };
                let mut record = Record::new(type_name.clone());
                for (key, value) in map {
                    if key.starts_with('@') || key.contains("@odata.") {
                        continue;
                    }
                    let property = model.property(&type_name, key).ok_or_else(|| {
                        ConversionError::UnknownProperty {
                            type_name: type_name.clone(),
                            property: key.clone(),
                        }
                    })?;
                    record.set(key.clone(), Value::from_json(value, &property.ty, model)?);
                }
                Ok(Value::Record(record))
            }
            TypeRef::Collection(inner) => {
                let Json::Array(items) = json else {
                    return Err(ConversionError::TypeMismatch {
                        expected: format!("Collection({inner})"),
                        found: json_kind(json),
                    });
                };
                items
                    .iter()
                    .map(|item| Value::from_json(item, inner, model))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Collection)
            }
        }
    }

    fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Guid(g) => g.hyphenated().to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            other => other.to_string(),
        }
    }
}

fn decimal_to_i64(d: &BigDecimal) -> Option<i64> {
    if d.with_scale(0) != *d {
        return None;
    }
    d.to_i64()
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Literal rendering used by expression display.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Guid(g) => write!(f, "{}", g.hyphenated()),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Record(r) => write!(f, "{{{}}}", r.type_name),
            Value::Collection(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
