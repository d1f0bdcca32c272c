//! EDM-equivalent model: entity sets, singletons and structured types.
//!
//! The model is built once per API type (see [`cache::ModelCache`]) and shared
//! read-only by every request afterwards.

pub mod cache;
pub mod mapper;

use std::collections::BTreeMap;
use std::fmt;

use crate::value::PrimitiveKind;

pub use cache::{ApiTypeKey, ModelCache, ModelError, ModelProvider, StaticModelProvider};
pub use mapper::{DefaultModelMapper, ModelMapper, ResolvedResource};

/// Reference to a type as it appears on a property, a navigation or a query element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    Complex(String),
    Entity(String),
    Collection(Box<TypeRef>),
}

impl TypeRef {
    pub fn entity(name: impl Into<String>) -> Self {
        TypeRef::Entity(name.into())
    }

    pub fn complex(name: impl Into<String>) -> Self {
        TypeRef::Complex(name.into())
    }

    pub fn collection_of(inner: TypeRef) -> Self {
        TypeRef::Collection(Box::new(inner))
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self, TypeRef::Collection(_))
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeRef::Primitive(_))
    }

    /// Element type of a collection, or the type itself.
    #[must_use]
    pub fn element(&self) -> &TypeRef {
        match self {
            TypeRef::Collection(inner) => inner,
            other => other,
        }
    }

    /// Name of the structured type, if this is one.
    #[must_use]
    pub fn structured_name(&self) -> Option<&str> {
        match self {
            TypeRef::Entity(n) | TypeRef::Complex(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(k) => write!(f, "{k}"),
            TypeRef::Complex(n) | TypeRef::Entity(n) => f.write_str(n),
            TypeRef::Collection(inner) => write!(f, "Collection({inner})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuredKind {
    Entity,
    Complex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Multiplicity {
    ZeroOrOne,
    One,
    Many,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub ty: TypeRef,
    pub nullable: bool,
    pub max_length: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationDef {
    pub name: String,
    pub target: String,
    pub multiplicity: Multiplicity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuredType {
    pub name: String,
    pub kind: StructuredKind,
    pub base_type: Option<String>,
    /// Key property names declared on this type (entity types without a base only).
    pub key: Vec<String>,
    pub properties: Vec<PropertyDef>,
    pub navigations: Vec<NavigationDef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    EntitySet,
    Singleton,
}

/// A named root resource: entity set or singleton.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDef {
    pub name: String,
    pub entity_type: String,
    pub kind: ResourceKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Model {
    resources: BTreeMap<String, ResourceDef>,
    types: BTreeMap<String, StructuredType>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.get(name)
    }

    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&ResourceDef> {
        self.resource(name)
            .filter(|r| r.kind == ResourceKind::EntitySet)
    }

    #[must_use]
    pub fn singleton(&self, name: &str) -> Option<&ResourceDef> {
        self.resource(name)
            .filter(|r| r.kind == ResourceKind::Singleton)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceDef> {
        self.resources.values()
    }

    #[must_use]
    pub fn structured_type(&self, name: &str) -> Option<&StructuredType> {
        self.types.get(name)
    }

    /// Walks `name` and its base types, most derived first.
    pub fn type_chain<'a>(
        &'a self,
        name: &str,
    ) -> impl Iterator<Item = &'a StructuredType> + use<'a> {
        let mut next = self.types.get(name);
        std::iter::from_fn(move || {
            let current = next?;
            next = current
                .base_type
                .as_deref()
                .and_then(|b| self.types.get(b));
            Some(current)
        })
    }

    /// Finds a structural property, including inherited ones.
    #[must_use]
    pub fn property(&self, type_name: &str, property: &str) -> Option<&PropertyDef> {
        self.type_chain(type_name)
            .find_map(|t| t.properties.iter().find(|p| p.name == property))
    }

    /// Finds a navigation property, including inherited ones.
    #[must_use]
    pub fn navigation(&self, type_name: &str, navigation: &str) -> Option<&NavigationDef> {
        self.type_chain(type_name)
            .find_map(|t| t.navigations.iter().find(|n| n.name == navigation))
    }

    /// All structural properties visible on `type_name`, base types first.
    #[must_use]
    pub fn all_properties(&self, type_name: &str) -> Vec<&PropertyDef> {
        let chain: Vec<_> = self.type_chain(type_name).collect();
        chain
            .into_iter()
            .rev()
            .flat_map(|t| t.properties.iter())
            .collect()
    }

    /// Key property names, inherited from the root of the type hierarchy.
    #[must_use]
    pub fn key_properties(&self, type_name: &str) -> Vec<&str> {
        self.type_chain(type_name)
            .find(|t| !t.key.is_empty())
            .map(|t| t.key.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// True when `derived` is `base` or inherits from it.
    #[must_use]
    pub fn is_assignable(&self, derived: &str, base: &str) -> bool {
        self.type_chain(derived).any(|t| t.name == base)
    }

    /// First entity set whose element type is `type_name` or one of its bases.
    #[must_use]
    pub fn entity_set_for_type(&self, type_name: &str) -> Option<&ResourceDef> {
        self.type_chain(type_name).find_map(|t| {
            self.resources
                .values()
                .find(|r| r.kind == ResourceKind::EntitySet && r.entity_type == t.name)
        })
    }
}

/// Fluent construction of a [`Model`].
#[derive(Debug, Default)]
#[must_use]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn entity_type(
        mut self,
        name: impl Into<String>,
        configure: impl FnOnce(StructuredTypeBuilder) -> StructuredTypeBuilder,
    ) -> Self {
        let ty = configure(StructuredTypeBuilder::new(name.into(), StructuredKind::Entity)).ty;
        self.model.types.insert(ty.name.clone(), ty);
        self
    }

    pub fn complex_type(
        mut self,
        name: impl Into<String>,
        configure: impl FnOnce(StructuredTypeBuilder) -> StructuredTypeBuilder,
    ) -> Self {
        let ty = configure(StructuredTypeBuilder::new(name.into(), StructuredKind::Complex)).ty;
        self.model.types.insert(ty.name.clone(), ty);
        self
    }

    pub fn entity_set(self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.resource(name.into(), entity_type.into(), ResourceKind::EntitySet)
    }

    pub fn singleton(self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.resource(name.into(), entity_type.into(), ResourceKind::Singleton)
    }

    fn resource(mut self, name: String, entity_type: String, kind: ResourceKind) -> Self {
        self.model.resources.insert(
            name.clone(),
            ResourceDef {
                name,
                entity_type,
                kind,
            },
        );
        self
    }

    pub fn build(self) -> Model {
        self.model
    }
}

#[must_use]
pub struct StructuredTypeBuilder {
    ty: StructuredType,
}

impl StructuredTypeBuilder {
    fn new(name: String, kind: StructuredKind) -> Self {
        Self {
            ty: StructuredType {
                name,
                kind,
                base_type: None,
                key: Vec::new(),
                properties: Vec::new(),
                navigations: Vec::new(),
            },
        }
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.ty.base_type = Some(base.into());
        self
    }

    /// Declares a non-nullable primitive key property.
    pub fn key(mut self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        let name = name.into();
        self.ty.key.push(name.clone());
        self.push_property(name, TypeRef::Primitive(kind), false, None)
    }

    pub fn property(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.push_property(name.into(), TypeRef::Primitive(kind), true, None)
    }

    pub fn required(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.push_property(name.into(), TypeRef::Primitive(kind), false, None)
    }

    pub fn string(self, name: impl Into<String>, max_length: usize) -> Self {
        self.push_property(
            name.into(),
            TypeRef::Primitive(PrimitiveKind::String),
            true,
            Some(max_length),
        )
    }

    pub fn typed(self, name: impl Into<String>, ty: TypeRef, nullable: bool) -> Self {
        self.push_property(name.into(), ty, nullable, None)
    }

    pub fn navigation(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        self.ty.navigations.push(NavigationDef {
            name: name.into(),
            target: target.into(),
            multiplicity,
        });
        self
    }

    fn push_property(
        mut self,
        name: String,
        ty: TypeRef,
        nullable: bool,
        max_length: Option<usize>,
    ) -> Self {
        self.ty.properties.push(PropertyDef {
            name,
            ty,
            nullable,
            max_length,
        });
        self
    }
}
