//! Convention-based hooks.
//!
//! An API exposes hook methods through an explicit [`ConventionSurface`]: a table
//! of named methods, each with a visibility, parameter shapes and a body whose
//! variant fixes its return shape. The pipeline synthesises method names from
//! {stage, operation, resource} (see [`names`]) and resolves them through the
//! [`ConventionDispatcher`], which only invokes methods whose visibility and
//! signature fit the hook point.

pub mod dispatch;
pub mod names;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::query::QueryExpr;
use crate::submit::ChangeSetItemAction;
use crate::value::{Record, Value};

pub use dispatch::ConventionDispatcher;
pub use names::{HookName, PipelineState};

/// Declared accessibility of a hook method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    ProtectedInternal,
    Protected,
    Internal,
    Private,
}

impl Visibility {
    /// Hooks are only reachable when visible to derived API types but not public.
    #[must_use]
    pub fn is_hook_accessible(self) -> bool {
        matches!(self, Visibility::Protected | Visibility::ProtectedInternal)
    }
}

/// Declared parameter of a hook method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParameterShape {
    /// An entity of the named type (or a base of it).
    Entity(String),
    /// A queryable over the named element type.
    Queryable(String),
    /// Anything else, e.g. a primitive.
    Other(String),
}

/// What a hook method hands back, derived from its [`MethodBody`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnShape {
    Bool,
    Void,
    Awaitable,
    Queryable,
    Other(&'static str),
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnShape::Bool => f.write_str("bool"),
            ReturnShape::Void => f.write_str("void"),
            ReturnShape::Awaitable => f.write_str("awaitable"),
            ReturnShape::Queryable => f.write_str("queryable"),
            ReturnShape::Other(name) => f.write_str(name),
        }
    }
}

/// Arguments handed to change-set hooks. Hooks own the entity while they run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HookArgs {
    pub resource_set: String,
    pub action: Option<ChangeSetItemAction>,
    pub entity: Option<Record>,
}

pub type PredicateFn = Arc<dyn Fn(&HookArgs) -> bool + Send + Sync>;
pub type ActionFn = Arc<dyn Fn(&mut HookArgs) + Send + Sync>;
pub type AwaitableFn =
    Arc<dyn Fn(HookArgs) -> BoxFuture<'static, anyhow::Result<HookArgs>> + Send + Sync>;
pub type QueryFn = Arc<dyn Fn(QueryExpr) -> QueryExpr + Send + Sync>;
pub type ReturnsFn = Arc<dyn Fn(&HookArgs) -> Value + Send + Sync>;

#[derive(Clone)]
pub enum MethodBody {
    Predicate(PredicateFn),
    Action(ActionFn),
    Awaitable(AwaitableFn),
    Query(QueryFn),
    /// A method returning some other type; never a valid hook.
    Returns(&'static str, ReturnsFn),
}

impl MethodBody {
    #[must_use]
    pub fn return_shape(&self) -> ReturnShape {
        match self {
            MethodBody::Predicate(_) => ReturnShape::Bool,
            MethodBody::Action(_) => ReturnShape::Void,
            MethodBody::Awaitable(_) => ReturnShape::Awaitable,
            MethodBody::Query(_) => ReturnShape::Queryable,
            MethodBody::Returns(name, _) => ReturnShape::Other(name),
        }
    }
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodBody({})", self.return_shape())
    }
}

/// One named method of the surface.
#[derive(Clone, Debug)]
#[must_use]
pub struct ConventionMethod {
    pub name: String,
    pub visibility: Visibility,
    pub parameters: Vec<ParameterShape>,
    pub body: MethodBody,
}

impl ConventionMethod {
    /// A protected method with no parameters.
    pub fn new(name: impl Into<String>, body: MethodBody) -> Self {
        Self {
            name: name.into(),
            visibility: Visibility::Protected,
            parameters: Vec::new(),
            body,
        }
    }

    pub fn predicate(
        name: impl Into<String>,
        f: impl Fn(&HookArgs) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, MethodBody::Predicate(Arc::new(f)))
    }

    pub fn action(
        name: impl Into<String>,
        f: impl Fn(&mut HookArgs) + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, MethodBody::Action(Arc::new(f)))
    }

    pub fn awaitable<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> BoxFuture<'static, anyhow::Result<HookArgs>> + Send + Sync + 'static,
    {
        Self::new(name, MethodBody::Awaitable(Arc::new(f)))
    }

    pub fn query(
        name: impl Into<String>,
        f: impl Fn(QueryExpr) -> QueryExpr + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, MethodBody::Query(Arc::new(f)))
    }

    pub fn returning(
        name: impl Into<String>,
        type_name: &'static str,
        f: impl Fn(&HookArgs) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, MethodBody::Returns(type_name, Arc::new(f)))
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_entity_parameter(mut self, type_name: impl Into<String>) -> Self {
        self.parameters.push(ParameterShape::Entity(type_name.into()));
        self
    }

    pub fn with_queryable_parameter(mut self, element_type: impl Into<String>) -> Self {
        self.parameters
            .push(ParameterShape::Queryable(element_type.into()));
        self
    }

    pub fn with_parameter(mut self, shape: ParameterShape) -> Self {
        self.parameters.push(shape);
        self
    }
}

/// The hook methods an API type exposes, keyed by exact name.
#[derive(Clone, Debug, Default)]
pub struct ConventionSurface {
    methods: HashMap<String, ConventionMethod>,
}

impl ConventionSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method; a later method with the same name replaces the earlier one.
    #[must_use]
    pub fn with(mut self, method: ConventionMethod) -> Self {
        self.add(method);
        self
    }

    pub fn add(&mut self, method: ConventionMethod) {
        self.methods.insert(method.name.clone(), method);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ConventionMethod> {
        self.methods.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
