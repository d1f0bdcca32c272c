//! Provider-agnostic query IR.
//!
//! A query is a linear pipeline of operators over one root. The root starts out
//! as an abstract [`QuerySource`] placeholder and is replaced with a
//! provider-backed [`ProviderRoot`] during sourcing.

use std::fmt;

use crate::model::{ResourceKind, TypeRef};
use crate::value::Value;

/// Abstract placeholder for "the resource named X". Providers turn it into a [`ProviderRoot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuerySource {
    pub name: String,
    pub element_type: String,
    pub kind: ResourceKind,
}

/// A root that a specific data provider knows how to execute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRoot {
    pub provider: String,
    pub resource: String,
    pub element_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            _ => 3,
        }
    }
}

/// Scalar expression evaluated against one element.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Parameter(String),
    Member { target: Box<Expr>, name: String },
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    #[must_use]
    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    #[must_use]
    pub fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn equals(self, right: Expr) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    #[must_use]
    pub fn not_equals(self, right: Expr) -> Self {
        self.binary(BinaryOp::Ne, right)
    }

    #[must_use]
    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOp::And, right)
    }

    #[must_use]
    pub fn or(self, right: Expr) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    fn fmt_operand(&self, parent: BinaryOp, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary { op, .. } if op.precedence() < parent.precedence() => {
                write!(f, "({self})")
            }
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter(name) => f.write_str(name),
            Expr::Member { target, name } => write!(f, "{target}.{name}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Binary { left, op, right } => {
                left.fmt_operand(*op, f)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(*op, f)
            }
            Expr::Not(inner) => write!(f, "!({inner})"),
        }
    }
}

/// Single-parameter lambda, e.g. `p => p.Id == 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub parameter: String,
    pub body: Expr,
}

impl Lambda {
    pub fn new(parameter: impl Into<String>, body: Expr) -> Self {
        Self {
            parameter: parameter.into(),
            body,
        }
    }

    /// The conventional parameter name for elements of `ty`: its lowercased initial.
    #[must_use]
    pub fn parameter_for(ty: &TypeRef) -> String {
        ty.element()
            .structured_name()
            .and_then(|n| n.chars().next())
            .map_or_else(|| "x".to_owned(), |c| c.to_lowercase().collect())
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.parameter, self.body)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryExpr {
    Source(QuerySource),
    Root(ProviderRoot),
    Filter {
        input: Box<QueryExpr>,
        predicate: Lambda,
    },
    Select {
        input: Box<QueryExpr>,
        selector: Lambda,
        element_type: TypeRef,
    },
    /// Flattens a collection-valued selector.
    SelectMany {
        input: Box<QueryExpr>,
        selector: Lambda,
        element_type: TypeRef,
    },
    OfType {
        input: Box<QueryExpr>,
        type_name: String,
    },
    Skip {
        input: Box<QueryExpr>,
        count: u64,
    },
    Take {
        input: Box<QueryExpr>,
        count: u64,
    },
}

impl QueryExpr {
    pub fn source(source: QuerySource) -> Self {
        QueryExpr::Source(source)
    }

    #[must_use]
    pub fn filter(self, predicate: Lambda) -> Self {
        QueryExpr::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    #[must_use]
    pub fn select(self, selector: Lambda, element_type: TypeRef) -> Self {
        QueryExpr::Select {
            input: Box::new(self),
            selector,
            element_type,
        }
    }

    #[must_use]
    pub fn select_many(self, selector: Lambda, element_type: TypeRef) -> Self {
        QueryExpr::SelectMany {
            input: Box::new(self),
            selector,
            element_type,
        }
    }

    #[must_use]
    pub fn of_type(self, type_name: impl Into<String>) -> Self {
        QueryExpr::OfType {
            input: Box::new(self),
            type_name: type_name.into(),
        }
    }

    #[must_use]
    pub fn skip(self, count: u64) -> Self {
        QueryExpr::Skip {
            input: Box::new(self),
            count,
        }
    }

    #[must_use]
    pub fn take(self, count: u64) -> Self {
        QueryExpr::Take {
            input: Box::new(self),
            count,
        }
    }

    /// Element type of the sequence this expression produces.
    #[must_use]
    pub fn element_type(&self) -> TypeRef {
        match self {
            QueryExpr::Source(s) => TypeRef::entity(s.element_type.clone()),
            QueryExpr::Root(r) => TypeRef::entity(r.element_type.clone()),
            QueryExpr::Select { element_type, .. } | QueryExpr::SelectMany { element_type, .. } => {
                element_type.clone()
            }
            QueryExpr::OfType { type_name, .. } => TypeRef::entity(type_name.clone()),
            QueryExpr::Filter { input, .. }
            | QueryExpr::Skip { input, .. }
            | QueryExpr::Take { input, .. } => input.element_type(),
        }
    }

    #[must_use]
    pub fn input(&self) -> Option<&QueryExpr> {
        match self {
            QueryExpr::Source(_) | QueryExpr::Root(_) => None,
            QueryExpr::Filter { input, .. }
            | QueryExpr::Select { input, .. }
            | QueryExpr::SelectMany { input, .. }
            | QueryExpr::OfType { input, .. }
            | QueryExpr::Skip { input, .. }
            | QueryExpr::Take { input, .. } => Some(input),
        }
    }

    pub fn input_mut(&mut self) -> Option<&mut QueryExpr> {
        match self {
            QueryExpr::Source(_) | QueryExpr::Root(_) => None,
            QueryExpr::Filter { input, .. }
            | QueryExpr::Select { input, .. }
            | QueryExpr::SelectMany { input, .. }
            | QueryExpr::OfType { input, .. }
            | QueryExpr::Skip { input, .. }
            | QueryExpr::Take { input, .. } => Some(input),
        }
    }

    /// The innermost node: a source placeholder or a provider root.
    #[must_use]
    pub fn leaf(&self) -> &QueryExpr {
        let mut node = self;
        while let Some(input) = node.input() {
            node = input;
        }
        node
    }

    /// Name of the resource the query starts from.
    #[must_use]
    pub fn root_name(&self) -> Option<&str> {
        match self.leaf() {
            QueryExpr::Source(s) => Some(&s.name),
            QueryExpr::Root(r) => Some(&r.resource),
            _ => None,
        }
    }

    /// True once no abstract placeholder remains.
    #[must_use]
    pub fn is_sourced(&self) -> bool {
        !matches!(self.leaf(), QueryExpr::Source(_))
    }

    /// The same query without its outermost `Skip`/`Take` operators.
    #[must_use]
    pub fn strip_paging(&self) -> QueryExpr {
        match self {
            QueryExpr::Skip { input, .. } | QueryExpr::Take { input, .. } => input.strip_paging(),
            other => other.clone(),
        }
    }

    /// The `$top` in effect, if the outermost operators contain one.
    #[must_use]
    pub fn top(&self) -> Option<u64> {
        match self {
            QueryExpr::Take { count, .. } => Some(*count),
            QueryExpr::Skip { input, .. } => input.top(),
            _ => None,
        }
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::Source(s) => f.write_str(&s.name),
            QueryExpr::Root(r) => f.write_str(&r.resource),
            QueryExpr::Filter { input, predicate } => write!(f, "{input}.Where({predicate})"),
            QueryExpr::Select {
                input, selector, ..
            } => write!(f, "{input}.Select({selector})"),
            QueryExpr::SelectMany {
                input, selector, ..
            } => write!(f, "{input}.SelectMany({selector})"),
            QueryExpr::OfType { input, type_name } => write!(f, "{input}.OfType<{type_name}>()"),
            QueryExpr::Skip { input, count } => write!(f, "{input}.Skip({count})"),
            QueryExpr::Take { input, count } => write!(f, "{input}.Take({count})"),
        }
    }
}
