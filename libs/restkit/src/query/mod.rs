//! Query side: the expression IR, path parsing, the query builder and the
//! expression pipeline that turns an abstract query into an executable one.

pub mod builder;
pub mod context;
pub mod conventions;
pub mod expr;
pub(crate) mod handler;
pub mod path;
pub mod pipeline;

pub use builder::{BuiltQuery, QueryBuilder};
pub use context::{ModelReference, QueryExpressionContext};
pub use conventions::{
    ConventionBasedQueryExpressionAuthorizer, ConventionBasedQueryExpressionProcessor,
};
pub use expr::{BinaryOp, Expr, Lambda, ProviderRoot, QueryExpr, QuerySource};
pub use path::{KeyValue, PathSegment, ResourcePath, SegmentKind};
pub use pipeline::{
    ProviderExecutor, ProviderSourcer, QueryContext, QueryExecutor, QueryExpressionAuthorizer,
    QueryExpressionExpander, QueryExpressionProcessor, QueryExpressionSourcer,
};

use crate::value::Value;

/// A query ready to enter the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub expression: QueryExpr,
    /// Also compute the count of the unpaged query (`$count=true`).
    pub include_total_count: bool,
    /// The path ended in `/$count`: only the count is wanted.
    pub is_count_request: bool,
}

impl QueryRequest {
    #[must_use]
    pub fn new(expression: QueryExpr) -> Self {
        Self {
            expression,
            include_total_count: false,
            is_count_request: false,
        }
    }

    #[must_use]
    pub fn with_total_count(mut self, include: bool) -> Self {
        self.include_total_count = include;
        self
    }

    #[must_use]
    pub fn count_only(mut self) -> Self {
        self.is_count_request = true;
        self
    }
}

impl From<BuiltQuery> for QueryRequest {
    fn from(built: BuiltQuery) -> Self {
        Self {
            expression: built.query,
            include_total_count: false,
            is_count_request: built.is_count_path_segment_present,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub results: Vec<Value>,
    pub total_count: Option<u64>,
}
