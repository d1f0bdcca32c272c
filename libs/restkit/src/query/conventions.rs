//! Query stages backed by `CanRead<Set>` and `OnFilter<Set>` convention hooks.

use std::sync::Arc;

use crate::chain::Next;
use crate::conventions::{ConventionDispatcher, HookName};
use crate::query::{
    QueryExpr, QueryExpressionAuthorizer, QueryExpressionContext, QueryExpressionProcessor,
};

pub struct ConventionBasedQueryExpressionAuthorizer {
    dispatcher: Arc<ConventionDispatcher>,
}

impl ConventionBasedQueryExpressionAuthorizer {
    #[must_use]
    pub fn new(dispatcher: Arc<ConventionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl QueryExpressionAuthorizer for ConventionBasedQueryExpressionAuthorizer {
    fn authorize(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionAuthorizer>,
    ) -> bool {
        if let Some(reference) = ctx.model_reference()
            && let Some(resource) = reference.resource_name()
        {
            let name = HookName::can_read(resource, reference.element_type());
            if self.dispatcher.can_read(ctx.model(), &name) == Some(false) {
                return false;
            }
        }
        next.authorize(ctx)
    }
}

/// Applies `OnFilter<Set>` on top of whatever the rest of the chain produced.
pub struct ConventionBasedQueryExpressionProcessor {
    dispatcher: Arc<ConventionDispatcher>,
}

impl ConventionBasedQueryExpressionProcessor {
    #[must_use]
    pub fn new(dispatcher: Arc<ConventionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl QueryExpressionProcessor for ConventionBasedQueryExpressionProcessor {
    fn process(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionProcessor>,
    ) -> Option<QueryExpr> {
        let processed = next.process(ctx);
        let Some(reference) = ctx.model_reference() else {
            return processed;
        };
        let Some(resource) = reference.resource_name() else {
            return processed;
        };
        let name = HookName::on_filter(resource, reference.element_type());
        let base = processed.as_ref().or(ctx.visited_node())?;
        let filtered = self
            .dispatcher
            .on_filter(ctx.model(), &name, reference.element_type(), base);
        filtered.or(processed)
    }
}
