//! Drives a query through the expression pipeline and then the executors.

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::api::{Api, ApiConfiguration};
use crate::error::Error;
use crate::property_bag::keys;
use crate::provider::ExecutionOptions;
use crate::query::{QueryContext, QueryExpr, QueryExpressionContext, QueryRequest, QueryResult};
use crate::value::Value;

/// Bound on how many times expansion may rewrite the same position.
const MAX_EXPANSIONS: usize = 32;

#[instrument(skip_all, fields(query = %request.expression, count = request.is_count_request))]
pub(crate) async fn execute(
    api: &Api,
    request: QueryRequest,
    cancel: &CancellationToken,
) -> Result<QueryResult, Error> {
    let configuration = api.configuration();
    let model = api.model(cancel).await?;

    let mut expression = request.expression.clone();
    {
        let mut ctx = QueryExpressionContext::new(&request, &model);
        Visitor { configuration }.visit(&mut ctx, &mut expression, false, 0, &[])?;
    }
    debug!(%expression, "query expression processed");

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    api.properties().set(
        keys::EXECUTION_OPTIONS,
        ExecutionOptions {
            max_results: configuration.config().query.max_top,
        },
    );
    let ctx = QueryContext {
        api,
        model: &model,
        cancel,
    };
    let executors = configuration.query_executors();

    if request.is_count_request {
        let count = executors.head().count(&ctx, &expression).await?;
        api.properties().set(keys::TOTAL_COUNT, count);
        return Ok(QueryResult {
            results: vec![Value::Int(i64::try_from(count).unwrap_or(i64::MAX))],
            total_count: Some(count),
        });
    }

    let total_count = if request.include_total_count {
        let count = executors.head().count(&ctx, &expression.strip_paging()).await?;
        api.properties().set(keys::TOTAL_COUNT, count);
        Some(count)
    } else {
        None
    };
    let results = executors.head().execute(&ctx, &expression).await?;
    debug!(results = results.len(), ?total_count, "query executed");

    Ok(QueryResult {
        results,
        total_count,
    })
}

enum Outcome {
    Done,
    Expanded(QueryExpr),
}

struct Visitor<'c> {
    configuration: &'c ApiConfiguration,
}

impl Visitor<'_> {
    /// Post-order walk: inputs are settled before the node that consumes them.
    ///
    /// `settled` holds subtrees that already went through every stage; an
    /// expansion that keeps one of them does not process it a second time.
    fn visit(
        &self,
        ctx: &mut QueryExpressionContext<'_>,
        node: &mut QueryExpr,
        embedded: bool,
        expansions: usize,
        settled: &[QueryExpr],
    ) -> Result<(), Error> {
        if settled.contains(node) {
            return Ok(());
        }
        let feeds_projection = matches!(node, QueryExpr::Select { .. } | QueryExpr::SelectMany { .. });
        if let Some(input) = node.input_mut() {
            self.visit(ctx, input, embedded || feeds_projection, expansions, settled)?;
        }

        ctx.enter(node.clone(), embedded);
        let outcome = self.run_stages(ctx);
        let current = ctx.leave();

        match (outcome?, current) {
            (Outcome::Done, Some(current)) => {
                *node = current;
                Ok(())
            }
            (Outcome::Expanded(mut expanded), _) => {
                if expansions >= MAX_EXPANSIONS {
                    return Err(Error::precondition(format!(
                        "query expansion did not settle after {MAX_EXPANSIONS} rewrites"
                    )));
                }
                let mut settled = settled.to_vec();
                let mut input = node.input();
                while let Some(done) = input {
                    settled.push(done.clone());
                    input = done.input();
                }
                self.visit(ctx, &mut expanded, embedded, expansions + 1, &settled)?;
                *node = expanded;
                Ok(())
            }
            (Outcome::Done, None) => Err(Error::precondition("visited node stack is empty")),
        }
    }

    fn run_stages(&self, ctx: &mut QueryExpressionContext<'_>) -> Result<Outcome, Error> {
        let configuration = self.configuration;

        if let Some(sourced) = configuration.query_sourcers().head().source(ctx) {
            ctx.replace_visited(sourced);
        }
        if let Some(QueryExpr::Source(source)) = ctx.visited_node() {
            return Err(Error::unsupported(format!(
                "no data provider can source '{}'",
                source.name
            )));
        }

        if !configuration.query_authorizers().head().authorize(ctx) {
            let target = ctx
                .model_reference()
                .and_then(|r| r.resource_name().map(str::to_owned))
                .or_else(|| ctx.visited_node().and_then(|n| n.root_name().map(str::to_owned)))
                .unwrap_or_default();
            debug!(%target, "query authorization denied");
            return Err(Error::forbidden(target));
        }

        if let Some(expanded) = configuration.query_expanders().head().expand(ctx)
            && ctx.visited_node() != Some(&expanded)
        {
            return Ok(Outcome::Expanded(expanded));
        }

        if let Some(processed) = configuration.query_processors().head().process(ctx) {
            ctx.replace_visited(processed);
        }
        Ok(Outcome::Done)
    }
}
