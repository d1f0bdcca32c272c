//! Resolution and invocation of convention hooks.
//!
//! A hook is only invoked when a method with the exact synthesised name exists,
//! is accessible, returns the shape the hook point expects and takes compatible
//! parameters. Anything else is logged and skipped so the request continues.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ConventionMethod, ConventionSurface, HookArgs, HookName, MethodBody, ParameterShape, ReturnShape};
use crate::error::Error;
use crate::model::Model;
use crate::query::QueryExpr;

/// Parameters a hook point accepts.
#[derive(Clone, Copy, Debug)]
enum Parameters<'a> {
    None,
    /// Nothing, or one entity parameter the actual type is assignable to.
    OptionalEntity(&'a str),
    /// Exactly one queryable over the element type (or a base of it).
    Queryable(&'a str),
}

#[derive(Clone, Copy, Debug)]
struct Expectation<'a> {
    returns: &'a [ReturnShape],
    parameters: Parameters<'a>,
}

pub struct ConventionDispatcher {
    surface: Arc<ConventionSurface>,
    report_near_misses: bool,
}

impl ConventionDispatcher {
    #[must_use]
    pub fn new(surface: Arc<ConventionSurface>, report_near_misses: bool) -> Self {
        Self {
            surface,
            report_near_misses,
        }
    }

    #[must_use]
    pub fn surface(&self) -> &ConventionSurface {
        &self.surface
    }

    /// Runs a change-set authorization hook. `None` when no usable hook exists.
    #[must_use]
    pub fn authorize_item(
        &self,
        model: &Model,
        name: &HookName,
        entity_type: &str,
        args: &HookArgs,
    ) -> Option<bool> {
        let expected = Expectation {
            returns: &[ReturnShape::Bool],
            parameters: Parameters::OptionalEntity(entity_type),
        };
        let method = self.resolve(model, name, expected)?;
        match &method.body {
            MethodBody::Predicate(f) => Some(f(args)),
            _ => None,
        }
    }

    /// Runs a change-set filter hook, handing the arguments back afterwards.
    ///
    /// Returns whether a hook ran.
    ///
    /// # Errors
    /// Propagates a failure raised by an awaitable hook.
    pub async fn filter_item(
        &self,
        model: &Model,
        name: &HookName,
        entity_type: &str,
        args: &mut HookArgs,
    ) -> Result<bool, Error> {
        let expected = Expectation {
            returns: &[ReturnShape::Void, ReturnShape::Awaitable],
            parameters: Parameters::OptionalEntity(entity_type),
        };
        let Some(method) = self.resolve(model, name, expected) else {
            return Ok(false);
        };
        match &method.body {
            MethodBody::Action(f) => f(args),
            MethodBody::Awaitable(f) => {
                let fut = f(std::mem::take(args));
                *args = fut.await.map_err(Error::from_provider)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Runs a `CanRead` hook. `None` when no usable hook exists.
    #[must_use]
    pub fn can_read(&self, model: &Model, name: &HookName) -> Option<bool> {
        let expected = Expectation {
            returns: &[ReturnShape::Bool],
            parameters: Parameters::None,
        };
        let method = self.resolve(model, name, expected)?;
        match &method.body {
            MethodBody::Predicate(f) => Some(f(&HookArgs::default())),
            _ => None,
        }
    }

    /// Runs an `OnFilter` hook over `query`. `None` when no usable hook exists.
    #[must_use]
    pub fn on_filter(
        &self,
        model: &Model,
        name: &HookName,
        element_type: &str,
        query: &QueryExpr,
    ) -> Option<QueryExpr> {
        let expected = Expectation {
            returns: &[ReturnShape::Queryable],
            parameters: Parameters::Queryable(element_type),
        };
        let method = self.resolve(model, name, expected)?;
        match &method.body {
            MethodBody::Query(f) => Some(f(query.clone())),
            _ => None,
        }
    }

    fn resolve(
        &self,
        model: &Model,
        name: &HookName,
        expected: Expectation<'_>,
    ) -> Option<&ConventionMethod> {
        let Some(method) = self.surface.get(&name.exact) else {
            self.report_near_miss(name);
            return None;
        };

        if !method.visibility.is_hook_accessible() {
            warn!(
                method = %method.name,
                visibility = ?method.visibility,
                "convention method must be protected or protected internal; skipping"
            );
            return None;
        }

        let shape = method.body.return_shape();
        if !expected.returns.contains(&shape) {
            warn!(
                method = %method.name,
                returns = %shape,
                expected = ?expected.returns,
                "convention method has an unexpected return type; skipping"
            );
            return None;
        }

        if !parameters_match(model, &method.parameters, expected.parameters) {
            warn!(
                method = %method.name,
                parameters = ?method.parameters,
                "convention method has incompatible parameters; skipping"
            );
            return None;
        }

        debug!(method = %method.name, "invoking convention method");
        Some(method)
    }

    fn report_near_miss(&self, name: &HookName) {
        if !self.report_near_misses {
            return;
        }
        if let Some(fallback) = &name.fallback
            && self.surface.contains(fallback)
        {
            warn!(
                expected = %name.exact,
                found = %fallback,
                "convention method is named after the entity type instead of the resource set; it will not be invoked"
            );
        }
    }
}

fn parameters_match(model: &Model, declared: &[ParameterShape], expected: Parameters<'_>) -> bool {
    match (expected, declared) {
        (Parameters::None | Parameters::OptionalEntity(_), []) => true,
        (Parameters::OptionalEntity(actual), [ParameterShape::Entity(param)])
        | (Parameters::Queryable(actual), [ParameterShape::Queryable(param)]) => {
            model.is_assignable(actual, param)
        }
        _ => false,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::conventions::{ConventionMethod, PipelineState, Visibility};
    use crate::model::tests::sales_model;
    use crate::submit::ChangeSetItemAction;
    use crate::value::{Record, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn inserting(set: &str, ty: &str) -> HookName {
        HookName::change_set_item(PipelineState::PreSubmit, ChangeSetItemAction::Insert, set, ty)
    }

    fn dispatcher(surface: ConventionSurface) -> ConventionDispatcher {
        ConventionDispatcher::new(Arc::new(surface), true)
    }

    fn product_args() -> HookArgs {
        HookArgs {
            resource_set: "Products".to_owned(),
            action: Some(ChangeSetItemAction::Insert),
            entity: Some(Record::new("Product").with("Id", 1)),
        }
    }

    #[tokio::test]
    async fn matching_filter_runs_and_may_mutate_the_entity() {
        let d = dispatcher(ConventionSurface::new().with(
            ConventionMethod::action("OnInsertingProducts", |args| {
                if let Some(e) = args.entity.as_mut() {
                    e.set("Name", "stamped");
                }
            })
            .with_entity_parameter("Product"),
        ));
        let mut args = product_args();
        let ran = d
            .filter_item(&sales_model(), &inserting("Products", "Product"), "Product", &mut args)
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(
            args.entity.unwrap().get("Name"),
            Some(&Value::from("stamped"))
        );
    }

    #[tokio::test]
    async fn awaitable_filter_hands_arguments_back() {
        let d = dispatcher(ConventionSurface::new().with(ConventionMethod::awaitable(
            "OnInsertingProducts",
            |mut args: HookArgs| {
                Box::pin(async move {
                    if let Some(e) = args.entity.as_mut() {
                        e.set("Price", 10);
                    }
                    Ok(args)
                })
            },
        )));
        let mut args = product_args();
        assert!(
            d.filter_item(&sales_model(), &inserting("Products", "Product"), "Product", &mut args)
                .await
                .unwrap()
        );
        assert_eq!(args.entity.unwrap().get("Price"), Some(&Value::Int(10)));
    }

    #[tokio::test]
    #[traced_test]
    async fn malformed_hook_is_skipped_with_a_warning() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let d = dispatcher(ConventionSurface::new().with(ConventionMethod::returning(
            "OnInsertingProducts",
            "int",
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Value::Int(1)
            },
        )));

        let mut args = product_args();
        let ran = d
            .filter_item(&sales_model(), &inserting("Products", "Product"), "Product", &mut args)
            .await
            .unwrap();

        assert!(!ran);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(args, product_args());
        assert!(logs_contain("unexpected return type"));
    }

    #[test]
    #[traced_test]
    fn public_and_private_hooks_are_not_invoked() {
        for visibility in [Visibility::Public, Visibility::Private, Visibility::Internal] {
            let d = dispatcher(ConventionSurface::new().with(
                ConventionMethod::predicate("CanReadProducts", |_| false).with_visibility(visibility),
            ));
            assert_eq!(
                d.can_read(&sales_model(), &HookName::can_read("Products", "Product")),
                None
            );
        }
        assert!(logs_contain("must be protected"));
    }

    #[test]
    #[traced_test]
    fn wrong_parameter_type_is_skipped() {
        let d = dispatcher(ConventionSurface::new().with(
            ConventionMethod::predicate("CanInsertProducts", |_| false).with_entity_parameter("Order"),
        ));
        let name = HookName::change_set_item(
            PipelineState::Authorization,
            ChangeSetItemAction::Insert,
            "Products",
            "Product",
        );
        assert_eq!(
            d.authorize_item(&sales_model(), &name, "Product", &product_args()),
            None
        );
        assert!(logs_contain("incompatible parameters"));
    }

    #[test]
    fn derived_entities_match_base_parameters() {
        let d = dispatcher(ConventionSurface::new().with(
            ConventionMethod::predicate("CanUpdateCustomers", |_| false)
                .with_entity_parameter("Customer"),
        ));
        let name = HookName::change_set_item(
            PipelineState::Authorization,
            ChangeSetItemAction::Update,
            "Customers",
            "Customer",
        );
        let args = HookArgs::default();
        assert_eq!(
            d.authorize_item(&sales_model(), &name, "VipCustomer", &args),
            Some(false)
        );
    }

    #[test]
    #[traced_test]
    fn type_named_hook_is_reported_but_never_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let d = dispatcher(ConventionSurface::new().with(ConventionMethod::predicate(
            "CanReadProduct",
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                false
            },
        )));

        assert_eq!(
            d.can_read(&sales_model(), &HookName::can_read("Products", "Product")),
            None
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(logs_contain("will not be invoked"));
    }

    #[test]
    fn on_filter_requires_a_queryable_parameter() {
        use crate::model::ResourceKind;
        use crate::query::{Expr, Lambda, QuerySource};

        let source = QueryExpr::source(QuerySource {
            name: "Products".to_owned(),
            element_type: "Product".to_owned(),
            kind: ResourceKind::EntitySet,
        });
        let hook = |q: QueryExpr| {
            q.filter(Lambda::new(
                "p",
                Expr::param("p").member("Price").binary(
                    crate::query::BinaryOp::Gt,
                    Expr::literal(0),
                ),
            ))
        };

        let bare = dispatcher(ConventionSurface::new().with(ConventionMethod::query(
            "OnFilterProducts",
            hook,
        )));
        let name = HookName::on_filter("Products", "Product");
        assert!(bare.on_filter(&sales_model(), &name, "Product", &source).is_none());

        let typed = dispatcher(ConventionSurface::new().with(
            ConventionMethod::query("OnFilterProducts", hook).with_queryable_parameter("Product"),
        ));
        let filtered = typed
            .on_filter(&sales_model(), &name, "Product", &source)
            .unwrap();
        assert_eq!(filtered.to_string(), "Products.Where(p => p.Price > 0)");
    }
}
