use crate::model::{Model, ResourceKind};
use crate::query::{Expr, QueryExpr, QueryRequest};

/// The model element a visited node stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelReference {
    EntitySet {
        name: String,
        element_type: String,
    },
    Singleton {
        name: String,
        element_type: String,
    },
    /// A navigation property; `target_set` is the entity set its target type lives in.
    Navigation {
        source_type: String,
        property: String,
        target_type: String,
        target_set: Option<String>,
    },
}

impl ModelReference {
    /// Works out what `node` refers to: roots map to their resource, projections
    /// over a navigation property map to the navigation.
    #[must_use]
    pub fn resolve(model: &Model, node: &QueryExpr) -> Option<Self> {
        match node {
            QueryExpr::Source(_) | QueryExpr::Root(_) => {
                let resource = model.resource(node.root_name()?)?;
                Some(match resource.kind {
                    ResourceKind::EntitySet => ModelReference::EntitySet {
                        name: resource.name.clone(),
                        element_type: resource.entity_type.clone(),
                    },
                    ResourceKind::Singleton => ModelReference::Singleton {
                        name: resource.name.clone(),
                        element_type: resource.entity_type.clone(),
                    },
                })
            }
            QueryExpr::Select {
                input, selector, ..
            }
            | QueryExpr::SelectMany {
                input, selector, ..
            } => {
                let Expr::Member { target, name } = &selector.body else {
                    return None;
                };
                if !matches!(target.as_ref(), Expr::Parameter(p) if *p == selector.parameter) {
                    return None;
                }
                let source_type = input.element_type();
                let source_type = source_type.structured_name()?;
                let nav = model.navigation(source_type, name)?;
                Some(ModelReference::Navigation {
                    source_type: source_type.to_owned(),
                    property: name.clone(),
                    target_type: nav.target.clone(),
                    target_set: model
                        .entity_set_for_type(&nav.target)
                        .map(|set| set.name.clone()),
                })
            }
            _ => None,
        }
    }

    /// Resource whose hooks apply to the node, if any.
    #[must_use]
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            ModelReference::EntitySet { name, .. } | ModelReference::Singleton { name, .. } => {
                Some(name)
            }
            ModelReference::Navigation { target_set, .. } => target_set.as_deref(),
        }
    }

    #[must_use]
    pub fn element_type(&self) -> &str {
        match self {
            ModelReference::EntitySet { element_type, .. }
            | ModelReference::Singleton { element_type, .. } => element_type,
            ModelReference::Navigation { target_type, .. } => target_type,
        }
    }
}

struct Frame {
    node: QueryExpr,
    reference: Option<ModelReference>,
    embedded: bool,
}

/// Mutable state of one query's trip through the expression pipeline.
///
/// Holds a stack of visited nodes; stages only ever look at the top one.
pub struct QueryExpressionContext<'a> {
    request: &'a QueryRequest,
    model: &'a Model,
    frames: Vec<Frame>,
}

impl<'a> QueryExpressionContext<'a> {
    #[must_use]
    pub fn new(request: &'a QueryRequest, model: &'a Model) -> Self {
        Self {
            request,
            model,
            frames: Vec::new(),
        }
    }

    #[must_use]
    pub fn request(&self) -> &'a QueryRequest {
        self.request
    }

    #[must_use]
    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// The node currently being transformed.
    #[must_use]
    pub fn visited_node(&self) -> Option<&QueryExpr> {
        self.frames.last().map(|f| &f.node)
    }

    #[must_use]
    pub fn model_reference(&self) -> Option<&ModelReference> {
        self.frames.last().and_then(|f| f.reference.as_ref())
    }

    /// True when the visited node feeds a projection rather than being the query itself.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.frames.last().is_some_and(|f| f.embedded)
    }

    pub(crate) fn enter(&mut self, node: QueryExpr, embedded: bool) {
        let reference = ModelReference::resolve(self.model, &node);
        self.frames.push(Frame {
            node,
            reference,
            embedded,
        });
    }

    /// Replaces the visited node, keeping the reference it was entered with
    /// unless the new node resolves to one of its own.
    pub(crate) fn replace_visited(&mut self, node: QueryExpr) {
        let model = self.model;
        if let Some(frame) = self.frames.last_mut() {
            if let Some(reference) = ModelReference::resolve(model, &node) {
                frame.reference = Some(reference);
            }
            frame.node = node;
        }
    }

    pub(crate) fn leave(&mut self) -> Option<QueryExpr> {
        self.frames.pop().map(|f| f.node)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::model::TypeRef;
    use crate::model::tests::sales_model;
    use crate::query::{Lambda, QuerySource};

    fn customers() -> QueryExpr {
        QueryExpr::source(QuerySource {
            name: "Customers".to_owned(),
            element_type: "Customer".to_owned(),
            kind: ResourceKind::EntitySet,
        })
    }

    #[test]
    fn roots_and_navigations_resolve_to_resources() {
        let model = sales_model();
        let root = ModelReference::resolve(&model, &customers()).unwrap();
        assert_eq!(root.resource_name(), Some("Customers"));

        let orders = customers().select_many(
            Lambda::new("c", Expr::param("c").member("Orders")),
            TypeRef::entity("Order"),
        );
        let nav = ModelReference::resolve(&model, &orders).unwrap();
        assert_eq!(nav.resource_name(), Some("Orders"));
        assert_eq!(nav.element_type(), "Order");

        let name = customers().select(
            Lambda::new("c", Expr::param("c").member("Name")),
            TypeRef::Primitive(crate::value::PrimitiveKind::String),
        );
        assert!(ModelReference::resolve(&model, &name).is_none());
    }

    #[test]
    fn frames_track_the_visited_node() {
        let model = sales_model();
        let request = QueryRequest::new(customers());
        let mut ctx = QueryExpressionContext::new(&request, &model);
        assert!(ctx.visited_node().is_none());

        ctx.enter(customers(), true);
        assert!(ctx.is_embedded());
        let filtered = customers().filter(Lambda::new("c", Expr::literal(true)));
        ctx.replace_visited(filtered.clone());
        assert_eq!(ctx.visited_node(), Some(&filtered));
        assert_eq!(
            ctx.model_reference().and_then(ModelReference::resource_name),
            Some("Customers"),
            "reference survives a rewrite that no longer resolves"
        );
        assert_eq!(ctx.leave(), Some(filtered));
        assert!(ctx.leave().is_none());
    }
}
