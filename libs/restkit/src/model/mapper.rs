//! Resource name -> backing type resolution.

use super::{Model, ResourceKind};

/// What the query builder needs to know about a root resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub type_name: String,
    pub key_properties: Vec<String>,
}

/// Maps a resource name onto the type that backs it.
pub trait ModelMapper: Send + Sync {
    fn resolve(&self, model: &Model, resource_name: &str) -> Option<ResolvedResource>;
}

/// Resolves resources straight from the model's entity sets and singletons.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelMapper;

impl ModelMapper for DefaultModelMapper {
    fn resolve(&self, model: &Model, resource_name: &str) -> Option<ResolvedResource> {
        let resource = model.resource(resource_name)?;
        Some(ResolvedResource {
            name: resource.name.clone(),
            kind: resource.kind,
            type_name: resource.entity_type.clone(),
            key_properties: model
                .key_properties(&resource.entity_type)
                .into_iter()
                .map(str::to_owned)
                .collect(),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::model::tests::sales_model;

    #[test]
    fn resolves_entity_sets_and_singletons() {
        let model = sales_model();
        let lines = DefaultModelMapper.resolve(&model, "OrderLines").unwrap();
        assert_eq!(lines.type_name, "OrderLine");
        assert_eq!(lines.key_properties, vec!["OrderId", "LineNo"]);

        let me = DefaultModelMapper.resolve(&model, "Me").unwrap();
        assert_eq!(me.kind, ResourceKind::Singleton);
        assert!(DefaultModelMapper.resolve(&model, "Nope").is_none());
    }
}
