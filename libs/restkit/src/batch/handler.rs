//! Two-phase handling of batch sub-requests: stage a change-set item, then
//! render a response once the shared change set has an outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::api::Api;
use crate::batch::coordinator::{SubRequest, SubResponse};
use crate::batch::property::{ChangeSetFailure, ChangeSetOutcome};
use crate::error::Error;
use crate::model::Model;
use crate::problem::Problem;
use crate::query::builder::resolve_key;
use crate::query::{PathSegment, ResourcePath};
use crate::submit::{ChangeSetItem, ChangeSetItemAction};
use crate::value::Value;

#[async_trait]
pub trait SubRequestHandler: Send + Sync {
    /// Turns `request` into the change-set item it stages.
    ///
    /// # Errors
    /// Any error here is recorded against the change set, which is then not submitted.
    async fn prepare(
        &self,
        api: &Api,
        model: &Model,
        request: &SubRequest,
        cancel: &CancellationToken,
    ) -> Result<ChangeSetItem, Error>;

    /// Renders the response for `request`.
    ///
    /// `staged` is the item's position in the submitted change set, or the error
    /// `prepare` returned for it.
    fn respond(
        &self,
        request: &SubRequest,
        staged: Result<usize, &Error>,
        outcome: &ChangeSetOutcome,
    ) -> SubResponse;
}

/// Maps entity-set and entity URLs to change-set items:
/// `POST Set`, `PATCH Set(key)`, `PUT Set(key)` and `DELETE Set(key)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataModificationHandler;

impl DataModificationHandler {
    fn payload(request: &SubRequest) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        let body = if request.body.trim().is_empty() {
            "{}"
        } else {
            request.body.as_str()
        };
        match serde_json::from_str(body) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(Error::InvalidPayload(
                "request body must be a JSON object".to_owned(),
            )),
            Err(e) => Err(Error::InvalidPayload(e.to_string())),
        }
    }

    /// Names each recorded cause by its public problem detail, so internal
    /// error text stays hidden the same way it does for a direct failure.
    fn failed_dependency(errors: &[Arc<Error>]) -> Problem {
        let causes: Vec<String> = errors
            .iter()
            .map(|error| {
                let problem = Problem::from(error.as_ref());
                format!("{} ({})", problem.detail, problem.status.as_u16())
            })
            .collect();
        Problem::new(
            StatusCode::FAILED_DEPENDENCY,
            "Failed Dependency",
            format!(
                "change set not submitted, {} other request(s) failed: {}",
                errors.len(),
                causes.join("; ")
            ),
        )
        .with_code("restkit.failed_dependency")
    }

    fn problem_response(problem: &Problem) -> (StatusCode, Option<serde_json::Value>) {
        (problem.status, Some(problem.to_json()))
    }
}

#[async_trait]
impl SubRequestHandler for DataModificationHandler {
    async fn prepare(
        &self,
        _api: &Api,
        model: &Model,
        request: &SubRequest,
        _cancel: &CancellationToken,
    ) -> Result<ChangeSetItem, Error> {
        let path = ResourcePath::parse(model, &request.url)?;
        let (set, key) = match path.segments() {
            [PathSegment::EntitySet(set)] => (set, None),
            [PathSegment::EntitySet(set), PathSegment::Key(values)] => (set, Some(values)),
            _ => {
                return Err(Error::unsupported(format!(
                    "'{}' does not address an entity set or entity",
                    request.url
                )));
            }
        };
        let entity_type = model
            .entity_set(set)
            .map(|resource| resource.entity_type.clone())
            .ok_or_else(|| Error::invalid_path(format!("unknown entity set '{set}'")))?;
        let method = &request.method;

        let Some(values) = key else {
            if *method != Method::POST {
                return Err(Error::unsupported(format!(
                    "{method} is not allowed on entity set '{set}'"
                )));
            }
            return Ok(ChangeSetItem::insert(set, entity_type, Self::payload(request)?));
        };

        let key_values: BTreeMap<String, Value> =
            resolve_key(model, &entity_type, values)?.into_iter().collect();
        if *method == Method::PATCH {
            Ok(ChangeSetItem::update(set, entity_type, key_values, Self::payload(request)?))
        } else if *method == Method::PUT {
            Ok(ChangeSetItem::replace(set, entity_type, key_values, Self::payload(request)?))
        } else if *method == Method::DELETE {
            Ok(ChangeSetItem::delete(set, entity_type, key_values))
        } else {
            Err(Error::unsupported(format!(
                "{method} is not allowed on an entity of '{set}'"
            )))
        }
    }

    fn respond(
        &self,
        request: &SubRequest,
        staged: Result<usize, &Error>,
        outcome: &ChangeSetOutcome,
    ) -> SubResponse {
        let (status, body) = match (staged, outcome) {
            (Err(error), _) => Self::problem_response(&Problem::from(error)),
            (Ok(index), Ok(result)) => match result.change_set().get(index) {
                Some(item) if item.action == ChangeSetItemAction::Insert => (
                    StatusCode::CREATED,
                    item.resource
                        .as_ref()
                        .map(|record| Value::Record(record.clone()).to_json()),
                ),
                Some(_) => (StatusCode::NO_CONTENT, None),
                None => Self::problem_response(&Problem::from(Error::precondition(format!(
                    "no submitted item at position {index}"
                )))),
            },
            (Ok(_), Err(failure)) => match failure.as_ref() {
                ChangeSetFailure::SubRequests(errors) => {
                    Self::problem_response(&Self::failed_dependency(errors))
                }
                ChangeSetFailure::Submit(error) => Self::problem_response(&Problem::from(error)),
                ChangeSetFailure::Abandoned => Self::problem_response(
                    &Problem::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal Server Error",
                        failure.to_string(),
                    )
                    .with_code("restkit.internal"),
                ),
            },
        };
        SubResponse {
            content_id: request.content_id.clone(),
            status,
            body,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::tests::sales_model;
    use crate::submit::{ChangeSet, SubmitResult};
    use crate::testing::test_api;
    use crate::value::Record;

    async fn prepare(request: SubRequest) -> Result<ChangeSetItem, Error> {
        let api = test_api(sales_model());
        let model = sales_model();
        DataModificationHandler
            .prepare(&api, &model, &request, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn methods_map_to_actions() {
        let insert = prepare(SubRequest::new(Method::POST, "Products").with_body(r#"{"Id":1}"#))
            .await
            .unwrap();
        assert_eq!(insert.action, ChangeSetItemAction::Insert);
        assert_eq!(insert.expected_resource_type, "Product");

        let patch =
            prepare(SubRequest::new(Method::PATCH, "Products(1)").with_body(r#"{"Name":"x"}"#))
                .await
                .unwrap();
        assert_eq!(patch.action, ChangeSetItemAction::Update);
        assert!(!patch.is_full_replace_update);
        assert_eq!(patch.key_values.get("Id"), Some(&Value::Int(1)));

        let put = prepare(SubRequest::new(Method::PUT, "Products(1)").with_body("{}"))
            .await
            .unwrap();
        assert!(put.is_full_replace_update);

        let delete = prepare(SubRequest::new(Method::DELETE, "Products(1)"))
            .await
            .unwrap();
        assert_eq!(delete.action, ChangeSetItemAction::Delete);
    }

    #[tokio::test]
    async fn composite_keys_are_named() {
        let item = prepare(SubRequest::new(
            Method::DELETE,
            "OrderLines(OrderId=1,LineNo=2)",
        ))
        .await
        .unwrap();
        assert_eq!(item.key_values.len(), 2);
        assert_eq!(item.key_values.get("LineNo"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let not_json = prepare(SubRequest::new(Method::POST, "Products").with_body("{oops"))
            .await
            .unwrap_err();
        assert!(matches!(not_json, Error::InvalidPayload(_)));

        let array = prepare(SubRequest::new(Method::POST, "Products").with_body("[]"))
            .await
            .unwrap_err();
        assert!(matches!(array, Error::InvalidPayload(_)));

        let post_on_key = prepare(SubRequest::new(Method::POST, "Products(1)").with_body("{}"))
            .await
            .unwrap_err();
        assert!(matches!(post_on_key, Error::Unsupported(_)));

        let navigation = prepare(SubRequest::new(Method::DELETE, "Orders(1)/Customer"))
            .await
            .unwrap_err();
        assert!(matches!(navigation, Error::Unsupported(_)));
    }

    #[test]
    fn responses_follow_the_outcome() {
        let request = SubRequest::new(Method::POST, "Products").with_content_id("1");
        let mut item = ChangeSetItem::insert("Products", "Product", serde_json::Map::new());
        item.resource = Some(Record::new("Product").with("Id", 5));
        let submitted: ChangeSetOutcome =
            Ok(Arc::new(SubmitResult::new(ChangeSet::new().with(item))));

        let created = DataModificationHandler.respond(&request, Ok(0), &submitted);
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.content_id.as_deref(), Some("1"));
        assert_eq!(created.body, Some(json!({ "Id": 5 })));

        let aborted: ChangeSetOutcome = Err(Arc::new(ChangeSetFailure::SubRequests(vec![
            Arc::new(Error::InvalidPayload("bad".to_owned())),
        ])));
        let dependent = DataModificationHandler.respond(&request, Ok(0), &aborted);
        assert_eq!(dependent.status, StatusCode::FAILED_DEPENDENCY);
        let detail = dependent.body.as_ref().unwrap()["detail"].as_str().unwrap();
        assert!(detail.contains("bad (400)"), "{detail}");

        let own_error = Error::forbidden("Products");
        let forbidden = DataModificationHandler.respond(&request, Err(&own_error), &aborted);
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
    }
}
