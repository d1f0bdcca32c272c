//! Dispatch of the sub-requests of one batch change set.
//!
//! Sub-requests stage their items into a shared [`ChangeSetProperty`]; the last
//! one to complete submits the change set for all of them. Without dependency
//! markers the sub-requests are staged concurrently, otherwise one at a time in
//! request order.

use std::sync::Arc;

use futures::future::join_all;
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::api::Api;
use crate::batch::handler::SubRequestHandler;
use crate::batch::property::ChangeSetProperty;
use crate::error::Error;
use crate::model::Model;

/// One operation inside a batch change set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubRequest {
    pub content_id: Option<String>,
    pub method: Method,
    /// Resource path relative to the service root, e.g. `Products(1)`.
    pub url: String,
    pub body: String,
}

impl SubRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            content_id: None,
            method,
            url: url.into(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubResponse {
    pub content_id: Option<String>,
    pub status: StatusCode,
    pub body: Option<serde_json::Value>,
}

/// The sub-requests of one change set, executed as a unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSetRequestItem {
    requests: Vec<SubRequest>,
}

impl ChangeSetRequestItem {
    #[must_use]
    pub fn new(requests: Vec<SubRequest>) -> Self {
        Self { requests }
    }

    #[must_use]
    pub fn requests(&self) -> &[SubRequest] {
        &self.requests
    }

    /// Whether any body mentions `marker`, ignoring case. Such a change set is
    /// dispatched serially so later sub-requests see earlier ones staged.
    #[must_use]
    pub fn has_dependencies(&self, marker: &str) -> bool {
        if marker.is_empty() {
            return false;
        }
        let marker = marker.to_lowercase();
        self.requests
            .iter()
            .any(|request| request.body.to_lowercase().contains(&marker))
    }

    /// Stages every sub-request, waits for the shared submission and renders
    /// the responses.
    ///
    /// When any response is not a success only one failure is returned: the
    /// first sub-request that failed on its own, or else the first non-success
    /// response in request order.
    ///
    /// # Errors
    /// Model build failures, and over-completion of the change set.
    #[instrument(skip_all, fields(requests = self.requests.len()))]
    pub async fn execute(
        &self,
        api: &Api,
        handler: &dyn SubRequestHandler,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubResponse>, Error> {
        if self.requests.is_empty() {
            debug!("empty change set, nothing to submit");
            return Ok(Vec::new());
        }

        let model = api.model(cancel).await?;
        let property = ChangeSetProperty::new(self.requests.len());
        let marker = &api.configuration().config().batch.dependency_marker;

        let staged = if self.has_dependencies(marker) {
            debug!("dependency marker found, staging sub-requests serially");
            let mut staged = Vec::with_capacity(self.requests.len());
            for request in &self.requests {
                staged.push(Self::stage(api, &model, handler, &property, request, cancel).await?);
            }
            staged
        } else {
            join_all(
                self.requests
                    .iter()
                    .map(|request| Self::stage(api, &model, handler, &property, request, cancel)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
        };

        let outcome = property.outcome().await;
        let failed_locally: Vec<bool> = staged.iter().map(Result::is_err).collect();
        let responses = self
            .requests
            .iter()
            .zip(&staged)
            .map(|(request, staged)| {
                handler.respond(request, staged.as_ref().copied().map_err(|e| &**e), &outcome)
            })
            .collect();
        Ok(first_failure_or_all(responses, &failed_locally))
    }

    async fn stage(
        api: &Api,
        model: &Model,
        handler: &dyn SubRequestHandler,
        property: &ChangeSetProperty,
        request: &SubRequest,
        cancel: &CancellationToken,
    ) -> Result<Result<usize, Arc<Error>>, Error> {
        let staged = match handler.prepare(api, model, request, cancel).await {
            Ok(item) => {
                let item = match &request.content_id {
                    Some(content_id) => item.with_content_id(content_id.as_str()),
                    None => item,
                };
                Ok(property.add_item(item))
            }
            Err(error) => {
                warn!(
                    method = %request.method,
                    url = %request.url,
                    error = %error,
                    "batch sub-request failed before submission"
                );
                Err(property.add_exception(error))
            }
        };
        property.complete_one(api, cancel).await?;
        Ok(staged)
    }
}

/// `failed_locally[i]` is set when sub-request `i` failed before submission;
/// such a response carries the cause and wins over the dependents it aborted.
fn first_failure_or_all(
    mut responses: Vec<SubResponse>,
    failed_locally: &[bool],
) -> Vec<SubResponse> {
    let failed = responses
        .iter()
        .zip(failed_locally)
        .position(|(r, local)| *local && !r.status.is_success())
        .or_else(|| responses.iter().position(|r| !r.status.is_success()));
    let Some(failed) = failed else {
        return responses;
    };
    let failure = responses.swap_remove(failed);
    debug!(
        status = failure.status.as_u16(),
        discarded = responses.len(),
        "change set failed, dropping the other responses"
    );
    vec![failure]
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::batch::handler::DataModificationHandler;
    use crate::batch::property::ChangeSetOutcome;
    use crate::config::RestkitConfig;
    use crate::model::tests::sales_model;
    use crate::submit::ChangeSetItem;
    use crate::testing::{RecordingStore, test_api_builder};
    use crate::value::{Record, Value};

    fn api_with(store: Arc<RecordingStore>) -> Api {
        test_api_builder(sales_model())
            .with_change_set_store(store)
            .build()
            .unwrap()
            .create_api()
    }

    fn post(id: i64) -> SubRequest {
        SubRequest::new(Method::POST, "Products")
            .with_body(format!(r#"{{"Id":{id},"Name":"Item {id}","Price":1}}"#))
    }

    /// Delegates to the data-modification handler and records prepare order.
    #[derive(Default)]
    struct OrderProbe {
        prepared: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SubRequestHandler for OrderProbe {
        async fn prepare(
            &self,
            api: &Api,
            model: &Model,
            request: &SubRequest,
            cancel: &CancellationToken,
        ) -> Result<ChangeSetItem, Error> {
            tokio::task::yield_now().await;
            self.prepared.lock().push(request.url.clone());
            DataModificationHandler.prepare(api, model, request, cancel).await
        }

        fn respond(
            &self,
            request: &SubRequest,
            staged: Result<usize, &Error>,
            outcome: &ChangeSetOutcome,
        ) -> SubResponse {
            DataModificationHandler.respond(request, staged, outcome)
        }
    }

    #[test]
    fn dependency_marker_is_case_insensitive() {
        let item = ChangeSetRequestItem::new(vec![
            post(1),
            SubRequest::new(Method::POST, "Orders").with_body(r#"{"Customer":"$REF1"}"#),
        ]);
        assert!(item.has_dependencies("$ref"));
        assert!(item.has_dependencies("$"));
        assert!(!item.has_dependencies("@dep"));
        assert!(!ChangeSetRequestItem::new(vec![post(1)]).has_dependencies(""));
    }

    #[tokio::test]
    async fn successful_change_set_returns_every_response() {
        let store = Arc::new(RecordingStore::default());
        let api = api_with(store.clone());
        let item = ChangeSetRequestItem::new(vec![
            post(1).with_content_id("a"),
            post(2).with_content_id("b"),
        ]);

        let responses = item
            .execute(&api, &DataModificationHandler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.status == StatusCode::CREATED));
        assert_eq!(responses[1].content_id.as_deref(), Some("b"));
        assert_eq!(store.commit_count(), 1);
        let key = [("Id".to_owned(), Value::Int(2))].into_iter().collect();
        assert!(store.get("Products", &key).is_some());
    }

    #[tokio::test]
    async fn marker_forces_request_order() {
        let store = Arc::new(RecordingStore::seeded(vec![(
            "Products",
            Record::new("Product").with("Id", 1).with("Name", "Old"),
        )]));
        let mut config = RestkitConfig::default();
        config.batch.dependency_marker = "#serial".to_owned();
        let api = test_api_builder(sales_model())
            .with_change_set_store(store.clone())
            .with_config(config)
            .build()
            .unwrap()
            .create_api();
        let item = ChangeSetRequestItem::new(vec![
            SubRequest::new(Method::PATCH, "Products(1)").with_body(r#"{"Name":"New"}"#),
            post(2),
            SubRequest::new(Method::POST, "Products")
                .with_body(r##"{"Id":3,"Name":"#SERIAL","Price":1}"##),
        ]);
        let probe = OrderProbe::default();

        let responses = item
            .execute(&api, &probe, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *probe.prepared.lock(),
            vec!["Products(1)", "Products", "Products"]
        );
        assert_eq!(responses[0].status, StatusCode::NO_CONTENT);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn rejected_sub_request_is_the_only_response() {
        let store = Arc::new(RecordingStore::default());
        let api = api_with(store.clone());
        let item = ChangeSetRequestItem::new(vec![
            post(1).with_content_id("1"),
            SubRequest::new(Method::POST, "Products")
                .with_body("not json")
                .with_content_id("2"),
            post(3).with_content_id("3"),
        ]);

        let responses = item
            .execute(&api, &DataModificationHandler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, StatusCode::BAD_REQUEST);
        assert_eq!(responses[0].content_id.as_deref(), Some("2"));
        let body = responses[0].body.as_ref().unwrap();
        assert_eq!(body["code"], "restkit.invalid_payload");
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn submit_failure_reaches_every_sub_request() {
        let store = Arc::new(RecordingStore::default());
        let api = api_with(store.clone());
        let item = ChangeSetRequestItem::new(vec![
            post(1),
            SubRequest::new(Method::DELETE, "Products(42)"),
        ]);

        let responses = item
            .execute(&api, &DataModificationHandler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, StatusCode::NOT_FOUND);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn empty_change_set_completes() {
        let api = api_with(Arc::new(RecordingStore::default()));
        let responses = ChangeSetRequestItem::default()
            .execute(&api, &DataModificationHandler, &CancellationToken::new())
            .await
            .unwrap();
        assert!(responses.is_empty());
    }

    #[test]
    fn aggregation_keeps_request_order() {
        let response = |status| SubResponse {
            content_id: None,
            status,
            body: None,
        };
        let all_ok = vec![response(StatusCode::CREATED), response(StatusCode::NO_CONTENT)];
        assert_eq!(first_failure_or_all(all_ok.clone(), &[false, false]), all_ok);

        let mixed = vec![
            response(StatusCode::CREATED),
            response(StatusCode::CONFLICT),
            response(StatusCode::BAD_REQUEST),
        ];
        assert_eq!(
            first_failure_or_all(mixed, &[false; 3]),
            vec![response(StatusCode::CONFLICT)]
        );

        let aborted = vec![
            response(StatusCode::FAILED_DEPENDENCY),
            response(StatusCode::FAILED_DEPENDENCY),
            response(StatusCode::FORBIDDEN),
        ];
        assert_eq!(
            first_failure_or_all(aborted, &[false, false, true]),
            vec![response(StatusCode::FORBIDDEN)]
        );
    }
}
