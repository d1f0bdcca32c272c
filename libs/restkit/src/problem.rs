//! RFC 9457 Problem Details for pipeline errors (pure data, no HTTP framework).
//!
//! The host layer adds instance paths and trace ids before rendering.

use http::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::submit::Severity;

pub const APPLICATION_PROBLEM_JSON: &str = "application/problem+json";

#[allow(clippy::trivially_copy_pass_by_ref)] // serde requires &T signature
fn serialize_status_code<S>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u16(status.as_u16())
}

fn deserialize_status_code<'de, D>(deserializer: D) -> Result<StatusCode, D::Error>
where
    D: Deserializer<'de>,
{
    let code = u16::deserialize(deserializer)?;
    StatusCode::from_u16(code).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    #[serde(
        serialize_with = "serialize_status_code",
        deserialize_with = "deserialize_status_code"
    )]
    pub status: StatusCode,
    pub detail: String,
    /// Machine-readable code, e.g. `restkit.forbidden`.
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationViolation>>,
}

/// One failing validation result of a change-set item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    /// Position of the item in the change set.
    pub item: usize,
    pub resource_set: String,
    /// Property path, empty when the result concerns the whole entity.
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank".to_owned(),
            title: title.into(),
            status,
            detail: detail.into(),
            code: String::new(),
            errors: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<ValidationViolation>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// The problem as a JSON body.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Error {
    /// Status code the host layer should answer with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotImplemented { .. } | Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::InvalidPath(_) | Error::InvalidPayload(_) | Error::Conversion(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ConcurrencyConflict { .. } => StatusCode::PRECONDITION_FAILED,
            Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Error::Precondition(_) | Error::Model(_) | Error::Provider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<&Error> for Problem {
    fn from(err: &Error) -> Self {
        let status = err.status();
        match err {
            Error::NotImplemented { .. } => Problem::new(status, "Not Implemented", err.to_string())
                .with_code("restkit.not_implemented"),
            Error::Unsupported(_) => {
                Problem::new(status, "Unsupported", err.to_string()).with_code("restkit.unsupported")
            }
            Error::InvalidPath(_) => Problem::new(status, "Invalid Path", err.to_string())
                .with_code("restkit.invalid_path"),
            Error::InvalidPayload(_) | Error::Conversion(_) => {
                Problem::new(status, "Invalid Payload", err.to_string())
                    .with_code("restkit.invalid_payload")
            }
            // No resource names in the client-visible detail.
            Error::Forbidden { .. } => Problem::new(
                status,
                "Forbidden",
                "The current user does not have permission to perform this operation",
            )
            .with_code("restkit.forbidden"),
            Error::ResourceNotFound { .. } => {
                Problem::new(status, "Not Found", err.to_string()).with_code("restkit.not_found")
            }
            Error::Validation(results) => {
                let violations = results
                    .iter()
                    .filter(|r| r.severity == Severity::Error)
                    .map(|r| ValidationViolation {
                        item: r.item_index,
                        resource_set: r.resource_set.clone(),
                        field: r.property_path.clone().unwrap_or_default(),
                        message: r.message.clone(),
                        code: r.id.clone(),
                    })
                    .collect();
                Problem::new(status, "Validation Failed", err.to_string())
                    .with_code("restkit.validation_failed")
                    .with_errors(violations)
            }
            Error::ConcurrencyConflict { .. } => {
                Problem::new(status, "Precondition Failed", err.to_string())
                    .with_code("restkit.concurrency_conflict")
            }
            Error::Cancelled => {
                Problem::new(status, "Cancelled", err.to_string()).with_code("restkit.cancelled")
            }
            Error::Precondition(_) | Error::Model(_) | Error::Provider(_) => Problem::new(
                status,
                "Internal Server Error",
                "An internal error occurred while processing the request",
            )
            .with_code("restkit.internal"),
        }
    }
}

impl From<Error> for Problem {
    fn from(err: Error) -> Self {
        Problem::from(&err)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::submit::ChangeSetItemValidationResult;

    #[test]
    fn forbidden_hides_the_target() {
        let problem = Problem::from(Error::forbidden("SecretDocuments"));
        assert_eq!(problem.status, StatusCode::FORBIDDEN);
        assert!(!problem.detail.contains("SecretDocuments"));
        assert_eq!(problem.code, "restkit.forbidden");
    }

    #[test]
    fn provider_errors_render_generic_detail() {
        let problem = Problem::from(Error::Provider(anyhow::anyhow!("connection string=...")));
        assert_eq!(problem.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!problem.detail.contains("connection"));
    }

    #[test]
    fn validation_lists_error_results_only() {
        let err = Error::Validation(vec![
            ChangeSetItemValidationResult::error(0, "Products", Some("Name"), "required"),
            ChangeSetItemValidationResult::warning(1, "Products", None, "suspicious price"),
        ]);
        let problem = Problem::from(&err);
        assert_eq!(problem.status, StatusCode::UNPROCESSABLE_ENTITY);
        let errors = problem.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "Name");
        assert_eq!(errors[0].item, 0);
    }

    #[test]
    fn status_serializes_as_number() {
        let json = Problem::from(Error::Cancelled).to_json();
        assert_eq!(json["status"], 408);
        assert_eq!(json["type"], "about:blank");
        assert!(json.get("errors").is_none());
    }
}
