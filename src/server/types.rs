//! HTTP wire payloads

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `POST /api/v1/check`: candidate lines
pub type CheckRequest = Vec<String>;

/// Body of a successful check: live proxies
pub type CheckResponse = Vec<String>;

/// Structured error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, problem: impl ToString) -> Self {
        self.details.insert(key.into(), problem.to_string());
        self
    }

    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Problems with a check request, keyed by field; empty when valid
pub fn validate_check_request(lines: &[String], max_lines: usize) -> BTreeMap<String, String> {
    let mut problems = BTreeMap::new();

    if lines.is_empty() {
        problems.insert("data".to_string(), "request cannot be empty".to_string());
    } else if lines.len() > max_lines {
        problems.insert(
            "data".to_string(),
            format!("request cannot contain more than {} lines", max_lines),
        );
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_check_request() {
        assert!(validate_check_request(&["1.1.1.1:80".to_string()], 1).is_empty());

        let problems = validate_check_request(&[], 10);
        assert_eq!(problems["data"], "request cannot be empty");

        let lines = vec!["x".to_string(); 3];
        let problems = validate_check_request(&lines, 2);
        assert_eq!(problems["data"], "request cannot contain more than 2 lines");
    }

    #[test]
    fn test_error_response_shape() {
        let body = ErrorResponse::new("invalid request").with_detail("data", "request cannot be empty");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "message": "invalid request",
                "details": {"data": "request cannot be empty"}
            })
        );
    }
}
