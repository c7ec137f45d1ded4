//! HTTP handlers

use super::render;
use super::types::{validate_check_request, CheckRequest, CheckResponse, ErrorResponse};
use crate::cancel::{CancelReason, CancelToken};
use crate::config::HttpServerConfig;
use crate::proxy::engine::VerificationEngine;
use crate::proxy::error::Interrupted;
use crate::proxy::io::read_lines;
use crate::proxy::models::VerificationResult;
use crate::proxy::probe::{Probe, ProbeClient};
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Application state shared by the handlers
pub struct AppState<P = ProbeClient> {
    pub engine: Arc<VerificationEngine<P>>,
    /// Deadline of one verification run
    pub run_timeout: Duration,
    pub max_check_lines: usize,
    /// Fires when the server shuts down; every run derives from it
    pub shutdown: CancelToken,
}

impl<P> AppState<P> {
    pub fn new(engine: Arc<VerificationEngine<P>>, config: &HttpServerConfig, shutdown: CancelToken) -> Self {
        Self {
            engine,
            run_timeout: config.timeout,
            max_check_lines: config.max_check_lines,
            shutdown,
        }
    }
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            run_timeout: self.run_timeout,
            max_check_lines: self.max_check_lines,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<P: Probe> AppState<P> {
    /// Verify `lines` under a fresh deadline derived from the shutdown token
    async fn run_check(&self, lines: Vec<String>) -> Result<VerificationResult, Interrupted> {
        let run = self.shutdown.child_with_timeout(self.run_timeout);
        let outcome = self.engine.await_lines(&run, lines).await;
        // releases the deadline watcher
        run.cancel();
        outcome
    }
}

/// Form fields of `POST /check`
#[derive(Debug, Deserialize)]
pub struct CheckForm {
    pub proxies: Option<String>,
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "I'm alive"
}

/// `GET /`
pub async fn form_page() -> Html<String> {
    Html(render::form_page())
}

/// `POST /api/v1/check`
pub async fn check_api<P: Probe>(
    State(state): State<AppState<P>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Response {
    let lines = match payload {
        Ok(Json(lines)) => lines,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "rejected check request body");
            return ErrorResponse::new(format!("decode json: {}", rejection.body_text()))
                .into_response_with(client_error_status(rejection.status()));
        }
    };

    let problems = validate_check_request(&lines, state.max_check_lines);
    if !problems.is_empty() {
        return ErrorResponse {
            message: "invalid request".to_string(),
            details: problems,
        }
        .into_response_with(StatusCode::BAD_REQUEST);
    }

    match state.run_check(lines).await {
        Ok(result) => {
            let live: CheckResponse = result.iter().map(ToString::to_string).collect();
            Json(live).into_response()
        }
        Err(interrupted) => {
            let status = interrupted_status(interrupted.reason);
            warn!(error = %interrupted, "check request did not finish");
            ErrorResponse::new("verification did not finish")
                .with_detail("error", interrupted.reason)
                .into_response_with(status)
        }
    }
}

/// `POST /check`
pub async fn check_form<P: Probe>(
    State(state): State<AppState<P>>,
    form: Result<Form<CheckForm>, FormRejection>,
) -> Response {
    let proxies = match form {
        Ok(Form(form)) => form.proxies.unwrap_or_default(),
        Err(rejection) => {
            return (
                client_error_status(rejection.status()),
                format!("Error parsing form: {}", rejection.body_text()),
            )
                .into_response();
        }
    };

    let lines = read_lines(&proxies);
    if lines.is_empty() {
        return (StatusCode::BAD_REQUEST, "Proxies parameter is missing").into_response();
    }
    if lines.len() > state.max_check_lines {
        return (
            StatusCode::BAD_REQUEST,
            format!("request cannot contain more than {} lines", state.max_check_lines),
        )
            .into_response();
    }

    match state.run_check(lines).await {
        Ok(result) => Html(render::proxies_table(result.iter())).into_response(),
        Err(interrupted) => {
            warn!(error = %interrupted, "check form did not finish");
            (interrupted_status(interrupted.reason), interrupted.reason.to_string()).into_response()
        }
    }
}

/// Oversized bodies keep their 413, every other rejection is the client's fault
fn client_error_status(status: StatusCode) -> StatusCode {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        status
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn interrupted_status(reason: CancelReason) -> StatusCode {
    match reason {
        CancelReason::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        CancelReason::Canceled => StatusCode::SERVICE_UNAVAILABLE,
    }
}
