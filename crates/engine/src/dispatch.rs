//! Uniform lifecycle around every outbound call.
//!
//! Each call emits `Send` before the request, then exactly one of `Ok`,
//! `Fail`, or `NetworkFail`. Events are informational; callers act on the
//! returned value:
//!
//! - `Ok(Outcome::Ok(body))` when the server accepted the request and the
//!   body decoded,
//! - `Ok(Outcome::Fail(rejection))` when the server answered but refused, or
//!   answered with a body that failed decoding or validation,
//! - `Err(TransportError)` when no usable response arrived.

use std::fmt;
use std::sync::Arc;

use arlo_api::{ApiRequest, RawResponse, Transport, TransportError, redact_sensitive};
use arlo_types::FailureKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Every outbound call the client can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    FetchAuditStatus,
    FetchRounds,
    FetchJurisdictions,
    FetchContests,
    FetchBallots,
    SelectContests,
    SetRandomSeed,
    StartRound,
    ResetAudit,
    SignInAuditBoard,
    SubmitBallot,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::FetchAuditStatus => "FETCH_AUDIT_STATUS",
            ActionKind::FetchRounds => "FETCH_ROUNDS",
            ActionKind::FetchJurisdictions => "FETCH_JURISDICTIONS",
            ActionKind::FetchContests => "FETCH_CONTESTS",
            ActionKind::FetchBallots => "FETCH_BALLOTS",
            ActionKind::SelectContests => "SELECT_CONTESTS",
            ActionKind::SetRandomSeed => "SET_RANDOM_SEED",
            ActionKind::StartRound => "START_ROUND",
            ActionKind::ResetAudit => "RESET_AUDIT",
            ActionKind::SignInAuditBoard => "SIGN_IN_AUDIT_BOARD",
            ActionKind::SubmitBallot => "SUBMIT_BALLOT",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server answered but did not accept the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} rejected (status {status}): {message}")]
pub struct Rejection {
    pub kind: ActionKind,
    pub status: u16,
    /// Server-supplied reason, or a description of what failed to decode.
    pub message: String,
    pub error_type: Option<String>,
    /// Accepted status but the body was unusable.
    pub malformed: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEntry {
    message: String,
    #[serde(default)]
    error_type: Option<String>,
}

impl Rejection {
    /// Build a rejection from a non-2xx response.
    ///
    /// Arlo error bodies look like `{"errors":[{"message","errorType"}]}`;
    /// anything else falls back to the raw text.
    pub fn from_response(kind: ActionKind, response: &RawResponse) -> Self {
        let (message, error_type) = match serde_json::from_str::<ErrorBody>(&response.body) {
            Ok(body) if !body.errors.is_empty() => {
                let error_type = body.errors.iter().find_map(|entry| entry.error_type.clone());
                let message = body
                    .errors
                    .into_iter()
                    .map(|entry| entry.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                (message, error_type)
            }
            _ if !response.body.trim().is_empty() => (response.body.trim().to_string(), None),
            _ => (format!("HTTP {}", response.status), None),
        };
        Self {
            kind,
            status: response.status,
            message,
            error_type,
            malformed: false,
        }
    }

    pub fn malformed(kind: ActionKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            error_type: None,
            malformed: true,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        if self.malformed {
            FailureKind::Internal
        } else {
            FailureKind::Validation
        }
    }
}

/// Result of a call that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Fail(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            Outcome::Fail(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, Rejection> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::Fail(rejection) => Err(rejection),
        }
    }
}

/// Lifecycle events published for logging and optimistic UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEvent {
    Send { kind: ActionKind, payload: Option<Value> },
    Ok { kind: ActionKind, body: Value },
    Fail { kind: ActionKind, rejection: Rejection },
    NetworkFail { kind: ActionKind, error: String },
}

impl ActionEvent {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionEvent::Send { kind, .. }
            | ActionEvent::Ok { kind, .. }
            | ActionEvent::Fail { kind, .. }
            | ActionEvent::NetworkFail { kind, .. } => *kind,
        }
    }
}

/// Issues requests through a [`Transport`] and classifies their outcome.
#[derive(Clone)]
pub struct ActionDispatcher {
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<ActionEvent>,
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

impl ActionDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _rx) = broadcast::channel(128);
        Self { transport, event_tx }
    }

    /// Subscribe to lifecycle events emitted by this dispatcher.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.event_tx.subscribe()
    }

    /// Perform a call and decode an accepted body as `T`.
    pub async fn perform<T>(&self, kind: ActionKind, request: ApiRequest) -> Result<Outcome<T>, TransportError>
    where
        T: DeserializeOwned,
    {
        self.perform_validated(kind, request, |_: &T| Ok(())).await
    }

    /// Like [`ActionDispatcher::perform`], additionally running `validate` on
    /// the decoded body. A validation error turns the call into a `Fail`.
    pub async fn perform_validated<T, F>(&self, kind: ActionKind, request: ApiRequest, validate: F) -> Result<Outcome<T>, TransportError>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), String>,
    {
        if let Some(payload) = &request.body {
            debug!(%kind, path = %request.path, payload = %redact_sensitive(&payload.to_string()), "dispatching");
        } else {
            debug!(%kind, path = %request.path, "dispatching");
        }
        self.emit(ActionEvent::Send {
            kind,
            payload: request.body.clone(),
        });

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%kind, error = %error, "network failure");
                self.emit(ActionEvent::NetworkFail {
                    kind,
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        if !response.is_success() {
            return Ok(self.fail(Rejection::from_response(kind, &response)));
        }

        let body = if response.body.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&response.body) {
                Ok(body) => body,
                Err(error) => {
                    return Ok(self.fail(Rejection::malformed(kind, response.status, format!("response is not JSON: {error}"))));
                }
            }
        };

        let decoded = match serde_json::from_value::<T>(body.clone()) {
            Ok(decoded) => decoded,
            Err(error) => {
                return Ok(self.fail(Rejection::malformed(kind, response.status, format!("unexpected response shape: {error}"))));
            }
        };
        if let Err(message) = validate(&decoded) {
            return Ok(self.fail(Rejection::malformed(kind, response.status, message)));
        }

        debug!(%kind, status = response.status, "accepted");
        self.emit(ActionEvent::Ok { kind, body });
        Ok(Outcome::Ok(decoded))
    }

    fn fail<T>(&self, rejection: Rejection) -> Outcome<T> {
        warn!(kind = %rejection.kind, status = rejection.status, message = %rejection.message, "request rejected");
        self.emit(ActionEvent::Fail {
            kind: rejection.kind,
            rejection: rejection.clone(),
        });
        Outcome::Fail(rejection)
    }

    fn emit(&self, event: ActionEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
