//! Entry-path adapters: webhook, polling fallback and manual replay
//!
//! Adapters only normalize their input into a [`ReconcileRequest`] and map the
//! outcome into a [`Response`]. Reconciliation semantics live in
//! [`Reconciler::reconcile`] and are the same for every path.
use super::contribution::Contribution;
use super::error::{ErrorKind, ReconcileError};
use super::reconcile::{ReconcileRequest, Reconciler, Reconciliation};
use std::fmt;
use tracing::info_span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPath {
    Webhook,
    PollingFallback,
    ManualReplay,
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPath::Webhook => f.write_str("webhook"),
            EntryPath::PollingFallback => f.write_str("polling_fallback"),
            EntryPath::ManualReplay => f.write_str("manual_replay"),
        }
    }
}

/// A provider confirmation payload.
///
/// Providers and older clients spell the same fields differently; every
/// accepted spelling collapses into one canonical field here. A payload that
/// carries two spellings of one field is rejected; unrelated provider keys
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ConfirmationEvent {
    #[serde(alias = "sessionId", alias = "session_id", alias = "sessionKey")]
    pub session_key: Option<String>,
    #[serde(alias = "campaignId", alias = "campaign_id", alias = "campaign")]
    pub campaign_ref: Option<String>,
    #[serde(alias = "userId", alias = "user_id", alias = "user")]
    pub user_ref: Option<String>,
    #[serde(alias = "amountTotal", alias = "amount_total", alias = "amount")]
    pub amount_minor_units: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "isAnonymous", alias = "is_anonymous")]
    pub anonymous: bool,
}

impl ConfirmationEvent {
    pub fn from_json(body: &[u8]) -> Result<Self, ReconcileError> {
        serde_json::from_slice(body)
            .map_err(|e| ReconcileError::invalid(format!("malformed confirmation: {e}")))
    }

    pub fn into_request(self) -> Result<ReconcileRequest, ReconcileError> {
        let session_key = required(self.session_key, "session_key")?;
        let campaign_ref = required(self.campaign_ref, "campaign_ref")?;
        let user_ref = required(self.user_ref, "user_ref")?;
        let amount = self
            .amount_minor_units
            .ok_or_else(|| ReconcileError::invalid("missing field amount_minor_units"))?;

        let mut request = ReconcileRequest::new(&session_key)
            .set_campaign(&campaign_ref)
            .set_user(&user_ref)
            .set_amount_minor(amount)
            .set_anonymous(self.anonymous);
        if let Some(currency) = self.currency {
            request = request.set_currency(currency.parse()?);
        }
        if let Some(message) = self.message {
            request = request.set_message(&message);
        }
        Ok(request)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ReconcileError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ReconcileError::invalid(format!("missing field {field}")))
}

/// Transport-neutral outcome. Each transport maps it onto its own status codes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Response {
    /// Created, or an idempotent replay of an earlier confirmation.
    Ok {
        entry_path: EntryPath,
        reconciliation: Reconciliation,
    },
    ClientError {
        entry_path: EntryPath,
        error: String,
    },
    /// Money recorded, campaign aggregate not applied. Needs manual follow-up.
    PartialFailure {
        entry_path: EntryPath,
        error: String,
        contribution: Option<Contribution>,
    },
    /// Transient; the provider's redelivery will retry.
    Unavailable {
        entry_path: EntryPath,
        error: String,
    },
    Internal {
        entry_path: EntryPath,
        error: String,
    },
}

impl Response {
    pub fn from_result(
        entry_path: EntryPath,
        result: Result<Reconciliation, ReconcileError>,
    ) -> Self {
        let err = match result {
            Ok(reconciliation) => {
                return Response::Ok {
                    entry_path,
                    reconciliation,
                };
            }
            Err(err) => err,
        };

        let error = err.to_string();
        match err.kind() {
            ErrorKind::InvalidInput => Response::ClientError { entry_path, error },
            ErrorKind::CampaignNotFound => Response::PartialFailure {
                entry_path,
                error,
                contribution: err.recorded_contribution().cloned(),
            },
            ErrorKind::StorageUnavailable | ErrorKind::DuplicateOrPersistence => {
                Response::Unavailable { entry_path, error }
            }
            ErrorKind::Internal => Response::Internal { entry_path, error },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    pub fn reconciliation(&self) -> Option<&Reconciliation> {
        match self {
            Response::Ok { reconciliation, .. } => Some(reconciliation),
            _ => None,
        }
    }
}

/// Reconcile one confirmation on behalf of `entry_path`.
pub fn handle(reconciler: &Reconciler, entry_path: EntryPath, event: ConfirmationEvent) -> Response {
    let span = info_span!("entry", %entry_path);
    let _enter = span.enter();

    let result = event
        .into_request()
        .and_then(|request| reconciler.reconcile(&request));
    Response::from_result(entry_path, result)
}

/// Same as [`handle`], starting from a raw JSON body.
pub fn handle_json(reconciler: &Reconciler, entry_path: EntryPath, body: &[u8]) -> Response {
    match ConfirmationEvent::from_json(body) {
        Ok(event) => handle(reconciler, entry_path, event),
        Err(err) => Response::from_result(entry_path, Err(err)),
    }
}
