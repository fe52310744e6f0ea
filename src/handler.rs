//! The check-in operation: validate, look up, upsert, respond.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CheckinError, StoreError};
use crate::model::{CheckinFields, CheckinRecord};
use crate::store::CheckinStore;

/// Shared router state. `store` is `None` when no table is configured.
#[derive(Clone)]
pub struct AppState {
    pub store: Option<Arc<dyn CheckinStore>>,
    pub store_timeout: Duration,
}

impl AppState {
    pub fn new(store: Option<Arc<dyn CheckinStore>>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }
}

#[instrument(name = "ip_checkin", skip_all, fields(body_len = body.len()))]
pub async fn checkin(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match process(&state, &headers, &body).await {
        Ok(()) => (StatusCode::OK, "").into_response(),
        Err(e) => {
            match &e {
                CheckinError::Store(cause) => error!(error = %cause, "Error accessing table storage"),
                CheckinError::StoreNotConfigured => {
                    error!("table storage is not configured; set IP_CHECKIN_TABLE_NAME")
                }
                other => warn!(error = %other, "rejecting check-in"),
            }
            e.into_response()
        }
    }
}

async fn process(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), CheckinError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if !is_json(content_type) {
        return Err(CheckinError::InvalidContentType(
            content_type.map(str::to_string),
        ));
    }

    let json: serde_json::Value = serde_json::from_slice(body)?;

    // Configuration is checked before the fields: an unconfigured service
    // answers 500 even when the properties are missing.
    let store = state
        .store
        .as_deref()
        .ok_or(CheckinError::StoreNotConfigured)?;

    let fields = CheckinFields::from_json(&json)?;
    info!(device = %fields.name, ipv4 = %fields.ipv4, "processing check-in");

    let mut record = match bounded(state.store_timeout, store.fetch(&fields.name, &fields.ipv4))
        .await
    {
        Ok(existing) => {
            debug!("updating existing record");
            existing
        }
        Err(StoreError::NotFound) => {
            debug!("no record for this device and address, creating one");
            CheckinRecord::empty(&fields.name, &fields.ipv4)
        }
        Err(e) => return Err(e.into()),
    };

    record.assign(&fields);

    let status = bounded(state.store_timeout, store.upsert(&record)).await?;
    if !status.is_success() {
        return Err(CheckinError::Rejected(status.0));
    }

    Ok(())
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit.as_millis() as u64))?
}
