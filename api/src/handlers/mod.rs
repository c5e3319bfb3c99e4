//! Request handlers
//!
//! Thin axum handlers over the core subsystems. Failures map to status
//! codes here; the engine's own error text stays in the logs.

pub mod context;
pub mod diffs;
pub mod files;
pub mod plans;
pub mod sessions;

use axum::http::StatusCode;

use rcode_core::store::StoreError;

/// Map store failures onto HTTP statuses
pub(crate) fn store_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        other => {
            tracing::error!(error = %other, "store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
