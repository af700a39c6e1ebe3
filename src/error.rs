//! Crate-level error type and its mapping onto HTTP responses.
//!
//! Only one core operation can fail: `release` by a transaction that
//! does not own the resource (spec.md §4.1, §7). Everything else the
//! facade rejects is a malformed-request problem caught before the
//! core is ever invoked.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("not owner")]
    NotOwner { tx: String, res: String },

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl ResponseError for LockError {
    fn status_code(&self) -> StatusCode {
        match self {
            LockError::NotOwner { .. } => StatusCode::CONFLICT,
            LockError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            detail: self.to_string(),
        })
    }
}
