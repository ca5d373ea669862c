pub mod auth;
pub mod prefs;
pub mod tasks;

use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::models::Envelope;

pub(crate) fn respond<T: Serialize>(
    status: StatusCode,
    message: &str,
    data: T,
) -> (StatusCode, Json<Envelope<T>>) {
    (
        status,
        Json(Envelope {
            success: true,
            status: status.as_u16(),
            message: message.to_string(),
            data,
        }),
    )
}
