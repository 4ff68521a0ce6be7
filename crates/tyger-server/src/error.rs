//! Maps [`TygerError`] to the `{error:{code,message,apiVersions?}}` HTTP
//! envelope every non-2xx response uses (§4.9/§6.1), the one place in this
//! crate allowed to know the mapping from a domain error to a status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tyger_core::TygerError;

pub struct ApiError(pub TygerError);

impl From<TygerError> for ApiError {
    fn from(err: TygerError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(rename = "apiVersions", skip_serializing_if = "Option::is_none")]
    api_versions: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let api_versions = match &self.0 {
            TygerError::UnsupportedApiVersion { supported } => Some(supported.clone()),
            _ => None,
        };
        let body = ErrorEnvelope {
            error: ErrorBody { code: self.0.code(), message: self.0.to_string(), api_versions },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
