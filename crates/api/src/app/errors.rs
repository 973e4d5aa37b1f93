use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use walletd_auth::LoginError;
use walletd_wallet::WalletError;

pub fn wallet_error_to_response(err: WalletError) -> axum::response::Response {
    match err {
        WalletError::InvalidInput(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
        WalletError::WalletNotFound => {
            json_error(StatusCode::NOT_FOUND, "wallet_not_found", "wallet not found")
        }
        WalletError::InsufficientBalance => json_error(
            StatusCode::CONFLICT,
            "insufficient_balance",
            "insufficient balance",
        ),
        WalletError::Storage { .. } => {
            tracing::error!(error = %err, "wallet operation failed");
            internal_error()
        }
    }
}

pub fn login_error_to_response(err: LoginError) -> axum::response::Response {
    match err {
        LoginError::MissingCredentials => json_error(
            StatusCode::BAD_REQUEST,
            "missing_credentials",
            "email and password are required",
        ),
        LoginError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid email or password",
        ),
        LoginError::Directory(_) | LoginError::Token(_) | LoginError::Hashing(_) => {
            tracing::error!(error = %err, "login failed");
            internal_error()
        }
    }
}

pub fn invalid_body() -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_body", "invalid request body")
}

pub fn internal_error() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
