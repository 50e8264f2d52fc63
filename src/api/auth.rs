use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::db::{Actor, Database, DbError, User};

use super::error::AppError;
use super::state::AppState;

/// Resolves a bearer credential to a user. The engine trusts the result.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Option<User>, DbError>;
}

impl Authenticator for Database {
    fn authenticate(&self, token: &str) -> Result<Option<User>, DbError> {
        self.get_user_by_token(token)
    }
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Rejects unauthenticated requests with 401 and hands the resolved
/// [`Actor`] to handlers as a request extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&request) else {
        tracing::warn!(
            "Missing API token for {} {}",
            request.method(),
            request.uri().path()
        );
        return AppError::unauthorized("Missing bearer token").into_response();
    };

    let user = match state.authenticator.authenticate(token) {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(
                "Invalid API token for {} {}",
                request.method(),
                request.uri().path()
            );
            return AppError::unauthorized("Invalid bearer token").into_response();
        }
        Err(e) => return AppError::from(e).into_response(),
    };

    if !user.active {
        tracing::warn!("Inactive user {} rejected for {}", user.id, request.uri().path());
        return AppError::unauthorized("User account is inactive").into_response();
    }

    tracing::debug!("Authenticated {} ({}) for {} {}", user.id, user.role.as_str(), request.method(), request.uri().path());
    request.extensions_mut().insert(Actor::from(&user));
    next.run(request).await
}
