use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::Utc;

use crate::error::AppError;
use crate::services::users;
use crate::state::AppState;
use crate::types::{Role, UserDto};

/// Extracts the token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.len() > 128 {
        None
    } else {
        Some(token)
    }
}

/// The authenticated caller, resolved from its session token.
///
/// Handlers that take a `CurrentUser` reject anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: UserDto,
    pub token: String,
}

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role()
    }

    pub fn is_staff(&self) -> bool {
        self.role().is_staff()
    }

    /// Fails with 403 unless the caller has one of `roles`.
    pub fn require(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.role()) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("Role '{}' may not perform this action", self.role())))
        }
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        self.require(&[Role::Admin, Role::Librarian])
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require(&[Role::Admin])
    }

    /// Staff may act for anyone; other users only for themselves.
    pub fn require_self_or_staff(&self, user_id: i64) -> Result<(), AppError> {
        if self.is_staff() || self.id() == user_id {
            Ok(())
        } else {
            Err(AppError::Forbidden("You may only access your own records".to_string()))
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?
            .to_string();
        let user = users::user_for_token(&state.db, &token, Utc::now())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Session expired or invalid".to_string()))?;
        Ok(CurrentUser { user, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
