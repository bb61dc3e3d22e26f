use axum::{
    Json,
    extract::{FromRef, FromRequestParts, Request},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    config::AppConfig,
    models::MessageResponse,
    repository::RepositoryState,
};

// --- Role Ranks ---
//
// Roles form a total order; a larger rank carries more privilege.

pub const STAFF: i32 = 1;
pub const ADMIN: i32 = 2;
pub const CEO: i32 = 3;

/// Tokens are valid for 24 hours from issuance.
pub const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Claims
///
/// The signed payload of a bearer token. It identifies the subject only: the role is
/// never trusted from the token and is re-read from the store on every request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id, as a string per RFC 7519.
    pub sub: String,
    pub email: String,
    /// Expiration Time (exp): seconds since the epoch.
    pub exp: usize,
    /// Issued At (iat): seconds since the epoch.
    pub iat: usize,
}

/// AuthError
///
/// Terminal states of the authorization gate other than `Authorized`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    Unauthenticated,
    #[error("token signature or expiry check failed")]
    InvalidToken,
    #[error("token subject no longer exists")]
    IdentityGone,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("token signing secret is not configured")]
    MissingSecret,
    #[error("identity lookup failed: {0}")]
    Store(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated | AuthError::InvalidToken | AuthError::IdentityGone => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::MissingSecret | AuthError::Store(_) | AuthError::Signing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    /// The three authentication failures share one status and body; the precise
    /// kind only goes to the logs.
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::UNAUTHORIZED => {
                tracing::debug!(reason = %self, "authentication rejected");
                "Authentication required"
            }
            StatusCode::FORBIDDEN => "Insufficient permissions",
            _ => {
                tracing::error!(error = %self, "authorization gate failure");
                "An unexpected error occurred"
            }
        };
        (status, Json(MessageResponse::new(message))).into_response()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// issue_token
///
/// Signs a 24-hour HS256 token for the given user.
pub fn issue_token(user_id: i32, email: &str, secret: Option<&str>) -> Result<String, AuthError> {
    let secret = secret.ok_or(AuthError::MissingSecret)?;
    let now = now_secs();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now as usize,
        exp: (now + TOKEN_TTL_SECS) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Signing(e.to_string()))
}

/// verify_token
///
/// Checks signature and expiry. Any failure collapses into `InvalidToken`.
pub fn verify_token(token: &str, secret: Option<&str>) -> Result<Claims, AuthError> {
    let secret = secret.ok_or(AuthError::MissingSecret)?;
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(kind = ?e.kind(), "token rejected");
            AuthError::InvalidToken
        })
}

/// bearer_token
///
/// Extracts `<token>` from `Authorization: Bearer <token>`.
pub fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Unauthenticated)
}

/// check_rank
///
/// Passes iff a role is assigned and `rank >= minimum`.
pub fn check_rank(rank: Option<i32>, minimum: i32) -> Result<(), AuthError> {
    match rank {
        Some(rank) if rank >= minimum => Ok(()),
        _ => Err(AuthError::Forbidden),
    }
}

/// AuthUser
///
/// The resolved identity of an authenticated request. `role_rank` comes from the
/// store as of this request, never from the token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role_rank: Option<i32>,
}

/// AuthUser Extractor Implementation
///
/// 1. Reuse an identity already resolved earlier in this request (e.g. by a layer).
/// 2. Require `Authorization: Bearer <token>` before touching the token.
/// 3. Verify signature and expiry.
/// 4. Point-read the subject and its current role; reject deleted accounts.
///
/// The resolved identity is cached in the request extensions so a request carries
/// at most one.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let token = bearer_token(parts)?;

        let config = AppConfig::from_ref(state);
        let claims = verify_token(token, config.jwt_secret.as_deref())?;

        let user_id: i32 = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;

        let repo = RepositoryState::from_ref(state);
        let identity = repo
            .get_identity(user_id)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?
            .ok_or(AuthError::IdentityGone)?;

        let user = AuthUser {
            id: identity.id,
            email: identity.email,
            role_rank: identity.role_id,
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// MinRank
///
/// Extractor form of the rank policy: authenticates, then requires
/// `role_rank >= RANK`. Use as `MinRank<ADMIN>`.
#[derive(Debug, Clone)]
pub struct MinRank<const RANK: i32>(pub AuthUser);

impl<S, const RANK: i32> FromRequestParts<S> for MinRank<RANK>
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        check_rank(user.role_rank, RANK)?;
        Ok(MinRank(user))
    }
}

/// require_rank
///
/// Route-layer middleware enforcing `MinRank<RANK>` for a whole router.
pub async fn require_rank<const RANK: i32>(
    _authorized: MinRank<RANK>,
    request: Request,
    next: Next,
) -> Response {
    next.run(request).await
}

/// require_auth
///
/// Route-layer middleware that only requires a valid identity.
pub async fn require_auth(_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// Convenience used by handlers that need the caller's rank as a plain number,
/// treating "no role" as below every rank.
pub fn rank_or_zero(user: &AuthUser) -> i32 {
    user.role_rank.unwrap_or(0)
}
