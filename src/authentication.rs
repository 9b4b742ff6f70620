use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http::{HeaderMap, StatusCode};
use redis::{AsyncCommands, SetOptions};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::{
    kvs::{KvsError, KvsPool, KvsPoolError},
    models::{sessions, users},
    password::{hash_password, verify_password, PasswordError},
    requests::{LoginRequest, RegisterRequest},
    responses::{error_response, RegisterResponse, UserInfo},
    Services,
};

pub const SESSION_COOKIE: &str = "session_token";

const SESSION_CACHE_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("incorrect username or password")]
    InvalidCredentials,
    #[error("{0}")]
    Invalid(&'static str),
    #[error("username or email already exists")]
    AlreadyExists,
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl From<KvsPoolError> for AuthenticationError {
    fn from(error: KvsPoolError) -> Self {
        Self::Internal(Box::new(error))
    }
}

impl From<KvsError> for AuthenticationError {
    fn from(error: KvsError) -> Self {
        Self::Internal(Box::new(error))
    }
}

impl From<sea_orm::DbErr> for AuthenticationError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => Self::AlreadyExists,
            _ => Self::Internal(Box::new(error)),
        }
    }
}

impl From<PasswordError> for AuthenticationError {
    fn from(error: PasswordError) -> Self {
        Self::Internal(Box::new(error))
    }
}

impl From<tokio::task::JoinError> for AuthenticationError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Internal(Box::new(error))
    }
}

impl IntoResponse for AuthenticationError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => error_response(StatusCode::UNAUTHORIZED, "Not authenticated"),
            Self::InvalidCredentials => {
                error_response(StatusCode::UNAUTHORIZED, "Incorrect username or password")
            }
            Self::Invalid(message) => error_response(StatusCode::BAD_REQUEST, message),
            Self::AlreadyExists => {
                error_response(StatusCode::BAD_REQUEST, "Username or email already exists")
            }
            Self::Internal(error) => {
                tracing::error!(%error, "internal server error on authentication");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl From<AuthenticationError> for Response {
    fn from(value: AuthenticationError) -> Self {
        value.into_response()
    }
}

/// The user behind a request's session credential.
#[derive(Debug, Clone)]
pub struct Requester {
    pub user_id: Uuid,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<Arc<Services>> for Requester {
    type Rejection = AuthenticationError;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        state: &Arc<Services>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(AuthenticationError::Unauthorized)?;
        let user_id = state.auth.introspect_session(&token).await?;

        Ok(Self { user_id, token })
    }
}

/// Reads the session token from the session cookie, falling back to an
/// `Authorization: Bearer` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// A session created by a successful login.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub token: String,
    pub username: String,
}

pub struct AuthenticationService {
    db: DatabaseConnection,
    kvs_pool: Option<Arc<KvsPool>>,
    session_ttl: chrono::Duration,
    cookie_secure: bool,
}

impl AuthenticationService {
    pub fn new(
        db: DatabaseConnection,
        kvs_pool: Option<Arc<KvsPool>>,
        session_ttl: chrono::Duration,
        cookie_secure: bool,
    ) -> Self {
        Self {
            db,
            kvs_pool,
            session_ttl,
            cookie_secure,
        }
    }

    #[tracing::instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<RegisterResponse, AuthenticationError> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(AuthenticationError::Invalid("Username is required"));
        }
        if request.password.is_empty() {
            return Err(AuthenticationError::Invalid("Password is required"));
        }
        let email = request
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());
        if email.as_deref().is_some_and(|email| !email.contains('@')) {
            return Err(AuthenticationError::Invalid("Email is not valid"));
        }

        let password = request.password;
        let password_hash =
            tokio::task::spawn_blocking(move || hash_password(&password)).await??;

        let user = users::ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(username),
            email: Set(email),
            password_hash: Set(password_hash),
            is_active: Set(true),
            created_at: Set(chrono::Utc::now().into()),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(user_id = %user.id, "registered user");
        Ok(RegisterResponse {
            id: user.id,
            username: user.username,
        })
    }

    #[tracing::instrument(skip(self, request), fields(username = %request.username))]
    pub async fn login(&self, request: LoginRequest) -> Result<NewSession, AuthenticationError> {
        let user = users::Entity::find()
            .filter(users::Column::Username.eq(request.username.trim()))
            .one(&self.db)
            .await?
            .ok_or(AuthenticationError::InvalidCredentials)?;

        let password = request.password;
        let hash = user.password_hash.clone();
        let verified =
            tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await??;

        if !verified || !user.is_active {
            return Err(AuthenticationError::InvalidCredentials);
        }

        let now = chrono::Utc::now();
        let session = sessions::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            token: Set(new_session_token()),
            expires_at: Set((now + self.session_ttl).into()),
            created_at: Set(now.into()),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(user_id = %user.id, "user logged in");
        Ok(NewSession {
            token: session.token,
            username: user.username,
        })
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn logout(&self, token: &str) -> Result<(), AuthenticationError> {
        sessions::Entity::delete_many()
            .filter(sessions::Column::Token.eq(token))
            .exec(&self.db)
            .await?;

        self.invalidate_cached_session(token)
            .await
            .inspect_err(|error| tracing::error!(%error, "failed to invalidate session cache"))
            .ok();

        Ok(())
    }

    /// Maps a session token to its user, consulting the cache first.
    async fn introspect_session(&self, token: &str) -> Result<Uuid, AuthenticationError> {
        if let Ok(Some(user_id)) = self
            .get_cached_session(token)
            .await
            .inspect_err(|error| tracing::error!(%error, "failed to get session from cache"))
        {
            tracing::debug!(%user_id, "cache found, skipping session lookup");
            return Ok(user_id);
        }

        let session = sessions::Entity::find()
            .filter(sessions::Column::Token.eq(token))
            .one(&self.db)
            .await?
            .ok_or(AuthenticationError::Unauthorized)?;

        let remaining = session.expires_at.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if remaining <= chrono::Duration::zero() {
            tracing::debug!(user_id = %session.user_id, "session expired");
            session.delete(&self.db).await?;
            return Err(AuthenticationError::Unauthorized);
        }

        // cache the session in the background.
        // if it fails, just log the error and continue.
        if let Some(kvs_pool) = self.kvs_pool.clone() {
            let token = token.to_string();
            let user_id = session.user_id;
            let seconds = SESSION_CACHE_SECONDS.min(remaining.num_seconds().max(1) as u64);
            tokio::spawn(async move {
                cache_session(kvs_pool, &token, user_id, seconds)
                    .await
                    .inspect_err(|error| {
                        tracing::error!(%error, "failed to store session cache");
                    })
                    .ok();
            });
        }

        Ok(session.user_id)
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<UserInfo, AuthenticationError> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.db)
            .await?
            .filter(|user| user.is_active)
            .ok_or(AuthenticationError::Unauthorized)?;

        Ok(user.into())
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie_secure)
            .max_age(time::Duration::seconds(self.session_ttl.num_seconds()))
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE).path("/").build()
    }
}

impl From<users::Model> for UserInfo {
    fn from(value: users::Model) -> Self {
        Self {
            id: value.id,
            username: value.username,
            email: value.email,
            is_active: value.is_active,
        }
    }
}

fn new_session_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

// Code below is for caching sessions

impl AuthenticationService {
    #[tracing::instrument(skip(self, token))]
    async fn get_cached_session(&self, token: &str) -> Result<Option<Uuid>, AuthenticationError> {
        let Some(kvs_pool) = &self.kvs_pool else {
            return Ok(None);
        };

        let mut conn = kvs_pool.get().await?;
        let value: Option<String> = conn.get(session_key(token)).await?;

        Ok(value.and_then(|value| Uuid::parse_str(&value).ok()))
    }

    #[tracing::instrument(skip(self, token))]
    async fn invalidate_cached_session(&self, token: &str) -> Result<(), AuthenticationError> {
        let Some(kvs_pool) = &self.kvs_pool else {
            return Ok(());
        };

        let mut conn = kvs_pool.get().await?;
        conn.del(session_key(token)).await.map_err(Into::into)
    }
}

#[tracing::instrument(skip(kvs_pool, token))]
async fn cache_session(
    kvs_pool: Arc<KvsPool>,
    token: &str,
    user_id: Uuid,
    seconds: u64,
) -> Result<(), AuthenticationError> {
    let mut conn = kvs_pool.get().await?;

    conn.set_options(
        session_key(token),
        user_id.to_string(),
        SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(seconds.try_into().unwrap_or(1))),
    )
    .await
    .map_err(Into::into)
}

fn session_key(token: &str) -> String {
    format!("session:{token}")
}
