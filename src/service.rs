use axum::response::{IntoResponse, Response};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    code::{CodeGenerator, ShortCode},
    models::short_links,
    responses::{error_response, ShortLink},
    validation::{validate_url, UrlValidationError},
};

pub const MAX_GENERATION_ATTEMPTS: usize = 8;
pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("database error: {0}")]
    Database(sea_orm::DbErr),
    #[error("code already exists")]
    CodeAlreadyExists,
}

impl From<sea_orm::DbErr> for InsertError {
    fn from(error: sea_orm::DbErr) -> Self {
        // `code` is the only unique column a caller controls.
        match error.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => Self::CodeAlreadyExists,
            _ => Self::Database(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShortenError {
    #[error(transparent)]
    Validation(#[from] UrlValidationError),
    #[error("database error: {0}")]
    Database(sea_orm::DbErr),
    #[error("no free code found after {0} attempts")]
    CodeSpaceExhausted(usize),
}

impl From<ShortenError> for Response {
    fn from(value: ShortenError) -> Self {
        match value {
            ShortenError::Validation(error) => {
                error_response(http::StatusCode::BAD_REQUEST, error.to_string())
            }
            error => {
                tracing::error!(%error, "failed to shorten url");
                error_response(
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error",
                )
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("short link not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl From<ResolveError> for Response {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::NotFound => (
                [("x-error", "Link not found")],
                error_response(http::StatusCode::NOT_FOUND, "Short link not found"),
            )
                .into_response(),
            ResolveError::Database(error) => {
                tracing::error!(%error, "failed to resolve short link");
                error_response(
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error",
                )
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl From<QueryError> for Response {
    fn from(value: QueryError) -> Self {
        tracing::error!(error = %value, "service internal server error");
        error_response(
            http::StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error",
        )
    }
}

#[derive(Debug, Clone)]
struct NewShortLink {
    code: ShortCode,
    original_url: String,
    user_id: Option<Uuid>,
}

impl From<NewShortLink> for short_links::ActiveModel {
    fn from(value: NewShortLink) -> Self {
        short_links::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(value.code.into_inner()),
            original_url: Set(value.original_url),
            user_id: Set(value.user_id),
            created_at: Set(chrono::Utc::now().into()),
        }
    }
}

pub struct LinkService {
    db: DatabaseConnection,
    base_url: String,
    generator: Box<dyn CodeGenerator>,
}

impl LinkService {
    pub fn new(
        db: DatabaseConnection,
        base_url: impl Into<String>,
        generator: Box<dyn CodeGenerator>,
    ) -> Self {
        Self {
            db,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            generator,
        }
    }

    pub fn short_url(&self, code: &str) -> String {
        format!("{}/{}", self.base_url, code)
    }

    fn to_short_link(&self, model: short_links::Model) -> ShortLink {
        ShortLink {
            short_url: self.short_url(&model.code),
            code: model.code,
            original_url: model.original_url,
            created_at: model.created_at,
        }
    }
}

impl LinkService {
    /// Stores `original_url` under a freshly generated code. Every call
    /// creates a new link, even for a URL that was shortened before.
    #[tracing::instrument(skip(self))]
    pub async fn shorten(
        &self,
        original_url: &str,
        owner: Option<Uuid>,
    ) -> Result<ShortLink, ShortenError> {
        let original_url = validate_url(original_url)?;

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let new_link = NewShortLink {
                code: self.generator.generate(),
                original_url: original_url.to_string(),
                user_id: owner,
            };
            let code = new_link.code.clone();

            if code.is_reserved() {
                tracing::warn!(%code, attempt, "generated code is a route name, retrying");
                continue;
            }

            match self.insert(new_link).await {
                Ok(model) => {
                    tracing::debug!(%code, original_url, "created short link");
                    return Ok(self.to_short_link(model));
                }
                Err(InsertError::CodeAlreadyExists) => {
                    tracing::warn!(%code, attempt, "short code collision, retrying");
                }
                Err(InsertError::Database(error)) => return Err(ShortenError::Database(error)),
            }
        }

        Err(ShortenError::CodeSpaceExhausted(MAX_GENERATION_ATTEMPTS))
    }

    async fn insert(&self, new_link: NewShortLink) -> Result<short_links::Model, InsertError> {
        short_links::ActiveModel::from(new_link)
            .insert(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Looks up the original URL for `code`. Strings that can never be a
    /// code are reported as not found rather than as bad input.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, code: &str) -> Result<String, ResolveError> {
        let Ok(code) = ShortCode::try_from(code) else {
            return Err(ResolveError::NotFound);
        };

        short_links::Entity::find()
            .filter(short_links::Column::Code.eq(&*code))
            .one(&self.db)
            .await?
            .map(|link| link.original_url)
            .ok_or(ResolveError::NotFound)
    }

    pub async fn list(
        &self,
        after: Option<String>,
        limit: Option<u64>,
    ) -> Result<Vec<ShortLink>, QueryError> {
        self.list_filtered(None, after, limit).await
    }

    pub async fn list_by_owner(
        &self,
        owner: Uuid,
        after: Option<String>,
        limit: Option<u64>,
    ) -> Result<Vec<ShortLink>, QueryError> {
        self.list_filtered(Some(owner), after, limit).await
    }

    async fn list_filtered(
        &self,
        owner: Option<Uuid>,
        after: Option<String>,
        limit: Option<u64>,
    ) -> Result<Vec<ShortLink>, QueryError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let mut query = short_links::Entity::find()
            .order_by_asc(short_links::Column::Code)
            .limit(limit);

        if let Some(owner) = owner {
            query = query.filter(short_links::Column::UserId.eq(owner));
        }

        if let Some(code) = after {
            query = query.filter(short_links::Column::Code.gt(code));
        }

        Ok(query
            .all(&self.db)
            .await?
            .into_iter()
            .map(|model| self.to_short_link(model))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashSet, VecDeque},
        sync::Mutex,
    };

    use sea_orm::PaginatorTrait;

    use super::*;
    use crate::{code::RandomCodeGenerator, database::test_database};

    impl LinkService {
        async fn count(&self) -> u64 {
            short_links::Entity::find().count(&self.db).await.unwrap()
        }
    }

    /// Hands out a fixed sequence of codes, then falls back to random ones.
    struct ScriptedGenerator {
        codes: Mutex<VecDeque<&'static str>>,
        fallback: RandomCodeGenerator,
    }

    impl ScriptedGenerator {
        fn new(codes: &[&'static str]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().copied().collect()),
                fallback: RandomCodeGenerator::new(7),
            }
        }
    }

    impl CodeGenerator for ScriptedGenerator {
        fn generate(&self) -> ShortCode {
            match self.codes.lock().unwrap().pop_front() {
                Some(code) => ShortCode::try_from(code).unwrap(),
                None => self.fallback.generate(),
            }
        }
    }

    fn service(db: DatabaseConnection, generator: impl CodeGenerator + 'static) -> LinkService {
        LinkService::new(db, "https://short.ly", Box::new(generator))
    }

    #[tokio::test]
    async fn shorten_then_resolve_round_trips() {
        let (_dir, db) = test_database().await;
        let links = service(db, ScriptedGenerator::new(&["abc123"]));

        let link = links
            .shorten("https://example.com/page", None)
            .await
            .unwrap();

        assert_eq!(link.code, "abc123");
        assert_eq!(link.short_url, "https://short.ly/abc123");
        assert_eq!(link.original_url, "https://example.com/page");
        assert_eq!(
            links.resolve("abc123").await.unwrap(),
            "https://example.com/page"
        );
    }

    #[tokio::test]
    async fn url_is_stored_as_given_not_normalized() {
        let (_dir, db) = test_database().await;
        let links = service(db, RandomCodeGenerator::new(7));

        let link = links.shorten("https://Example.com", None).await.unwrap();

        assert_eq!(
            links.resolve(&link.code).await.unwrap(),
            "https://Example.com"
        );
    }

    #[tokio::test]
    async fn empty_url_is_a_validation_error() {
        let (_dir, db) = test_database().await;
        let links = service(db, RandomCodeGenerator::new(7));

        assert!(matches!(
            links.shorten("", None).await,
            Err(ShortenError::Validation(UrlValidationError::Empty))
        ));
        assert!(matches!(
            links.shorten("ftp://example.com", None).await,
            Err(ShortenError::Validation(_))
        ));
        assert_eq!(links.count().await, 0);
    }

    #[tokio::test]
    async fn unknown_codes_are_not_found() {
        let (_dir, db) = test_database().await;
        let links = service(db, RandomCodeGenerator::new(7));

        assert!(matches!(
            links.resolve("nothere").await,
            Err(ResolveError::NotFound)
        ));
        assert!(matches!(
            links.resolve("not/a/code").await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn collision_is_retried_with_a_new_code() {
        let (_dir, db) = test_database().await;
        let links = service(db, ScriptedGenerator::new(&["taken", "taken", "fresh"]));

        let first = links.shorten("https://a.example", None).await.unwrap();
        let second = links.shorten("https://b.example", None).await.unwrap();

        assert_eq!(first.code, "taken");
        assert_eq!(second.code, "fresh");
        assert_eq!(links.resolve("taken").await.unwrap(), "https://a.example");
        assert_eq!(links.resolve("fresh").await.unwrap(), "https://b.example");
    }

    #[tokio::test]
    async fn route_names_are_never_issued() {
        let (_dir, db) = test_database().await;
        let links = service(db, ScriptedGenerator::new(&["shorten", "links", "fresh"]));

        let link = links.shorten("https://a.example", None).await.unwrap();

        assert_eq!(link.code, "fresh");
        assert_eq!(links.count().await, 1);
        assert!(matches!(
            links.resolve("shorten").await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn gives_up_after_repeated_collisions() {
        let (_dir, db) = test_database().await;
        let codes = ["same"; MAX_GENERATION_ATTEMPTS + 1];
        let links = service(db, ScriptedGenerator::new(&codes));

        links.shorten("https://a.example", None).await.unwrap();

        assert!(matches!(
            links.shorten("https://b.example", None).await,
            Err(ShortenError::CodeSpaceExhausted(MAX_GENERATION_ATTEMPTS))
        ));
    }

    #[tokio::test]
    async fn shortening_is_not_idempotent() {
        let (_dir, db) = test_database().await;
        let links = service(db, RandomCodeGenerator::new(7));

        let mut codes = HashSet::new();
        for _ in 0..20 {
            let link = links.shorten("https://example.com", None).await.unwrap();
            assert!(codes.insert(link.code));
        }
        assert_eq!(links.count().await, 20);
    }

    #[tokio::test]
    async fn list_pages_by_code() {
        let (_dir, db) = test_database().await;
        let links = service(db, ScriptedGenerator::new(&["c", "a", "b"]));
        for url in ["https://c.example", "https://a.example", "https://b.example"] {
            links.shorten(url, None).await.unwrap();
        }

        let page: Vec<_> = links
            .list(None, Some(2))
            .await
            .unwrap()
            .into_iter()
            .map(|link| link.code)
            .collect();
        assert_eq!(page, vec!["a", "b"]);

        let rest: Vec<_> = links
            .list(Some("b".to_string()), Some(2))
            .await
            .unwrap()
            .into_iter()
            .map(|link| link.code)
            .collect();
        assert_eq!(rest, vec!["c"]);
    }
}
