//! HTTP client for the shortening service.
//!
//! Speaks the same JSON contract as the browser frontend: the session
//! cookie set by `login` is kept in the client's cookie store and sent
//! along with later requests. Any non-2xx response is an error and
//! nothing is retried.

use reqwest::{redirect, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    requests::{ListLinks, LoginRequest, RegisterRequest, ShortenRequest},
    responses::{
        ErrorResponse, LoginResponse, MeResponse, MessageResponse, PagedResponse,
        RegisterResponse, ShortLink, ShortenResponse, UserInfo,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("redirect response without a usable location")]
    MissingLocation,
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(error) => error.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShortlinkClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ShortlinkClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url.join(path).map_err(Into::into)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)?).json(body).send().await?;
        Ok(expect_success(response).await?.json().await?)
    }

    async fn get<Q, T>(&self, path: &str, query: &Q) -> Result<T, ClientError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.get(self.url(path)?).query(query).send().await?;
        Ok(expect_success(response).await?.json().await?)
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<RegisterResponse, ClientError> {
        let request = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            email: email.map(String::from),
        };
        self.post("register", &request).await
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.post("login", &request).await
    }

    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        self.post("logout", &serde_json::json!({})).await
    }

    pub async fn me(&self) -> Result<UserInfo, ClientError> {
        let response = self.http.get(self.url("me")?).send().await?;
        let me: MeResponse = expect_success(response).await?.json().await?;
        Ok(me.user)
    }

    pub async fn shorten(&self, original_url: &str) -> Result<ShortenResponse, ClientError> {
        self.post("shorten", &ShortenRequest::new(original_url.trim())).await
    }

    pub async fn list(&self, query: &ListLinks) -> Result<PagedResponse<ShortLink>, ClientError> {
        self.get("links", query).await
    }

    pub async fn my_links(
        &self,
        query: &ListLinks,
    ) -> Result<PagedResponse<ShortLink>, ClientError> {
        self.get("me/links", query).await
    }

    /// Returns where `code` redirects to without following the redirect.
    pub async fn resolve(&self, code: &str) -> Result<String, ClientError> {
        let response = self.http.get(self.url(code)?).send().await?;

        if !response.status().is_redirection() {
            expect_success(response).await?;
            return Err(ClientError::MissingLocation);
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|location| location.to_str().ok())
            .map(String::from)
            .ok_or(ClientError::MissingLocation)
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };

    tracing::debug!(%status, message, "request failed");
    Err(ClientError::Status { status, message })
}
