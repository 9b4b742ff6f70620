use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use url::Url;

use crate::{
    authentication::{session_token, Requester},
    requests::{ListLinks, LoginRequest, RegisterRequest, ResolvePathParam, ShortenRequest},
    responses::{
        error_response, LoginResponse, MeResponse, MessageResponse, PagedResponse,
        RegisterResponse, ShortLink, ShortenResponse,
    },
    Services,
};

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn shorten(
    State(services): State<Arc<Services>>,
    requester: Option<Requester>,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> Result<Json<ShortenResponse>, Response> {
    let request = json_body(payload)?;

    let original_url = request.original_url.unwrap_or_default();
    let owner = requester.map(|requester| requester.user_id);

    let link = services
        .links
        .shorten(&original_url, owner)
        .await
        .map_err(Response::from)?;

    Ok(Json(link.into()))
}

/// Unwraps a JSON body, turning axum's plain-text rejection into a 400
/// with the usual `{"error": ...}` body.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| {
            tracing::debug!(%rejection, "rejected request body");
            error_response(StatusCode::BAD_REQUEST, rejection.body_text())
        })
}

pub async fn resolve(
    State(services): State<Arc<Services>>,
    Path(ResolvePathParam { code }): Path<ResolvePathParam>,
) -> Result<Response, Response> {
    let original_url = services
        .links
        .resolve(&code)
        .await
        .map_err(Response::from)?;

    let location = location_header(&original_url).ok_or_else(|| {
        tracing::error!(%code, original_url, "stored url is not a valid location header");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    })?;

    tracing::debug!(%code, original_url, "redirecting");
    Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response())
}

/// Uses the stored URL verbatim when it is plain ASCII, otherwise its
/// percent-encoded serialization.
fn location_header(original_url: &str) -> Option<HeaderValue> {
    if original_url.is_ascii() {
        if let Ok(value) = HeaderValue::from_str(original_url) {
            return Some(value);
        }
    }

    let url = Url::parse(original_url).ok()?;
    HeaderValue::from_str(url.as_str()).ok()
}

pub async fn list_links(
    State(services): State<Arc<Services>>,
    Query(ListLinks { after, limit }): Query<ListLinks>,
) -> Result<Json<PagedResponse<ShortLink>>, Response> {
    let links = services
        .links
        .list(after, limit)
        .await
        .map_err(Response::from)?;

    Ok(Json(PagedResponse::new(links)))
}

pub async fn my_links(
    State(services): State<Arc<Services>>,
    requester: Requester,
    Query(ListLinks { after, limit }): Query<ListLinks>,
) -> Result<Json<PagedResponse<ShortLink>>, Response> {
    let links = services
        .links
        .list_by_owner(requester.user_id, after, limit)
        .await
        .map_err(Response::from)?;

    Ok(Json(PagedResponse::new(links)))
}

pub async fn register(
    State(services): State<Arc<Services>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), Response> {
    let request = json_body(payload)?;
    let user = services
        .auth
        .register(request)
        .await
        .map_err(Response::from)?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(services): State<Arc<Services>>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), Response> {
    let request = json_body(payload)?;
    let session = services
        .auth
        .login(request)
        .await
        .map_err(Response::from)?;

    let jar = jar.add(services.auth.session_cookie(session.token));
    Ok((
        jar,
        Json(LoginResponse {
            username: session.username,
        }),
    ))
}

pub async fn logout(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), Response> {
    if let Some(token) = session_token(&headers) {
        services
            .auth
            .logout(&token)
            .await
            .map_err(Response::from)?;
    }

    Ok((
        jar.remove(services.auth.removal_cookie()),
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

pub async fn me(
    State(services): State<Arc<Services>>,
    requester: Requester,
) -> Result<Json<MeResponse>, Response> {
    let user = services
        .auth
        .current_user(requester.user_id)
        .await
        .map_err(Response::from)?;

    Ok(Json(MeResponse { user }))
}
