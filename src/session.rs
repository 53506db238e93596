//! Cookie-held auth session and the signed-in user extractor.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, warn};

use crate::{
    AppState,
    auth::AuthSession,
    backend::rest::RestBackend,
    error::AppError,
};

pub const ACCESS_COOKIE: &str = "mf_access";
pub const REFRESH_COOKIE: &str = "mf_refresh";

const REFRESH_MAX_AGE_DAYS: i64 = 30;
const DEFAULT_ACCESS_SECS: i64 = 3600;

/// Access token obtained by [`refresh_session`] during this request.
#[derive(Clone)]
struct RefreshedToken(String);

fn cookie(name: &'static str, value: String, max_age: time::Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build()
}

/// Persist a fresh session. The access cookie expires with the token so an
/// expired token is refreshed instead of rejected.
pub fn store(jar: CookieJar, session: &AuthSession, secure: bool) -> CookieJar {
    let access_secs = session.expires_in.filter(|s| *s > 0).unwrap_or(DEFAULT_ACCESS_SECS);
    jar.add(cookie(ACCESS_COOKIE, session.access_token.clone(), time::Duration::seconds(access_secs), secure))
        .add(cookie(
            REFRESH_COOKIE,
            session.refresh_token.clone(),
            time::Duration::days(REFRESH_MAX_AGE_DAYS),
            secure,
        ))
}

pub fn clear(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/")).remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

fn access_token(parts: &Parts) -> Option<String> {
    if let Some(RefreshedToken(token)) = parts.extensions.get::<RefreshedToken>() {
        return Some(token.clone());
    }
    CookieJar::from_headers(&parts.headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Exchange the refresh cookie for a new session when the access cookie has
/// expired, then continue with the new token.
pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let needs_refresh = jar.get(ACCESS_COOKIE).is_none_or(|c| c.value().is_empty());
    let refresh_token = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());

    let (Some(refresh_token), true) = (refresh_token, needs_refresh) else {
        return next.run(req).await;
    };

    match state.auth.refresh(&refresh_token).await {
        Ok(session) => {
            debug!(user_id = %session.user.id, "session refreshed");
            req.extensions_mut().insert(RefreshedToken(session.access_token.clone()));
            let resp = next.run(req).await;
            (store(jar, &session, state.config.secure_cookies), resp).into_response()
        },
        Err(err) => {
            warn!(error = %err, "session refresh failed");
            let resp = next.run(req).await;
            (clear(jar), resp).into_response()
        },
    }
}

/// The signed-in user. Handlers taking this redirect to `/login` when there is
/// no valid session.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: String,
    pub email: Option<String>,
    pub access_token: String,
}

impl CurrentUser {
    /// Backend handle acting as this user.
    pub fn backend(&self, state: &AppState) -> RestBackend {
        state.backend.as_user(&self.access_token)
    }
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = access_token(parts).ok_or(AppError::Unauthorized)?;
        let user = state.auth.user(&token).await?;
        Ok(CurrentUser { id: user.id, email: user.email, access_token: token })
    }
}
