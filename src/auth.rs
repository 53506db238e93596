//! Client for the hosted backend's auth subsystem (GoTrue-style endpoints).

use reqwest::Method;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    backend::rest::error_from_body,
    error::{AppError, AppResult},
};

const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: AuthUser,
}

/// Sign-up either signs the user in directly or waits for email confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignUp {
    SignedIn(AuthSession),
    ConfirmationSent(AuthUser),
}

#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    reset_redirect: Option<String>,
}

impl AuthClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        reset_redirect: Option<String>,
    ) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key, reset_redirect }
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let url = format!("{}/auth/v1/{path}", self.base_url);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer.unwrap_or(&self.api_key))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let email = validate_email(email)?;
        if password.is_empty() {
            return Err(AppError::invalid("password is required"));
        }
        let req = self
            .request(Method::POST, "token", None)
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let session: AuthSession = send(req).await?;
        debug!(user_id = %session.user.id, "signed in");
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUp> {
        let email = validate_email(email)?;
        validate_password(password)?;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Response {
            Session(AuthSession),
            User(AuthUser),
        }

        let req = self
            .request(Method::POST, "signup", None)
            .json(&json!({ "email": email, "password": password }));
        Ok(match send::<Response>(req).await? {
            Response::Session(session) => SignUp::SignedIn(session),
            Response::User(user) => {
                debug!(user_id = %user.id, "sign-up awaiting confirmation");
                SignUp::ConfirmationSent(user)
            },
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> AppResult<AuthSession> {
        if refresh_token.is_empty() {
            return Err(AppError::Unauthorized);
        }
        let req = self
            .request(Method::POST, "token", None)
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        send(req).await
    }

    /// The user owning `access_token`; an expired or revoked token maps to
    /// [`AppError::Unauthorized`].
    pub async fn user(&self, access_token: &str) -> AppResult<AuthUser> {
        match send(self.request(Method::GET, "user", Some(access_token))).await {
            Err(AppError::Backend { status: Some(401 | 403), .. }) => Err(AppError::Unauthorized),
            other => other,
        }
    }

    /// Revoke the session server-side. Failure only matters to the backend,
    /// the caller drops its cookies either way.
    pub async fn sign_out(&self, access_token: &str) {
        let result = self.request(Method::POST, "logout", Some(access_token)).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!("signed out"),
            Ok(resp) => warn!(status = %resp.status(), "sign-out rejected"),
            Err(err) => warn!(error = %err, "sign-out failed"),
        }
    }

    pub async fn update_password(&self, access_token: &str, password: &str) -> AppResult<()> {
        validate_password(password)?;
        let req = self
            .request(Method::PUT, "user", Some(access_token))
            .json(&json!({ "password": password }));
        let _: AuthUser = send(req).await?;
        Ok(())
    }

    pub async fn reset_password(&self, email: &str) -> AppResult<()> {
        let email = validate_email(email)?;
        let mut req = self.request(Method::POST, "recover", None).json(&json!({ "email": email }));
        if let Some(redirect) = &self.reset_redirect {
            req = req.query(&[("redirect_to", redirect)]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status, &body));
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> AppResult<&str> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::invalid("a valid email address is required")),
    }
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::invalid(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

async fn send<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> AppResult<T> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(error_from_body(status, &body));
    }
    Ok(serde_json::from_str(&body)?)
}
