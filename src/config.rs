use std::net::SocketAddr;

use anyhow::{Context, bail};

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub backend_url: String,
    pub backend_key: String,
    pub tmdb_access_token: String,
    pub tmdb_base_url: String,
    pub tmdb_rps: u32,
    pub youtube_api_key: Option<String>,
    pub cache_database_url: String,
    pub cache_ttl_days: i64,
    pub max_concurrent: usize,
    pub password_reset_redirect: Option<String>,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 =
            non_empty("PORT").unwrap_or_else(|| "3000".to_string()).parse().context("PORT")?;

        let (backend_url, backend_key) = match (non_empty("BACKEND_URL"), non_empty("BACKEND_KEY")) {
            (Some(url), Some(key)) => (url.trim_end_matches('/').to_string(), key),
            (None, None) => bail!("backend is not configured: set BACKEND_URL and BACKEND_KEY"),
            (None, Some(_)) => bail!("BACKEND_URL is required"),
            (Some(_), None) => bail!("BACKEND_KEY is required"),
        };
        url::Url::parse(&backend_url).context("BACKEND_URL")?;

        let tmdb_access_token = non_empty("TMDB_ACCESS_TOKEN").unwrap_or_default();
        let tmdb_base_url = non_empty("TMDB_BASE_URL")
            .unwrap_or_else(|| "https://api.themoviedb.org/3".to_string());

        let tmdb_rps: u32 = non_empty("TMDB_RPS").and_then(|s| s.parse().ok()).unwrap_or(4);

        let cache_database_url = non_empty("CACHE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://mehflix-cache.db?mode=rwc".to_string());

        let cache_ttl_days: i64 =
            non_empty("CACHE_TTL_DAYS").and_then(|s| s.parse().ok()).unwrap_or(7);

        let max_concurrent: usize =
            non_empty("MAX_CONCURRENT_REQUESTS").and_then(|s| s.parse().ok()).unwrap_or(5);

        let secure_cookies = non_empty("SECURE_COOKIES")
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            backend_url,
            backend_key,
            tmdb_access_token,
            tmdb_base_url,
            tmdb_rps,
            youtube_api_key: non_empty("YOUTUBE_API_KEY"),
            cache_database_url,
            cache_ttl_days,
            max_concurrent,
            password_reset_redirect: non_empty("PASSWORD_RESET_REDIRECT"),
            secure_cookies,
        })
    }
}
