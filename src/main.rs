mod auth;
mod backend;
mod cache;
mod config;
mod data;
mod db;
mod entities;
mod error;
mod genre;
mod models;
mod poster;
mod resolver;
mod routes;
mod session;
mod templates;
#[cfg(test)]
mod testing;
mod tmdb;
mod view;
mod youtube;

use std::{sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::AuthClient, backend::rest::RestBackend, cache::TrailerLookupCache, config::Config,
    resolver::Resolver, tmdb::TmdbClient, view::ViewRegistry, youtube::YoutubeClient,
};

pub struct AppState {
    pub config: Arc<Config>,
    pub backend: RestBackend,
    pub auth: AuthClient,
    pub resolver: Resolver,
    pub views: ViewRegistry,
}

impl AppState {
    pub fn new(config: Config, http: reqwest::Client, db: DatabaseConnection) -> Self {
        let backend =
            RestBackend::new(http.clone(), config.backend_url.clone(), config.backend_key.clone());
        let auth = AuthClient::new(
            http.clone(),
            config.backend_url.clone(),
            config.backend_key.clone(),
            config.password_reset_redirect.clone(),
        );

        let tmdb = TmdbClient::new(
            http.clone(),
            config.tmdb_access_token.clone(),
            config.tmdb_base_url.clone(),
            config.tmdb_rps,
        );
        let youtube = YoutubeClient::new(http, config.youtube_api_key.clone());
        let resolver =
            Resolver::new(TrailerLookupCache::new(db, config.cache_ttl_days), tmdb, youtube);

        Self { config: Arc::new(config), backend, auth, resolver, views: ViewRegistry::new() }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,mehflix=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr;

    let http = reqwest::Client::builder()
        .user_agent("mehflix/0.1")
        .timeout(Duration::from_secs(30))
        .build()?;

    let db = db::connect_and_migrate(&config.cache_database_url).await?;
    let state = Arc::new(AppState::new(config, http, db));

    let app = routes::router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
