use std::{num::NonZeroU32, sync::Arc};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::Deserialize;

use crate::error::AppResult;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TmdbMovie {
    pub id: i32,
    pub title: String,
    pub year: Option<i32>,
}

pub struct TmdbClient {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TmdbClient {
    pub fn new(client: reqwest::Client, access_token: String, base_url: String, rps: u32) -> Self {
        if access_token.trim().is_empty() {
            tracing::warn!("no TMDB_ACCESS_TOKEN provided, TMDB lookups are disabled");
        }

        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN));
        let limiter = Arc::new(RateLimiter::direct(quota));
        Self { client, access_token, base_url, limiter }
    }

    pub fn is_enabled(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    /// Best match for a title; a result released in `year` wins over the
    /// first hit.
    pub async fn search_movie(&self, title: &str, year: Option<i32>) -> AppResult<Option<TmdbMovie>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        self.limiter.until_ready().await;

        let url = format!("{}/search/movie", self.base_url.trim_end_matches('/'));
        let resp: SearchResponse = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("query", title)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let movies: Vec<TmdbMovie> = resp
            .results
            .into_iter()
            .map(|m| TmdbMovie {
                id: m.id,
                year: m.release_date.as_deref().and_then(release_year),
                title: m.title,
            })
            .collect();

        let exact = year.and_then(|y| movies.iter().position(|m| m.year == Some(y)));
        Ok(match exact {
            Some(index) => movies.into_iter().nth(index),
            None => movies.into_iter().next(),
        })
    }

    /// YouTube key of the movie's best trailer: an official video first, then
    /// a full trailer, then any teaser.
    pub async fn trailer_key(&self, tmdb_id: i32) -> AppResult<Option<String>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        self.limiter.until_ready().await;

        let url = format!("{}/movie/{}/videos", self.base_url.trim_end_matches('/'), tmdb_id);
        let resp: VideosResponse = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(pick_trailer(resp.results))
    }
}

fn release_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

fn pick_trailer(videos: Vec<Video>) -> Option<String> {
    let candidates: Vec<Video> = videos
        .into_iter()
        .filter(|v| v.site == "YouTube" && matches!(v.type_.as_str(), "Trailer" | "Teaser"))
        .collect();

    candidates
        .iter()
        .find(|v| v.official)
        .or_else(|| candidates.iter().find(|v| v.type_ == "Trailer"))
        .or_else(|| candidates.first())
        .map(|v| v.key.clone())
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchMovie>,
}

#[derive(Debug, Deserialize)]
struct SearchMovie {
    id: i32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    results: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    key: String,
    site: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    official: bool,
}
