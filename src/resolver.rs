use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    backend::Backend,
    cache::{LookupSource, TrailerLookupCache},
    data::trailers::{is_placeholder_title, set_video, trailers_missing_video},
    error::AppResult,
    tmdb::TmdbClient,
    youtube::YoutubeClient,
};

/// Finds a YouTube video for a title: local cache, then TMDB, then YouTube
/// search.
pub struct Resolver {
    cache: TrailerLookupCache,
    tmdb: TmdbClient,
    youtube: YoutubeClient,
}

impl Resolver {
    pub fn new(cache: TrailerLookupCache, tmdb: TmdbClient, youtube: YoutubeClient) -> Self {
        Self { cache, tmdb, youtube }
    }

    pub fn cache(&self) -> &TrailerLookupCache {
        &self.cache
    }

    pub async fn resolve_video(&self, title: &str, year: Option<i32>) -> AppResult<Option<String>> {
        if let Some(cached) = self.cache.get(title, year).await? {
            debug!(title, key = ?cached.youtube_key, "trailer lookup cache hit");
            return Ok(cached.youtube_key);
        }

        let mut tmdb_id = None;
        let mut tmdb_failed = false;
        match self.tmdb_video(title, year).await {
            Ok((id, Some(key))) => {
                self.cache.put(title, year, id, Some(&key), Some(LookupSource::Tmdb)).await?;
                return Ok(Some(key));
            },
            Ok((id, None)) => tmdb_id = id,
            Err(err) => {
                warn!(title, error = %err, "TMDB lookup failed, trying YouTube search");
                tmdb_failed = true;
            },
        }

        if let Some(key) = self.youtube.search_trailer(title, year).await? {
            debug!(title, key = %key, "found trailer via YouTube search");
            self.cache.put(title, year, tmdb_id, Some(&key), Some(LookupSource::Youtube)).await?;
            return Ok(Some(key));
        }

        if !tmdb_failed {
            self.cache.put(title, year, tmdb_id, None, None).await?;
        }
        debug!(title, "no trailer found");
        Ok(None)
    }

    async fn tmdb_video(&self, title: &str, year: Option<i32>) -> AppResult<(Option<i32>, Option<String>)> {
        let Some(movie) = self.tmdb.search_movie(title, year).await? else {
            return Ok((None, None));
        };
        debug!(title, tmdb_id = movie.id, "matched TMDB movie");
        let key = self.tmdb.trailer_key(movie.id).await?;
        Ok((Some(movie.id), key))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub scanned: usize,
    pub updated: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum ItemResult {
    Updated,
    NotFound,
    Skipped,
    Failed,
}

/// Fill in the video reference of every trailer that lacks one. Per-trailer
/// failures are logged and counted; only the initial scan can fail the batch.
pub async fn backfill<B: Backend>(
    backend: &B,
    resolver: &Resolver,
    max_concurrent: usize,
) -> AppResult<BackfillSummary> {
    let trailers = trailers_missing_video(backend).await?;
    info!(count = trailers.len(), "backfilling trailer videos");

    let results: Vec<ItemResult> = stream::iter(trailers)
        .map(|trailer| async move {
            if is_placeholder_title(&trailer.title) {
                return ItemResult::Skipped;
            }
            let result: AppResult<ItemResult> = async {
                match resolver.resolve_video(&trailer.title, None).await? {
                    Some(key) => {
                        set_video(backend, &trailer.id, &key).await?;
                        Ok(ItemResult::Updated)
                    },
                    None => Ok(ItemResult::NotFound),
                }
            }
            .await;

            match result {
                Ok(item) => item,
                Err(err) => {
                    warn!(trailer_id = %trailer.id, title = %trailer.title, error = %err, "failed to backfill trailer");
                    ItemResult::Failed
                },
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let mut summary = BackfillSummary { scanned: results.len(), ..Default::default() };
    for result in results {
        match result {
            ItemResult::Updated => summary.updated += 1,
            ItemResult::NotFound => summary.not_found += 1,
            ItemResult::Skipped => summary.skipped += 1,
            ItemResult::Failed => summary.failed += 1,
        }
    }

    info!(?summary, "backfill complete");
    Ok(summary)
}
