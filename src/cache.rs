use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::{entities::trailer_lookup, error::AppResult};

/// Where a cached video reference came from. Misses are cached with no
/// source so they are not retried until the entry expires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookupSource {
    Tmdb,
    Youtube,
}

impl LookupSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LookupSource::Tmdb => "tmdb",
            LookupSource::Youtube => "youtube",
        }
    }
}

#[derive(Clone)]
pub struct TrailerLookupCache {
    db: DatabaseConnection,
    ttl_seconds: i64,
}

impl TrailerLookupCache {
    pub fn new(db: DatabaseConnection, ttl_days: i64) -> Self {
        Self { db, ttl_seconds: ttl_days.saturating_mul(86_400) }
    }

    pub async fn get(&self, title: &str, year: Option<i32>) -> AppResult<Option<trailer_lookup::Model>> {
        let entry = trailer_lookup::Entity::find_by_id(query_key(title, year)).one(&self.db).await?;
        Ok(entry.filter(|e| self.is_fresh(e.updated_at)))
    }

    pub async fn put(
        &self,
        title: &str,
        year: Option<i32>,
        tmdb_id: Option<i32>,
        youtube_key: Option<&str>,
        source: Option<LookupSource>,
    ) -> AppResult<()> {
        let model = trailer_lookup::ActiveModel {
            query_key: Set(query_key(title, year)),
            title: Set(title.trim().to_string()),
            year: Set(year),
            tmdb_id: Set(tmdb_id),
            youtube_key: Set(youtube_key.map(str::to_string)),
            source: Set(source.map(|s| s.as_str().to_string())),
            updated_at: Set(now_sec()),
        };

        trailer_lookup::Entity::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(trailer_lookup::Column::QueryKey)
                    .update_columns([
                        trailer_lookup::Column::Title,
                        trailer_lookup::Column::Year,
                        trailer_lookup::Column::TmdbId,
                        trailer_lookup::Column::YoutubeKey,
                        trailer_lookup::Column::Source,
                        trailer_lookup::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let cutoff = now_sec().saturating_sub(self.ttl_seconds);
        let res = trailer_lookup::Entity::delete_many()
            .filter(trailer_lookup::Column::UpdatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }

    fn is_fresh(&self, cached_at: i64) -> bool {
        now_sec().saturating_sub(cached_at) <= self.ttl_seconds
    }
}

/// Case- and spacing-insensitive cache key for a title lookup.
pub fn query_key(title: &str, year: Option<i32>) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    match year {
        Some(year) => format!("{title}|{year}"),
        None => title,
    }
}

fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}
