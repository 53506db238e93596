use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    backend::{
        Backend, Conflict, Lookup, Query, Table,
        query::{decode_lookup, decode_rows},
    },
    error::{AppError, AppResult},
    models::{Section, Trailer},
    poster,
};

const PLACEHOLDER_TITLES: &[&str] = &["unavailable", "unknown movie", "untitled movie"];

/// Titles written for rows that were never filled in with real metadata.
pub fn is_placeholder_title(title: &str) -> bool {
    let title = title.trim().to_lowercase();
    title.is_empty() || PLACEHOLDER_TITLES.contains(&title.as_str())
}

pub async fn get_trailer<B: Backend>(backend: &B, id: &str) -> AppResult<Option<Trailer>> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::invalid("trailer id is required"));
    }

    let rows = backend.select(&Query::from(Table::Trailers).eq("id", id)).await?;
    let trailer = match decode_lookup::<Trailer>(rows)? {
        Lookup::Absent => None,
        Lookup::Present(trailer) => Some(trailer),
        Lookup::Multiple(rows) => {
            warn!(trailer_id = %id, count = rows.len(), "duplicate trailer rows");
            rows.into_iter().next()
        },
    };
    Ok(trailer.map(poster::sanitize))
}

pub async fn trailers_in_section<B: Backend>(
    backend: &B,
    section: Section,
    limit: usize,
) -> AppResult<Vec<Trailer>> {
    let query = Query::from(Table::Trailers).eq("section", section.slug()).order("title", false).limit(limit);
    let rows = decode_rows::<Trailer>(backend.select(&query).await?)?;
    debug!(section = section.slug(), count = rows.len(), "loaded section");
    Ok(rows.into_iter().map(poster::sanitize).collect())
}

pub async fn all_trailers<B: Backend>(backend: &B, limit: usize) -> AppResult<Vec<Trailer>> {
    let query = Query::from(Table::Trailers).order("title", false).limit(limit);
    let rows = decode_rows::<Trailer>(backend.select(&query).await?)?;
    Ok(rows.into_iter().map(poster::sanitize).collect())
}

/// Trailers whose title contains `term`, ignoring case. A blank term matches
/// nothing.
pub async fn search_trailers<B: Backend>(backend: &B, term: &str, limit: usize) -> AppResult<Vec<Trailer>> {
    let term = term.split_whitespace().collect::<Vec<_>>().join(" ");
    if term.is_empty() {
        return Ok(Vec::new());
    }

    let query = Query::from(Table::Trailers).ilike("title", term.as_str()).order("title", false).limit(limit);
    let rows = decode_rows::<Trailer>(backend.select(&query).await?)?;
    debug!(term = %term, count = rows.len(), "searched trailers");
    Ok(rows
        .into_iter()
        .filter(|t| !is_placeholder_title(&t.title))
        .map(poster::sanitize)
        .collect())
}

/// Create the trailer's cache row from caller-supplied display data unless a
/// row with that id already exists. An existing row is never modified.
pub async fn ensure_trailer<B: Backend>(backend: &B, trailer: &Trailer) -> AppResult<()> {
    if trailer.id.trim().is_empty() {
        return Err(AppError::invalid("trailer id is required"));
    }

    let trailer = poster::sanitize(trailer.clone());
    let mut row = json!({
        "id": trailer.id,
        "title": trailer.title,
        "youtube_id": trailer.youtube_id,
        "category": trailer.category,
        "poster_url": trailer.poster_url,
    });
    if let (Some(section), Value::Object(obj)) = (&trailer.section, &mut row) {
        obj.insert("section".to_string(), Value::String(section.clone()));
    }

    let inserted = backend.insert(Table::Trailers, row, Conflict::Ignore).await?;
    debug!(trailer_id = %trailer.id, created = !inserted.is_empty(), "ensured trailer row");
    Ok(())
}

/// Trailers whose video reference was never filled in.
pub async fn trailers_missing_video<B: Backend>(backend: &B) -> AppResult<Vec<Trailer>> {
    let mut out = decode_rows::<Trailer>(
        backend.select(&Query::from(Table::Trailers).is_null("youtube_id")).await?,
    )?;
    out.extend(decode_rows::<Trailer>(
        backend.select(&Query::from(Table::Trailers).eq("youtube_id", "")).await?,
    )?);
    Ok(out)
}

pub async fn set_video<B: Backend>(backend: &B, trailer_id: &str, youtube_id: &str) -> AppResult<()> {
    let updated = backend
        .update(&Query::from(Table::Trailers).eq("id", trailer_id), json!({ "youtube_id": youtube_id }))
        .await?;
    if updated.is_empty() {
        return Err(AppError::NotFound(format!("trailer {trailer_id}")));
    }
    Ok(())
}
