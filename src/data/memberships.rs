//! Favorites, watchlist and comment likes: one two-state toggle protocol over
//! per-user join tables, plus resolution of a user's list into trailers.

use futures::{StreamExt, stream};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::trailers::{ensure_trailer, get_trailer, is_placeholder_title};
use crate::{
    backend::{Backend, Conflict, Lookup, Query, Table, query::decode_lookup, query::decode_rows},
    error::{AppError, AppResult},
    models::{Membership, MembershipKind, MembershipRow, Trailer},
};

/// The per-user trailer lists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrailerList {
    Favorites,
    Watchlist,
}

impl TrailerList {
    pub fn kind(self) -> MembershipKind {
        match self {
            TrailerList::Favorites => MembershipKind::Favorite,
            TrailerList::Watchlist => MembershipKind::Watchlist,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrailerList::Favorites => "Favorites",
            TrailerList::Watchlist => "Watchlist",
        }
    }
}

fn membership_query(kind: MembershipKind, user_id: &str, target_id: &str) -> Query {
    Query::from(Table::from(kind))
        .eq("user_id", user_id)
        .eq(kind.target_column(), target_id)
}

/// Flip the (user, target) membership and return the new state.
///
/// `trailer` carries the display data used to create the trailer's cache row
/// before a favorite/watchlist row is first inserted.
pub async fn toggle<B: Backend>(
    backend: &B,
    kind: MembershipKind,
    user_id: &str,
    target_id: &str,
    trailer: Option<&Trailer>,
) -> AppResult<Membership> {
    let (user_id, target_id) = (user_id.trim(), target_id.trim());
    if user_id.is_empty() {
        return Err(AppError::invalid("user id is required"));
    }
    if target_id.is_empty() {
        return Err(AppError::invalid(format!("{} is required", kind.target_column())));
    }
    if kind.targets_trailer() && trailer.is_none() {
        return Err(AppError::invalid("trailer details are required"));
    }

    let rows = backend.select(&membership_query(kind, user_id, target_id)).await?;
    match decode_lookup::<MembershipRow>(rows)? {
        Lookup::Present(row) => {
            backend.delete(&Query::from(Table::from(kind)).eq("id", row.id)).await?;
            debug!(?kind, user_id, target_id, "membership removed");
            Ok(Membership::Absent)
        },
        Lookup::Multiple(rows) => {
            warn!(?kind, user_id, target_id, count = rows.len(), "duplicate membership rows, removing all");
            let ids: Vec<String> = rows.into_iter().map(|row| row.id).collect();
            backend.delete(&Query::from(Table::from(kind)).is_in("id", ids)).await?;
            Ok(Membership::Absent)
        },
        Lookup::Absent => {
            if let Some(trailer) = trailer.filter(|_| kind.targets_trailer()) {
                ensure_trailer(backend, trailer).await?;
            }

            let mut row = Map::new();
            row.insert("user_id".to_string(), Value::String(user_id.to_string()));
            row.insert(kind.target_column().to_string(), Value::String(target_id.to_string()));
            backend.insert(Table::from(kind), Value::Object(row), Conflict::Error).await?;
            debug!(?kind, user_id, target_id, "membership added");
            Ok(Membership::Present)
        },
    }
}

pub async fn toggle_favorite<B: Backend>(
    backend: &B,
    user_id: &str,
    trailer: &Trailer,
) -> AppResult<Membership> {
    toggle(backend, MembershipKind::Favorite, user_id, &trailer.id, Some(trailer)).await
}

pub async fn toggle_watchlist<B: Backend>(
    backend: &B,
    user_id: &str,
    trailer: &Trailer,
) -> AppResult<Membership> {
    toggle(backend, MembershipKind::Watchlist, user_id, &trailer.id, Some(trailer)).await
}

pub async fn toggle_comment_like<B: Backend>(
    backend: &B,
    user_id: &str,
    comment_id: &str,
) -> AppResult<Membership> {
    toggle(backend, MembershipKind::CommentLike, user_id, comment_id, None).await
}

pub async fn is_member<B: Backend>(
    backend: &B,
    kind: MembershipKind,
    user_id: &str,
    target_id: &str,
) -> AppResult<bool> {
    if user_id.trim().is_empty() || target_id.trim().is_empty() {
        return Ok(false);
    }
    let rows = backend.select(&membership_query(kind, user_id.trim(), target_id.trim())).await?;
    Ok(!rows.is_empty())
}

/// Resolve a user's list into displayable trailers.
///
/// Never fails: a failed join-row query yields an empty list, and targets
/// that cannot be resolved or carry a placeholder title are left out.
pub async fn fetch_memberships<B: Backend>(
    backend: &B,
    list: TrailerList,
    user_id: &str,
    max_concurrent: usize,
) -> Vec<Trailer> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Vec::new();
    }

    let kind = list.kind();
    let query = Query::from(Table::from(kind))
        .eq("user_id", user_id)
        .not_null(kind.target_column())
        .order("created_at", true);
    let rows = match backend.select(&query).await.and_then(decode_rows::<MembershipRow>) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(list = list.label(), user_id, error = %err, "failed to load list");
            return Vec::new();
        },
    };

    debug!(list = list.label(), user_id, rows = rows.len(), "resolving list");

    let resolved: Vec<Option<Trailer>> = stream::iter(rows)
        .map(|row| async move {
            match get_trailer(backend, &row.target_id).await {
                Ok(Some(trailer)) if !is_placeholder_title(&trailer.title) => Some(trailer),
                Ok(Some(_)) => {
                    debug!(trailer_id = %row.target_id, "skipping placeholder trailer");
                    None
                },
                Ok(None) => {
                    debug!(trailer_id = %row.target_id, "list entry without trailer row");
                    None
                },
                Err(err) => {
                    warn!(trailer_id = %row.target_id, error = %err, "failed to resolve list entry");
                    None
                },
            }
        })
        .buffered(max_concurrent.max(1))
        .collect()
        .await;

    resolved.into_iter().flatten().collect()
}
