use serde_json::json;
use tracing::debug;

use crate::{
    backend::{Backend, Conflict, Query, Table, query::decode_rows},
    error::AppResult,
    models::{NOTIFY_COMMENT_LIKE, Notification},
};

pub async fn notify_comment_like<B: Backend>(
    backend: &B,
    recipient_id: &str,
    actor_id: &str,
    comment_id: &str,
    trailer_id: &str,
) -> AppResult<()> {
    let row = json!({
        "user_id": recipient_id,
        "actor_id": actor_id,
        "comment_id": comment_id,
        "trailer_id": trailer_id,
        "kind": NOTIFY_COMMENT_LIKE,
        "read": false,
    });
    backend.insert(Table::Notifications, row, Conflict::Error).await?;
    debug!(recipient_id, actor_id, comment_id, "comment like notification sent");
    Ok(())
}

/// Newest first.
pub async fn notifications_for<B: Backend>(
    backend: &B,
    user_id: &str,
    limit: usize,
) -> AppResult<Vec<Notification>> {
    let query = Query::from(Table::Notifications)
        .eq("user_id", user_id)
        .order("created_at", true)
        .limit(limit);
    decode_rows(backend.select(&query).await?)
}

/// Returns how many notifications changed.
pub async fn mark_all_read<B: Backend>(backend: &B, user_id: &str) -> AppResult<usize> {
    let query = Query::from(Table::Notifications).eq("user_id", user_id).eq("read", false);
    let updated = backend.update(&query, json!({ "read": true })).await?;
    Ok(updated.len())
}
