use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{debug, warn};

use super::{memberships::toggle_comment_like, notifications, profiles::display_names, trailers::ensure_trailer};
use crate::{
    backend::{Backend, Conflict, Lookup, Query, Table, query::decode_lookup, query::decode_rows},
    error::{AppError, AppResult},
    models::{Comment, CommentRow, Membership, MembershipRow, Requester, Trailer},
};

pub const MAX_COMMENT_CHARS: usize = 2000;

/// Edit and delete are reserved to an author who is also an administrator.
pub fn can_mutate_comment(requester: &Requester, author_id: &str) -> bool {
    requester.id == author_id && requester.is_admin
}

fn clean_content(content: &str) -> AppResult<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::invalid("comment cannot be empty"));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::invalid(format!("comments are limited to {MAX_COMMENT_CHARS} characters")));
    }
    Ok(content)
}

pub async fn get_comment<B: Backend>(backend: &B, comment_id: &str) -> AppResult<Option<CommentRow>> {
    if comment_id.trim().is_empty() {
        return Err(AppError::invalid("comment id is required"));
    }
    let rows = backend.select(&Query::from(Table::Comments).eq("id", comment_id.trim())).await?;
    Ok(match decode_lookup::<CommentRow>(rows)? {
        Lookup::Multiple(rows) => {
            warn!(comment_id, count = rows.len(), "duplicate comment rows");
            rows.into_iter().next()
        },
        lookup => lookup.first(),
    })
}

async fn require_comment<B: Backend>(backend: &B, comment_id: &str) -> AppResult<CommentRow> {
    get_comment(backend, comment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("comment {comment_id}")))
}

/// Comments on a trailer, newest first, with like counts and author names.
pub async fn list_comments<B: Backend>(
    backend: &B,
    trailer_id: &str,
    viewer_id: Option<&str>,
) -> AppResult<Vec<Comment>> {
    let query = Query::from(Table::Comments).eq("trailer_id", trailer_id).order("created_at", true);
    let rows = decode_rows::<CommentRow>(backend.select(&query).await?)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = rows.iter().map(|c| c.id.clone()).collect();
    let likes = decode_rows::<MembershipRow>(
        backend.select(&Query::from(Table::CommentLikes).is_in("comment_id", ids)).await?,
    )?;

    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut liked: HashSet<&str> = HashSet::new();
    for like in &likes {
        *counts.entry(like.target_id.as_str()).or_default() += 1;
        if viewer_id == Some(like.user_id.as_str()) {
            liked.insert(like.target_id.as_str());
        }
    }

    let mut authors: Vec<String> = rows.iter().map(|c| c.user_id.clone()).collect();
    authors.sort();
    authors.dedup();
    let names = display_names(backend, &authors).await;

    Ok(rows
        .into_iter()
        .map(|row| {
            let likes = counts.get(row.id.as_str()).copied().unwrap_or(0);
            let liked_by_viewer = liked.contains(row.id.as_str());
            let author = names.get(&row.user_id).cloned().unwrap_or_default();
            Comment::from_row(row, likes, liked_by_viewer, author)
        })
        .collect())
}

pub async fn add_comment<B: Backend>(
    backend: &B,
    user_id: &str,
    trailer: &Trailer,
    content: &str,
) -> AppResult<CommentRow> {
    if user_id.trim().is_empty() {
        return Err(AppError::invalid("user id is required"));
    }
    let content = clean_content(content)?;

    ensure_trailer(backend, trailer).await?;
    let row = json!({ "user_id": user_id, "trailer_id": trailer.id, "content": content });
    let stored = backend.insert(Table::Comments, row, Conflict::Error).await?;
    debug!(user_id, trailer_id = %trailer.id, "comment added");

    decode_lookup::<CommentRow>(stored)?
        .first()
        .ok_or_else(|| AppError::backend(None, "comment insert returned no row"))
}

pub async fn edit_comment<B: Backend>(
    backend: &B,
    requester: &Requester,
    comment_id: &str,
    content: &str,
) -> AppResult<CommentRow> {
    let content = clean_content(content)?;
    let comment = require_comment(backend, comment_id).await?;
    if !can_mutate_comment(requester, &comment.user_id) {
        return Err(AppError::forbidden("you cannot edit this comment"));
    }

    let updated = backend
        .update(&Query::from(Table::Comments).eq("id", comment.id.as_str()), json!({ "content": content }))
        .await?;
    decode_lookup::<CommentRow>(updated)?
        .first()
        .ok_or_else(|| AppError::NotFound(format!("comment {comment_id}")))
}

pub async fn delete_comment<B: Backend>(
    backend: &B,
    requester: &Requester,
    comment_id: &str,
) -> AppResult<()> {
    let comment = require_comment(backend, comment_id).await?;
    if !can_mutate_comment(requester, &comment.user_id) {
        return Err(AppError::forbidden("you cannot delete this comment"));
    }

    backend.delete(&Query::from(Table::Comments).eq("id", comment.id.as_str())).await?;
    debug!(comment_id, "comment deleted");
    Ok(())
}

/// Toggle the user's like on a comment. A new like on someone else's comment
/// notifies its author; that notification is best effort.
pub async fn like_comment<B: Backend>(backend: &B, user_id: &str, comment_id: &str) -> AppResult<Membership> {
    if user_id.trim().is_empty() {
        return Err(AppError::invalid("user id is required"));
    }
    let comment = require_comment(backend, comment_id).await?;
    let state = toggle_comment_like(backend, user_id, &comment.id).await?;

    if state.is_present() && comment.user_id != user_id {
        if let Err(err) = notifications::notify_comment_like(
            backend,
            &comment.user_id,
            user_id,
            &comment.id,
            &comment.trailer_id,
        )
        .await
        {
            warn!(comment_id = %comment.id, error = %err, "failed to send like notification");
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::{
        backend::memory::{MemoryBackend, Op},
        data::fixtures::draft,
    };

    fn admin(id: &str) -> Requester {
        Requester { id: id.to_string(), is_admin: true }
    }

    fn member(id: &str) -> Requester {
        Requester { id: id.to_string(), is_admin: false }
    }

    async fn seeded() -> (MemoryBackend, CommentRow) {
        let backend = MemoryBackend::new();
        let comment = add_comment(&backend, "author", &draft("t1", "Heat"), "  great pacing ").await.unwrap();
        (backend, comment)
    }

    #[test]
    fn only_admin_authors_may_mutate() {
        assert!(can_mutate_comment(&admin("a"), "a"));
        assert!(!can_mutate_comment(&member("a"), "a"));
        assert!(!can_mutate_comment(&admin("b"), "a"));
    }

    #[tokio::test]
    async fn add_trims_and_ensures_trailer() {
        let (backend, comment) = seeded().await;

        assert_eq!(comment.content, "great pacing");
        assert_eq!(backend.rows(Table::Trailers).len(), 1);
        assert_matches!(
            add_comment(&backend, "author", &draft("t1", "Heat"), "   ").await,
            Err(AppError::InvalidArgument(_))
        );
    }

    #[tokio::test]
    async fn non_owner_edit_and_delete_leave_content_unchanged() {
        let (backend, comment) = seeded().await;

        assert_matches!(
            edit_comment(&backend, &admin("intruder"), &comment.id, "defaced").await,
            Err(AppError::Forbidden(_))
        );
        assert_matches!(
            edit_comment(&backend, &member("author"), &comment.id, "defaced").await,
            Err(AppError::Forbidden(_))
        );
        assert_matches!(
            delete_comment(&backend, &admin("intruder"), &comment.id).await,
            Err(AppError::Forbidden(_))
        );

        let stored = get_comment(&backend, &comment.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "great pacing");
    }

    #[tokio::test]
    async fn admin_author_edits_and_deletes() {
        let (backend, comment) = seeded().await;

        let edited = edit_comment(&backend, &admin("author"), &comment.id, " tighter ").await.unwrap();
        assert_eq!(edited.content, "tighter");

        delete_comment(&backend, &admin("author"), &comment.id).await.unwrap();
        assert!(get_comment(&backend, &comment.id).await.unwrap().is_none());
        assert_matches!(
            delete_comment(&backend, &admin("author"), &comment.id).await,
            Err(AppError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn listing_counts_likes_and_names_authors() {
        let (backend, first) = seeded().await;
        backend.seed(Table::Profiles, [json!({"id": "author", "username": "critic"})]);
        let second = add_comment(&backend, "fan", &draft("t1", "Heat"), "agreed").await.unwrap();
        like_comment(&backend, "fan", &first.id).await.unwrap();
        like_comment(&backend, "viewer", &first.id).await.unwrap();

        let comments = list_comments(&backend, "t1", Some("viewer")).await.unwrap();

        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, second.id);
        assert_eq!(comments[0].author_name, "user-fan");
        assert_eq!(comments[1].likes, 2);
        assert!(comments[1].liked_by_viewer);
        assert_eq!(comments[1].author_name, "critic");
        assert!(!comments[0].liked_by_viewer);
    }

    #[tokio::test]
    async fn liking_someone_elses_comment_notifies_once() {
        let (backend, comment) = seeded().await;

        assert_eq!(like_comment(&backend, "fan", &comment.id).await.unwrap(), Membership::Present);
        assert_eq!(like_comment(&backend, "fan", &comment.id).await.unwrap(), Membership::Absent);
        like_comment(&backend, "author", &comment.id).await.unwrap();

        let notes = backend.rows(Table::Notifications);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["user_id"], "author");
        assert_eq!(notes[0]["actor_id"], "fan");
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_like() {
        let (backend, comment) = seeded().await;
        backend.fail(Op::Insert, Table::Notifications);

        assert_eq!(like_comment(&backend, "fan", &comment.id).await.unwrap(), Membership::Present);
        assert_eq!(backend.rows(Table::CommentLikes).len(), 1);
    }
}
