use std::collections::HashMap;

use serde_json::json;
use tracing::warn;

use crate::{
    backend::{Backend, Conflict, Query, Table, query::decode_lookup, query::decode_rows},
    error::{AppError, AppResult},
    models::{Profile, Requester, synthesized_name},
};

const MAX_USERNAME_CHARS: usize = 40;

pub async fn profile<B: Backend>(backend: &B, user_id: &str) -> AppResult<Option<Profile>> {
    let rows = backend.select(&Query::from(Table::Profiles).eq("id", user_id)).await?;
    Ok(decode_lookup::<Profile>(rows)?.first())
}

/// The user's profile, or a synthesized one when it is missing or cannot be
/// read.
pub async fn profile_or_default<B: Backend>(
    backend: &B,
    user_id: &str,
    email: Option<&str>,
) -> Profile {
    let fallback = || Profile {
        id: user_id.to_string(),
        username: None,
        email: email.map(str::to_string),
        is_admin: false,
    };

    match profile(backend, user_id).await {
        Ok(Some(mut profile)) => {
            if profile.email.is_none() {
                profile.email = email.map(str::to_string);
            }
            profile
        },
        Ok(None) => fallback(),
        Err(err) => {
            warn!(user_id, error = %err, "failed to load profile");
            fallback()
        },
    }
}

/// Identity and role of the signed-in user. A profile that cannot be read
/// grants no admin rights.
pub async fn requester<B: Backend>(backend: &B, user_id: &str) -> Requester {
    let is_admin = match profile(backend, user_id).await {
        Ok(profile) => profile.is_some_and(|p| p.is_admin),
        Err(err) => {
            warn!(user_id, error = %err, "failed to load role, treating as non-admin");
            false
        },
    };
    Requester { id: user_id.to_string(), is_admin }
}

/// Display names for the given users. Users whose profile is missing, or all
/// of them when the lookup fails, get a synthesized name.
pub async fn display_names<B: Backend>(backend: &B, user_ids: &[String]) -> HashMap<String, String> {
    let mut names: HashMap<String, String> =
        user_ids.iter().map(|id| (id.clone(), synthesized_name(id))).collect();
    if names.is_empty() {
        return names;
    }

    let ids: Vec<String> = names.keys().cloned().collect();
    let query = Query::from(Table::Profiles).is_in("id", ids);
    match backend.select(&query).await.and_then(decode_rows::<Profile>) {
        Ok(profiles) => {
            for profile in profiles {
                names.insert(profile.id.clone(), profile.display_name());
            }
        },
        Err(err) => warn!(count = names.len(), error = %err, "failed to load author names"),
    }
    names
}

pub async fn update_username<B: Backend>(
    backend: &B,
    user_id: &str,
    email: Option<&str>,
    username: &str,
) -> AppResult<Profile> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::invalid("username cannot be empty"));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(AppError::invalid(format!("username is limited to {MAX_USERNAME_CHARS} characters")));
    }

    let mut row = json!({ "id": user_id, "username": username });
    if let (Some(email), Some(obj)) = (email, row.as_object_mut()) {
        obj.insert("email".to_string(), json!(email));
    }

    let stored = backend.insert(Table::Profiles, row, Conflict::Merge).await?;
    match decode_lookup::<Profile>(stored)?.first() {
        Some(profile) => Ok(profile),
        None => Err(AppError::backend(None, "profile update returned no row")),
    }
}
