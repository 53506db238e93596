use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};

/// Denormalized display record for a browsable title, owned by the backend's
/// `trailers` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trailer {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub youtube_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub poster_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Trailer {
    /// Stored references may be bare ids or full YouTube links.
    pub fn embed_url(&self) -> Option<String> {
        crate::youtube::extract_video_id(&self.youtube_id).map(|id| {
            format!("https://www.youtube.com/embed/{id}?autoplay=0&rel=0&modestbranding=1")
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Section {
    Popular,
    ComingSoon,
    NewRelease,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Popular, Section::ComingSoon, Section::NewRelease];

    pub fn slug(self) -> &'static str {
        match self {
            Section::Popular => "popular",
            Section::ComingSoon => "coming-soon",
            Section::NewRelease => "new-release",
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            Section::Popular => "Popular now",
            Section::ComingSoon => "Coming soon",
            Section::NewRelease => "New releases",
        }
    }
}

/// The join tables that follow the two-state toggle protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MembershipKind {
    Favorite,
    Watchlist,
    CommentLike,
}

impl MembershipKind {
    pub fn target_column(self) -> &'static str {
        match self {
            MembershipKind::Favorite | MembershipKind::Watchlist => "trailer_id",
            MembershipKind::CommentLike => "comment_id",
        }
    }

    /// Whether the target is a trailer whose cache row must exist first.
    pub fn targets_trailer(self) -> bool {
        matches!(self, MembershipKind::Favorite | MembershipKind::Watchlist)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Membership {
    Present,
    Absent,
}

impl Membership {
    pub fn is_present(self) -> bool {
        matches!(self, Membership::Present)
    }

    pub fn from_present(present: bool) -> Self {
        if present { Membership::Present } else { Membership::Absent }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MembershipRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub user_id: String,
    #[serde(alias = "trailer_id", alias = "comment_id", deserialize_with = "de_id")]
    pub target_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CommentRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub user_id: String,
    #[serde(deserialize_with = "de_id")]
    pub trailer_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    pub created_at: Timestamp,
}

/// A comment as shown to a particular viewer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub trailer_id: String,
    pub content: String,
    pub created_at: Timestamp,
    pub likes: u32,
    pub liked_by_viewer: bool,
    pub author_name: String,
}

impl Comment {
    pub fn from_row(row: CommentRow, likes: u32, liked_by_viewer: bool, author_name: String) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            trailer_id: row.trailer_id,
            content: row.content,
            created_at: row.created_at,
            likes,
            liked_by_viewer,
            author_name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_admin: bool,
}

impl Profile {
    pub fn display_name(&self) -> String {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        non_empty(&self.username)
            .or_else(|| non_empty(&self.email))
            .unwrap_or_else(|| synthesized_name(&self.id))
    }
}

/// Fallback display name for users without a resolvable profile.
pub fn synthesized_name(user_id: &str) -> String {
    let short: String = user_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
    if short.is_empty() { "user".to_string() } else { format!("user-{short}") }
}

/// The signed-in user issuing a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    pub is_admin: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub user_id: String,
    pub actor_id: String,
    #[serde(deserialize_with = "de_id")]
    pub comment_id: String,
    #[serde(deserialize_with = "de_id")]
    pub trailer_id: String,
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_false")]
    pub read: bool,
    pub created_at: Timestamp,
}

pub const NOTIFY_COMMENT_LIKE: &str = "comment_like";

/// Row ids come back as text or integers depending on the table's key type.
pub fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_ids_and_null_columns_are_tolerated() {
        let trailer: Trailer = serde_json::from_value(json!({
            "id": 42,
            "title": "Night Terrors",
            "youtube_id": null,
            "category": "Horror",
            "poster_url": null,
        }))
        .unwrap();

        assert_eq!(trailer.id, "42");
        assert_eq!(trailer.youtube_id, "");
        assert_eq!(trailer.poster_url, "");
        assert!(trailer.embed_url().is_none());
    }

    #[test]
    fn embed_url_accepts_watch_links() {
        let trailer: Trailer = serde_json::from_value(json!({
            "id": "7",
            "title": "Heat",
            "youtube_id": "https://www.youtube.com/watch?v=0xbBLJ1W6fU",
        }))
        .unwrap();

        assert_eq!(
            trailer.embed_url().as_deref(),
            Some("https://www.youtube.com/embed/0xbBLJ1W6fU?autoplay=0&rel=0&modestbranding=1")
        );
    }

    #[test]
    fn membership_rows_read_either_target_column() {
        let fav: MembershipRow =
            serde_json::from_value(json!({"id": 1, "user_id": "u", "trailer_id": "t-1"})).unwrap();
        let like: MembershipRow =
            serde_json::from_value(json!({"id": "x", "user_id": "u", "comment_id": 7})).unwrap();

        assert_eq!(fav.target_id, "t-1");
        assert_eq!(like.target_id, "7");
    }

    #[test]
    fn display_name_prefers_username_then_email() {
        let mut profile = Profile {
            id: "8f2c1d9e-0000".to_string(),
            username: Some("  ".to_string()),
            email: Some("reina@example.com".to_string()),
            is_admin: false,
        };
        assert_eq!(profile.display_name(), "reina@example.com");

        profile.email = None;
        assert_eq!(profile.display_name(), "user-8f2c1d9e");

        profile.username = Some("reina".to_string());
        assert_eq!(profile.display_name(), "reina");
    }
}
