use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppResult;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Table {
    Trailers,
    Favorites,
    Watchlist,
    Comments,
    CommentLikes,
    Profiles,
    Notifications,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Trailers => "trailers",
            Table::Favorites => "favorites",
            Table::Watchlist => "watchlist",
            Table::Comments => "comments",
            Table::CommentLikes => "comment_likes",
            Table::Profiles => "profiles",
            Table::Notifications => "notifications",
        }
    }

    /// Columns forming the table's unique key, used for conflict handling.
    pub fn unique_key(self) -> &'static [&'static str] {
        match self {
            Table::Favorites | Table::Watchlist => &["user_id", "trailer_id"],
            Table::CommentLikes => &["user_id", "comment_id"],
            Table::Trailers
            | Table::Comments
            | Table::Profiles
            | Table::Notifications => &["id"],
        }
    }
}

impl From<crate::models::MembershipKind> for Table {
    fn from(kind: crate::models::MembershipKind) -> Self {
        match kind {
            crate::models::MembershipKind::Favorite => Table::Favorites,
            crate::models::MembershipKind::Watchlist => Table::Watchlist,
            crate::models::MembershipKind::CommentLike => Table::CommentLikes,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
    Gte(&'static str, Value),
    Lte(&'static str, Value),
    IsNull(&'static str),
    NotNull(&'static str),
    /// Case-insensitive substring match.
    ILike(&'static str, String),
}

impl Filter {
    pub fn column(&self) -> &'static str {
        match self {
            Filter::Eq(c, _)
            | Filter::In(c, _)
            | Filter::Gte(c, _)
            | Filter::Lte(c, _)
            | Filter::IsNull(c)
            | Filter::NotNull(c)
            | Filter::ILike(c, _) => c,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self { table, filters: Vec::new(), order: None, limit: None }
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column, value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(column, values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn gte(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column, value.into()));
        self
    }

    pub fn lte(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column, value.into()));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.filters.push(Filter::IsNull(column));
        self
    }

    pub fn not_null(mut self, column: &'static str) -> Self {
        self.filters.push(Filter::NotNull(column));
        self
    }

    pub fn ilike(mut self, column: &'static str, needle: impl Into<String>) -> Self {
        self.filters.push(Filter::ILike(column, needle.into()));
        self
    }

    pub fn order(mut self, column: &'static str, descending: bool) -> Self {
        self.order = Some(Order { column, descending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What to do when an inserted row collides with the table's unique key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Conflict {
    Error,
    /// Keep the existing row untouched.
    Ignore,
    /// Upsert: overwrite the existing row's columns.
    Merge,
}

/// Result of a query expected to match at most one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    Absent,
    Present(T),
    Multiple(Vec<T>),
}

impl<T> Lookup<T> {
    pub fn from_rows(mut rows: Vec<T>) -> Self {
        match rows.len() {
            0 => Lookup::Absent,
            1 => Lookup::Present(rows.remove(0)),
            _ => Lookup::Multiple(rows),
        }
    }

    /// First matching row, if any.
    pub fn first(self) -> Option<T> {
        match self {
            Lookup::Absent => None,
            Lookup::Present(row) => Some(row),
            Lookup::Multiple(rows) => rows.into_iter().next(),
        }
    }
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter().map(|row| serde_json::from_value(row).map_err(Into::into)).collect()
}

pub fn decode_lookup<T: DeserializeOwned>(rows: Vec<Value>) -> AppResult<Lookup<T>> {
    decode_rows(rows).map(Lookup::from_rows)
}
