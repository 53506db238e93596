//! In-process stand-in for the hosted backend with the same table semantics,
//! plus failure injection and call counting.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use jiff::Timestamp;
use serde_json::{Map, Value};

use super::{
    Backend,
    query::{Conflict, Filter, Query, Table},
};
use crate::error::{AppError, AppResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<Map<String, Value>>>,
    next_id: u64,
    last_timestamp: Option<Timestamp>,
    failures: HashSet<(Op, Table)>,
    fail_uploads: bool,
    calls: usize,
    uploads: Vec<(String, String, usize)>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, without counting calls or checking failures.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state.lock().unwrap();
        for row in rows {
            if let Value::Object(obj) = row {
                let obj = state.with_defaults(table, obj);
                state.tables.entry(table).or_default().push(obj);
            }
        }
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Make every `op` against `table` fail until [`Self::clear_failures`].
    pub fn fail(&self, op: Op, table: Table) {
        self.state.lock().unwrap().failures.insert((op, table));
    }

    pub fn fail_uploads(&self) {
        self.state.lock().unwrap().fail_uploads = true;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures.clear();
        state.fail_uploads = false;
    }

    /// Number of backend calls issued so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.state.lock().unwrap().uploads.clone()
    }

    fn begin(&self, op: Op, table: Table) -> AppResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.failures.contains(&(op, table)) {
            return Err(AppError::backend(
                Some(503),
                format!("injected {op:?} failure on {}", table.as_str()),
            ));
        }
        Ok(state)
    }
}

impl State {
    fn tick(&mut self) -> Timestamp {
        let mut now = Timestamp::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last.checked_add(jiff::Span::new().nanoseconds(1)).unwrap_or(last);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn with_defaults(&mut self, table: Table, mut row: Map<String, Value>) -> Map<String, Value> {
        if !row.contains_key("id") {
            self.next_id += 1;
            row.insert("id".to_string(), Value::String(self.next_id.to_string()));
        }
        if table != Table::Trailers && table != Table::Profiles && !row.contains_key("created_at") {
            let ts = self.tick();
            row.insert("created_at".to_string(), Value::String(ts.to_string()));
        }
        if table == Table::Notifications && !row.contains_key("read") {
            row.insert("read".to_string(), Value::Bool(false));
        }
        row
    }
}

impl Backend for MemoryBackend {
    async fn select(&self, query: &Query) -> AppResult<Vec<Value>> {
        let state = self.begin(Op::Select, query.table)?;
        let mut rows: Vec<Map<String, Value>> = state
            .tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|row| matches_all(row, &query.filters)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_opt(a.get(order.column), b.get(order.column));
                if order.descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    async fn insert(&self, table: Table, row: Value, conflict: Conflict) -> AppResult<Vec<Value>> {
        let mut state = self.begin(Op::Insert, table)?;
        let Value::Object(row) = row else {
            return Err(AppError::backend(Some(400), "row must be a JSON object"));
        };

        let key = table.unique_key();
        let rows = state.tables.entry(table).or_default();
        let existing = rows.iter().position(|stored| {
            key.iter().all(|col| match (stored.get(*col), row.get(*col)) {
                (Some(a), Some(b)) => loosely_eq(a, b),
                _ => false,
            })
        });

        if let Some(index) = existing {
            return match conflict {
                Conflict::Error => Err(AppError::backend(
                    Some(409),
                    format!("duplicate key value violates unique constraint \"{}_key\"", table.as_str()),
                )),
                Conflict::Ignore => Ok(Vec::new()),
                Conflict::Merge => {
                    let stored = &mut rows[index];
                    for (k, v) in row {
                        stored.insert(k, v);
                    }
                    Ok(vec![Value::Object(stored.clone())])
                },
            };
        }

        let row = state.with_defaults(table, row);
        state.tables.entry(table).or_default().push(row.clone());
        Ok(vec![Value::Object(row)])
    }

    async fn update(&self, query: &Query, patch: Value) -> AppResult<Vec<Value>> {
        let mut state = self.begin(Op::Update, query.table)?;
        let Value::Object(patch) = patch else {
            return Err(AppError::backend(Some(400), "patch must be a JSON object"));
        };

        let mut updated = Vec::new();
        for row in state.tables.entry(query.table).or_default().iter_mut() {
            if matches_all(row, &query.filters) {
                for (k, v) in &patch {
                    row.insert(k.clone(), v.clone());
                }
                updated.push(Value::Object(row.clone()));
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> AppResult<Vec<Value>> {
        let mut state = self.begin(Op::Delete, query.table)?;
        let rows = state.tables.entry(query.table).or_default();
        let (removed, kept): (Vec<_>, Vec<_>) =
            rows.drain(..).partition(|row| matches_all(row, &query.filters));
        *rows = kept;
        Ok(removed.into_iter().map(Value::Object).collect())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> AppResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail_uploads {
            return Err(AppError::backend(Some(503), "injected upload failure"));
        }
        state.uploads.push((bucket.to_string(), path.to_string(), bytes.len()));
        Ok(format!("https://storage.test/{bucket}/{path}"))
    }
}

fn matches_all(row: &Map<String, Value>, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches(row, filter))
}

fn matches(row: &Map<String, Value>, filter: &Filter) -> bool {
    let cell = row.get(filter.column());
    match filter {
        Filter::Eq(_, v) => cell.is_some_and(|c| loosely_eq(c, v)),
        Filter::In(_, values) => cell.is_some_and(|c| values.iter().any(|v| loosely_eq(c, v))),
        Filter::Gte(_, v) => cell.is_some_and(|c| compare(c, v) != Ordering::Less),
        Filter::Lte(_, v) => cell.is_some_and(|c| compare(c, v) != Ordering::Greater),
        Filter::IsNull(_) => cell.is_none_or(Value::is_null),
        Filter::NotNull(_) => cell.is_some_and(|c| !c.is_null()),
        Filter::ILike(_, needle) => {
            cell.is_some_and(|c| text(c).to_lowercase().contains(&needle.to_lowercase()))
        },
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Filter values are compared by their textual form, as the REST API does.
fn loosely_eq(a: &Value, b: &Value) -> bool {
    text(a) == text(b)
}

fn compare(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let (a, b) = (text(a), text(b));
    match (a.parse::<Timestamp>(), b.parse::<Timestamp>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(&b),
    }
}

fn compare_opt(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare(a, b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn unique_key_conflicts_follow_policy() {
        let backend = MemoryBackend::new();
        let row = json!({"user_id": "u", "trailer_id": "t"});

        backend.insert(Table::Favorites, row.clone(), Conflict::Error).await.unwrap();
        assert_matches!(
            backend.insert(Table::Favorites, row.clone(), Conflict::Error).await,
            Err(AppError::Backend { status: Some(409), .. })
        );
        assert!(backend.insert(Table::Favorites, row, Conflict::Ignore).await.unwrap().is_empty());
        assert_eq!(backend.rows(Table::Favorites).len(), 1);
    }

    #[tokio::test]
    async fn merge_overwrites_existing_columns() {
        let backend = MemoryBackend::new();
        backend.seed(Table::Profiles, [json!({"id": "u", "username": "old"})]);

        backend
            .insert(Table::Profiles, json!({"id": "u", "username": "new"}), Conflict::Merge)
            .await
            .unwrap();

        let rows = backend.rows(Table::Profiles);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "new");
    }

    #[tokio::test]
    async fn select_orders_by_timestamp_and_limits() {
        let backend = MemoryBackend::new();
        for content in ["first", "second", "third"] {
            backend
                .insert(Table::Comments, json!({"trailer_id": "t", "user_id": "u", "content": content}), Conflict::Error)
                .await
                .unwrap();
        }

        let rows = backend
            .select(&Query::from(Table::Comments).eq("trailer_id", "t").order("created_at", true).limit(2))
            .await
            .unwrap();

        let contents: Vec<&str> = rows.iter().map(|r| r["content"].as_str().unwrap()).collect();
        assert_eq!(contents, ["third", "second"]);
    }

    #[tokio::test]
    async fn injected_failures_still_count_as_calls() {
        let backend = MemoryBackend::new();
        backend.fail(Op::Select, Table::Watchlist);

        assert!(backend.select(&Query::from(Table::Watchlist)).await.is_err());
        assert_eq!(backend.calls(), 1);

        backend.clear_failures();
        assert!(backend.select(&Query::from(Table::Watchlist)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn range_and_null_filters() {
        let backend = MemoryBackend::new();
        backend.seed(
            Table::Trailers,
            [
                json!({"id": "1", "year": 1979, "youtube_id": null}),
                json!({"id": "2", "year": 1986, "youtube_id": "x"}),
                json!({"id": "3", "year": 2024}),
            ],
        );
        let ids = |rows: Vec<Value>| -> Vec<String> {
            rows.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect()
        };

        let eighties = Query::from(Table::Trailers).gte("year", 1980).lte("year", 1989);
        assert_eq!(ids(backend.select(&eighties).await.unwrap()), ["2"]);

        let with_video = Query::from(Table::Trailers).not_null("youtube_id");
        assert_eq!(ids(backend.select(&with_video).await.unwrap()), ["2"]);

        let without_video = Query::from(Table::Trailers).is_null("youtube_id");
        assert_eq!(ids(backend.select(&without_video).await.unwrap()), ["1", "3"]);
    }

    #[tokio::test]
    async fn ilike_matches_substrings_ignoring_case() {
        let backend = MemoryBackend::new();
        backend.seed(
            Table::Trailers,
            [json!({"id": "1", "title": "Dune: Part Two"}), json!({"id": "2", "title": "Heat"})],
        );

        let rows = backend.select(&Query::from(Table::Trailers).ilike("title", "PART")).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "1");
    }

    #[tokio::test]
    async fn numeric_and_text_values_compare_textually() {
        let backend = MemoryBackend::new();
        backend.seed(Table::CommentLikes, [json!({"user_id": "u", "comment_id": 7})]);

        let rows = backend
            .select(&Query::from(Table::CommentLikes).is_in("comment_id", ["7", "8"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
