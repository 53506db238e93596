//! Facade over the hosted backend: managed tables, object storage.
//!
//! Every data-access function takes an explicit `&impl Backend`; the
//! production instance is built once in `main` and scoped per request to the
//! signed-in user's token (see [`rest::RestBackend::as_user`]).

use std::future::Future;

use serde_json::Value;

use crate::error::AppResult;

#[cfg(test)]
pub mod memory;
pub mod query;
pub mod rest;

pub use query::{Conflict, Lookup, Query, Table};

/// Table CRUD with filter predicates plus object upload.
///
/// Rows travel as JSON objects; callers decode them into typed rows with
/// [`query::decode_rows`] / [`query::decode_lookup`].
pub trait Backend: Send + Sync {
    /// Rows matching every filter of `query`.
    fn select(&self, query: &Query) -> impl Future<Output = AppResult<Vec<Value>>> + Send;

    /// Insert one row. Returns the stored row, or nothing when the row was
    /// skipped under [`Conflict::Ignore`].
    fn insert(
        &self,
        table: Table,
        row: Value,
        conflict: Conflict,
    ) -> impl Future<Output = AppResult<Vec<Value>>> + Send;

    /// Merge `patch` into every matching row and return the updated rows.
    fn update(&self, query: &Query, patch: Value)
    -> impl Future<Output = AppResult<Vec<Value>>> + Send;

    /// Delete every matching row and return the removed rows.
    fn delete(&self, query: &Query) -> impl Future<Output = AppResult<Vec<Value>>> + Send;

    /// Store an object and return its public URL.
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = AppResult<String>> + Send;
}
