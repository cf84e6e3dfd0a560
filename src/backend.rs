//! The seams between the app and the hosted backend. \
//! [`crate::supabase::SupabaseClient`] implements all of them over HTTP.

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::query::{Filter, Query};
use crate::session::{AuthUser, Session};

/// Generic access to the backend's tables
#[cfg_attr(test, mockall::automock)]
pub trait DataClient: Send + Sync {

    /// Reads the rows matched by `query`
    fn select(&self, query: &Query) -> anyhow::Result<Vec<Value>>;

    /// Inserts `rows` (a JSON array) into `table` and returns the inserted rows
    fn insert(&self, table: &str, rows: Value) -> anyhow::Result<Vec<Value>>;

    /// Applies `patch` to every row of `table` matched by `filters`
    fn update(&self, table: &str, filters: &[Filter], patch: Value) -> anyhow::Result<()>;

}

/// Options for [`ObjectStorage::upload()`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub content_type: String,
    /// Max age, in seconds, the object may be cached for
    pub cache_control: u32,
    /// Overwrite an existing object under the same key
    pub upsert: bool,
}

/// Blob storage organised in buckets
#[cfg_attr(test, mockall::automock)]
pub trait ObjectStorage: Send + Sync {

    /// Stores `bytes` under `key` in `bucket`. Returns the full key of the stored object.
    fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>, options: &UploadOptions) -> anyhow::Result<String>;

    /// The url under which an object of a public bucket can be fetched
    fn public_url(&self, bucket: &str, key: &str) -> String;

}

/// The hosted identity provider
#[cfg_attr(test, mockall::automock)]
pub trait AuthProvider: Send + Sync {

    fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Session>;

    /// Registers a new account. \
    /// Returns no session, if the account still has to confirm its e-mail address.
    fn sign_up(&self, email: &str, password: &str) -> anyhow::Result<Option<Session>>;

    fn sign_in_anonymously(&self) -> anyhow::Result<Session>;

    /// Revokes the given session on the backend
    fn sign_out(&self, session: &Session) -> anyhow::Result<()>;

    /// Exchanges a refresh token for a fresh session
    fn refresh_session(&self, refresh_token: &str) -> anyhow::Result<Session>;

    fn get_user(&self, access_token: &str) -> anyhow::Result<AuthUser>;

    /// Makes subsequent requests act on behalf of `session` (or anonymously if `None`)
    fn set_session(&self, session: Option<Session>);

}

/// Runs `query` and deserializes every row into `T`
pub fn fetch<T: DeserializeOwned>(client: &dyn DataClient, query: &Query) -> anyhow::Result<Vec<T>> {
    client.select(query)?
        .into_iter()
        .map(|row| serde_json::from_value(row).with_context(|| format!("Unexpected row in table {}", query.table)))
        .collect()
}

/// Runs `query` (as a single row query) and deserializes the one row into `T`
pub fn fetch_single<T: DeserializeOwned>(client: &dyn DataClient, query: &Query) -> anyhow::Result<T> {
    let query = query.clone().single();
    let mut rows = fetch::<T>(client, &query)?;
    if rows.len() != 1 {
        bail!("Expected exactly one row in {}, got {}", query.table, rows.len());
    }
    Ok(rows.remove(0))
}

/// Inserts a single `row` into `table` and returns the row as it was stored
pub fn insert_returning<T: Serialize, R: DeserializeOwned>(client: &dyn DataClient, table: &str, row: &T) -> anyhow::Result<R> {
    let rows = Value::Array(vec![serde_json::to_value(row)?]);
    let inserted = client.insert(table, rows)?
        .into_iter()
        .next()
        .with_context(|| format!("Insert into {} returned no rows", table))?;
    serde_json::from_value(inserted).with_context(|| format!("Unexpected row returned from {}", table))
}
