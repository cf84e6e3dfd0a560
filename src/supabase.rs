//! The hosted backend: row storage (`rest/v1`), object storage (`storage/v1`) and identity (`auth/v1`), all reached over HTTP.

pub mod auth;
pub mod rest;
pub mod storage;

use crate::session::Session;
use crate::CryMapsClient;

/// Implements [`DataClient`](crate::backend::DataClient), [`ObjectStorage`](crate::backend::ObjectStorage)
/// and [`AuthProvider`](crate::backend::AuthProvider) against a backend project
#[derive(Debug)]
pub struct SupabaseClient {
    pub client: CryMapsClient,
}

impl SupabaseClient {

    pub fn new(client: CryMapsClient) -> Self {
        Self { client }
    }

    /// Binds `session` to every following request
    pub(crate) fn bind_session(&self, session: Option<&Session>) {
        self.client.set_access_token(session.map(|s| s.access_token.clone()));
    }

}
