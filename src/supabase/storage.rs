use anyhow::Context;
use itertools::Itertools;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde::Deserialize;
use crate::backend::{ObjectStorage, UploadOptions};
use crate::supabase::SupabaseClient;
use crate::check_response;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: String,
}

/// The path segments of an object, keys may contain `/` to form folders
fn object_segments<'a>(prefix: &[&'a str], bucket: &'a str, key: &'a str) -> Vec<&'a str> {
    prefix.iter()
        .copied()
        .chain(std::iter::once(bucket))
        .chain(key.split('/').filter(|s| !s.is_empty()))
        .collect_vec()
}

impl ObjectStorage for SupabaseClient {

    fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>, options: &UploadOptions) -> anyhow::Result<String> {
        let segments = object_segments(&["storage", "v1", "object"], bucket, key);
        let response = self.client.post(&segments)
            .header(CONTENT_TYPE, options.content_type.as_str())
            .header(CACHE_CONTROL, format!("max-age={}", options.cache_control))
            .header("x-upsert", options.upsert.to_string())
            .body(bytes)
            .send()?;
        let response = check_response(response)?;
        let uploaded: UploadResponse = response.json()
            .context("Could not parse upload response")?;
        Ok(uploaded.key)
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        let segments = object_segments(&["storage", "v1", "object", "public"], bucket, key);
        self.client.url(&segments).to_string()
    }

}
