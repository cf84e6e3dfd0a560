use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use crate::backend::{fetch_single, DataClient, ObjectStorage, UploadOptions};
use crate::device::ImagePicker;
use crate::models::USERS_TABLE;
use crate::query::{Filter, Query};
use crate::session::AuthUser;

/// Bucket holding the profile pictures
pub const AVATAR_BUCKET: &str = "avatars";
/// How long clients may cache a profile picture, in seconds
const AVATAR_CACHE_SECONDS: u32 = 3600;

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    profile_picture_url: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// The state of the profile screen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileState {
    pub avatar_url: Option<String>,
    pub user_name: Option<String>,
    /// True while an avatar upload is running
    pub uploading: bool,
}

/// Names the stored avatar after its owner and the upload time, so every upload gets a fresh key
pub fn avatar_file_name(user_id: &str, extension: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.{}", user_id, now.timestamp_millis(), extension)
}

impl ProfileState {

    /// Loads the current avatar and name of the user. \
    /// Fields missing on the backend keep their current value, failures are only logged.
    pub fn load(&mut self, data: &dyn DataClient, user_id: &str) {
        let query = Query::from(USERS_TABLE)
            .select("profile_picture_url, name")
            .eq("id", user_id);
        match fetch_single::<ProfileRow>(data, &query) {
            Ok(row) => {
                if let Some(url) = row.profile_picture_url.filter(|u| !u.is_empty()) {
                    self.avatar_url = Some(url);
                }
                if let Some(name) = row.name.filter(|n| !n.is_empty()) {
                    self.user_name = Some(name);
                }
            }
            Err(e) => warn!("Could not load profile of {}: {:#}", user_id, e),
        }
    }

    /// Lets the user pick a new profile picture, uploads it and links it to the user record. \
    /// Returns the public url of the new picture, or `None` if the user cancelled the picker.
    pub fn upload_avatar(
        &mut self,
        data: &dyn DataClient,
        storage: &dyn ObjectStorage,
        picker: &dyn ImagePicker,
        user: Option<&AuthUser>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<String>> {
        self.uploading = true;
        let result = self.pick_and_upload(data, storage, picker, user, now);
        self.uploading = false;
        if let Ok(Some(url)) = &result {
            self.avatar_url = Some(url.clone());
        }
        result
    }

    fn pick_and_upload(
        &self,
        data: &dyn DataClient,
        storage: &dyn ObjectStorage,
        picker: &dyn ImagePicker,
        user: Option<&AuthUser>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<String>> {
        let Some(user) = user else { bail!("User not logged in") };
        if !picker.request_media_library_permission()? {
            bail!("Permission to access camera roll is required!");
        }
        let Some(image) = picker.pick_image()? else {
            debug!("Avatar pick cancelled");
            return Ok(None);
        };

        let file_name = avatar_file_name(&user.id, &image.extension(), now);
        let bytes = image.read_bytes()?;
        debug!("Uploading avatar {} ({} bytes)", file_name, bytes.len());
        let options = UploadOptions {
            content_type: image.content_type().to_string(),
            cache_control: AVATAR_CACHE_SECONDS,
            upsert: false,
        };
        storage.upload(AVATAR_BUCKET, &file_name, bytes, &options)
            .context("Could not upload avatar")?;

        let public_url = storage.public_url(AVATAR_BUCKET, &file_name);
        let filter = Filter::Eq { column: "id".to_string(), value: user.id.clone() };
        data.update(USERS_TABLE, &[filter], json!({ "profile_picture_url": public_url }))
            .context("Could not save avatar url")?;
        info!("Profile picture of {} updated", user.id);
        Ok(Some(public_url))
    }

}
