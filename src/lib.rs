pub mod backend;
pub mod config;
pub mod device;
pub mod feed;
pub mod map;
pub mod models;
pub mod profile;
pub mod query;
pub mod routes;
pub mod session;
pub mod supabase;
pub mod time_ago;

use std::sync::{Arc, Mutex};
use std::time::Duration;
#[cfg(feature = "rate_limiting")]
use std::time::SystemTime;
use anyhow::{bail, Context};
use chrono::Utc;
use log::{debug, warn};
use reqwest::blocking::{Client, ClientBuilder, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use url::Url;
use crate::config::BackendConfig;
use crate::device::{Coordinates, ImagePicker, LocationProvider};
use crate::feed::Feed;
use crate::map::CryMap;
use crate::profile::ProfileState;
use crate::routes::{Navigator, Route};
use crate::session::{SessionManager, SessionStore};
use crate::supabase::SupabaseClient;

#[cfg(feature = "rate_limiting")]
const REQUEST_MAX_SPEED: Duration = Duration::from_millis(150);

/// The entry point into CryMaps. \
/// Holds the connection to the backend, the session and the state of every screen.
pub struct CryMaps {
    pub backend: Arc<SupabaseClient>,
    pub session: SessionManager,
    pub navigator: Navigator,
    pub map: CryMap,
    pub feed: Feed,
    pub profile: ProfileState,
}

impl CryMaps {

    /// Connects to the backend project and restores the persisted session. \
    /// The navigator starts on [`Route::Home`] and is redirected to [`Route::Login`] if there is no session.
    pub fn connect(config: &BackendConfig, store: Box<dyn SessionStore>) -> anyhow::Result<Self> {
        let backend = Arc::new(SupabaseClient::new(CryMapsClient::new(config)?));
        let mut session = SessionManager::new(backend.clone(), store);
        let navigator = Navigator::new(Route::Home);
        navigator.attach(&mut session);
        session.initialize(Utc::now());
        Ok(Self {
            backend,
            session,
            navigator,
            map: Default::default(),
            feed: Default::default(),
            profile: Default::default(),
        })
    }

    /// Refreshes an expired session before a read. \
    /// Reads work without a session too, so a failed refresh is only logged.
    fn refresh_before_read(&mut self) {
        if let Err(e) = self.session.refresh_if_expired(Utc::now()) {
            warn!("{:#}", e);
        }
    }

    /// Loads the markers and acquires the position of the user. \
    /// The markers are shown even if the position is not available.
    pub fn open_map(&mut self, location: &dyn LocationProvider) -> anyhow::Result<()> {
        self.refresh_before_read();
        self.map.open(self.backend.as_ref(), location)?;
        Ok(())
    }

    /// Stores a new cry spot at `coordinates`, if the map is in adding mode
    pub fn add_spot(&mut self, coordinates: Coordinates, description: Option<&str>) -> anyhow::Result<()> {
        let Some(pending) = self.map.press(coordinates) else { return Ok(()) };
        self.session.refresh_if_expired(Utc::now())?;
        self.map.confirm(self.backend.as_ref(), pending, description, self.session.user())?;
        Ok(())
    }

    pub fn refresh_feed(&mut self) {
        self.refresh_before_read();
        self.feed.refresh(self.backend.as_ref());
    }

    /// Loads the profile of the user the backend associates with the current session
    pub fn load_profile(&mut self) -> anyhow::Result<()> {
        self.refresh_before_read();
        if let Some(user) = self.session.fetch_user()? {
            self.profile.load(self.backend.as_ref(), &user.id);
        }
        Ok(())
    }

    pub fn upload_avatar(&mut self, picker: &dyn ImagePicker) -> anyhow::Result<Option<String>> {
        self.session.refresh_if_expired(Utc::now())?;
        let backend = self.backend.as_ref();
        self.profile.upload_avatar(backend, backend, picker, self.session.user(), Utc::now())
    }

}

/// A wrapped reqwest [`Client`], that resolves every request against the project url and authorizes it
#[derive(Debug)]
pub struct CryMapsClient {
    pub client: Client,
    pub base_url: Url,
    publishable_key: String,
    access_token: Mutex<Option<String>>,
    #[cfg(feature = "rate_limiting")]
    last_request_time: Mutex<SystemTime>,
}

impl CryMapsClient {

    fn make_client(config: &BackendConfig) -> anyhow::Result<Client> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));
        default_headers.insert("X-Client-Info", HeaderValue::from_static(concat!("crymaps/", env!("CARGO_PKG_VERSION"))));
        ClientBuilder::new()
            .https_only(config.url.scheme() == "https")
            .timeout(Duration::from_secs(8))
            .default_headers(default_headers)
            .gzip(true)
            .build()
            .context("Could not build reqwest client")
    }

    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Self::make_client(config)?,
            base_url: config.url.clone(),
            publishable_key: config.publishable_key.clone(),
            access_token: Mutex::new(None),
            #[cfg(feature = "rate_limiting")]
            last_request_time: Mutex::new(SystemTime::UNIX_EPOCH),
        })
    }

    /// Requests are sent on behalf of this token from now on, or anonymously if `None`
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.lock().unwrap() = token;
    }

    /// Appends the (percent encoded) `segments` to the project url
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Only fails for cannot-be-a-base urls, which the config rejects
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Builds a request authorized with an explicit access token instead of the current one
    pub fn request_as(&self, method: Method, segments: &[&str], access_token: &str) -> RequestBuilder {
        self.before_request();
        let url = self.url(segments);
        debug!("{}: {}", method, url.as_str());
        self.client.request(method, url)
            .header("apikey", &self.publishable_key)
            .bearer_auth(access_token)
    }

    #[cfg(feature = "rate_limiting")]
    fn before_request(&self) {
        // Rate limits on request creation
        // Any requests that are created, but not sent, will still be rate limited
        let mut last_request_time = self.last_request_time.lock().unwrap();
        let elapsed = last_request_time.elapsed().unwrap_or(Duration::from_secs(0));
        if elapsed > REQUEST_MAX_SPEED {
            *last_request_time = SystemTime::now();
            return;
        }
        let wait_time = REQUEST_MAX_SPEED - elapsed;
        std::thread::sleep(wait_time);
        *last_request_time = SystemTime::now();
    }

    #[cfg(not(feature = "rate_limiting"))]
    fn before_request(&self) {}
}

macro_rules! impl_client_wrap {
    ($($method:ident => $verb:ident),+) => {
        impl CryMapsClient {
            $(
                pub fn $method(&self, segments: &[&str]) -> RequestBuilder {
                    let token = self.access_token.lock().unwrap().clone()
                        .unwrap_or_else(|| self.publishable_key.clone());
                    self.request_as(Method::$verb, segments, &token)
                }
            )+
        }
    };
}

impl_client_wrap!(get => GET, post => POST, patch => PATCH);

/// The error body of the backend services. \
/// Each service names its message field differently.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<serde_json::Value>,
}

impl ApiError {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or_else(|| self.error.map(|e| match e {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }))
    }
}

/// Extracts the raw error message from an error response body
pub(crate) fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .ok()
        .and_then(ApiError::into_message)
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| format!("Request failed with status code: {}", status))
}

/// Turns non-success responses into an error carrying the backend's message
pub(crate) fn check_response(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    bail!("{}", error_message(status, &body))
}
