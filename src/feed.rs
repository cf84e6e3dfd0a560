use std::collections::HashMap;
use itertools::Itertools;
use log::error;
use serde::{Deserialize, Serialize};
use crate::backend::{fetch, DataClient};
use crate::models::{CrySpot, User, CRY_SPOTS_TABLE, USERS_TABLE};
use crate::query::Query;

/// How many of the most recent spots make up the feed
pub const FEED_LIMIT: usize = 20;
/// Shown for posts whose author is unknown
pub const ANONYMOUS_NAME: &str = "Anonymous";
/// Shown for posts whose author has no profile picture
pub const PLACEHOLDER_AVATAR_URL: &str = "https://via.placeholder.com/48";
/// Some rows store this string instead of an actual null owner
const NULL_OWNER_SENTINEL: &str = "null";

/// A [`CrySpot`] together with what is needed to display its author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPost {
    #[serde(flatten)]
    pub spot: CrySpot,
    pub user_name: String,
    pub profile_picture_url: String,
}

impl PartialEq for FeedPost {
    fn eq(&self, other: &Self) -> bool {
        self.spot == other.spot
    }
}

/// Returns the owner of the spot, if it has a usable one
fn valid_owner(spot: &CrySpot) -> Option<&str> {
    spot.user_id.as_deref()
        .filter(|id| !id.is_empty() && *id != NULL_OWNER_SENTINEL)
}

/// Merges spots with their authors. \
/// Spots without a valid owner are dropped, unknown authors are shown as [`ANONYMOUS_NAME`] with the [`PLACEHOLDER_AVATAR_URL`].
/// The order of `spots` is kept.
pub fn assemble_feed(spots: Vec<CrySpot>, users: Vec<User>) -> Vec<FeedPost> {
    let users_by_id: HashMap<String, User> = users.into_iter()
        .map(|user| (user.id.clone(), user))
        .collect();
    spots.into_iter()
        .filter(|spot| valid_owner(spot).is_some())
        .map(|spot| {
            let user = valid_owner(&spot).and_then(|id| users_by_id.get(id));
            let user_name = user.and_then(|u| u.name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
            let profile_picture_url = user.and_then(|u| u.profile_picture_url.clone())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_AVATAR_URL.to_string());
            FeedPost { spot, user_name, profile_picture_url }
        })
        .collect()
}

/// Fetches the [`FEED_LIMIT`] most recent spots and their authors
pub fn fetch_feed(data: &dyn DataClient) -> anyhow::Result<Vec<FeedPost>> {
    let spots_query = Query::from(CRY_SPOTS_TABLE)
        .order("created_at", false)
        .limit(FEED_LIMIT);
    let spots: Vec<CrySpot> = fetch(data, &spots_query)?;
    let owner_ids = spots.iter()
        .filter_map(valid_owner)
        .unique()
        .collect_vec();
    if owner_ids.is_empty() {
        return Ok(vec![]);
    }
    let users: Vec<User> = fetch(data, &Query::from(USERS_TABLE).in_("id", owner_ids))?;
    Ok(assemble_feed(spots, users))
}

/// The state of the feed screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub posts: Vec<FeedPost>,
    /// True until the first load finished
    pub loading: bool,
    /// True while a pull-to-refresh is running
    pub refreshing: bool,
}

impl Default for Feed {
    fn default() -> Self {
        Self {
            posts: vec![],
            loading: true,
            refreshing: false,
        }
    }
}

impl Feed {

    /// (Re)loads the posts. \
    /// On failure the error is logged and the previous posts stay as they are.
    pub fn load(&mut self, data: &dyn DataClient) {
        match fetch_feed(data) {
            Ok(posts) => self.posts = posts,
            Err(e) => error!("Error fetching posts: {:#}", e),
        }
        self.loading = false;
        self.refreshing = false;
    }

    /// Pull-to-refresh
    pub fn refresh(&mut self, data: &dyn DataClient) {
        self.refreshing = true;
        self.load(data);
    }

}
