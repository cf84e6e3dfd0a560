use std::fmt::{Display, Formatter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Table holding the cry spots
pub const CRY_SPOTS_TABLE: &str = "cry_locs";
/// Table holding the public user records
pub const USERS_TABLE: &str = "users";

/// The primary key of a row. \
/// The backend may hand these out as numbers or as strings (uuids), so both are accepted and kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(pub String);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<i64>() {
            Ok(number) => serializer.serialize_i64(number),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrString {
            Number(i64),
            String(String),
        }
        Ok(match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => RecordId(n.to_string()),
            NumberOrString::String(s) => RecordId(s),
        })
    }
}

/// Treats an explicit `null` like a missing string
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A public user record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A geotagged note somebody left on the map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrySpot {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    /// The owning user. \
    /// Older rows contain the literal string `"null"` here instead of an actual null
    #[serde(default)]
    pub user_id: Option<String>,
}

impl PartialEq for CrySpot {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// The payload for inserting a new [`CrySpot`]. \
/// `id` and `created_at` are filled in by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCrySpot {
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}
