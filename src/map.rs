use anyhow::{bail, Context};
use log::{error, info};
use serde::{Deserialize, Serialize};
use crate::backend::{fetch, insert_returning, DataClient};
use crate::device::{Coordinates, LocationProvider, PermissionStatus, Region};
use crate::models::{CrySpot, NewCrySpot, CRY_SPOTS_TABLE};
use crate::query::Query;
use crate::session::AuthUser;

/// Stored when the user does not enter a description
pub const DEFAULT_DESCRIPTION: &str = "I cried here.";
/// Zoom of the map around the user's position, in degrees
const INITIAL_REGION_DELTA: f64 = 0.01;

/// A tapped location, waiting for the user to confirm it with a description
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingSpot {
    pub coordinates: Coordinates,
}

/// The state of the map screen: the user's position, the markers and whether taps add new spots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryMap {
    pub location: Option<Coordinates>,
    pub markers: Vec<CrySpot>,
    /// If set, tapping the map starts adding a new spot
    pub adding_mode: bool,
}

impl CryMap {

    /// True until the position of the user is known
    pub fn loading(&self) -> bool {
        self.location.is_none()
    }

    /// Acquires the position of the user, asking for permission first
    pub fn locate(&mut self, location: &dyn LocationProvider) -> anyhow::Result<Coordinates> {
        if location.request_foreground_permission()? != PermissionStatus::Granted {
            bail!("Permission to access location was denied");
        }
        let coordinates = location.current_position()
            .context("Could not read current position")?;
        self.location = Some(coordinates);
        Ok(coordinates)
    }

    /// Opens the map: loads the markers, then acquires the position of the user. \
    /// Markers are loaded even if the position is not available.
    pub fn open(&mut self, data: &dyn DataClient, location: &dyn LocationProvider) -> anyhow::Result<Coordinates> {
        self.load_markers(data);
        self.locate(location)
    }

    /// The region the map initially shows, centered on the user
    pub fn initial_region(&self) -> Option<Region> {
        self.location.map(|c| Region {
            latitude: c.latitude,
            longitude: c.longitude,
            latitude_delta: INITIAL_REGION_DELTA,
            longitude_delta: INITIAL_REGION_DELTA,
        })
    }

    /// Replaces the markers with every spot stored on the backend. \
    /// On failure the error is logged and the current markers stay.
    pub fn load_markers(&mut self, data: &dyn DataClient) {
        match fetch::<CrySpot>(data, &Query::from(CRY_SPOTS_TABLE)) {
            Ok(markers) => self.markers = markers,
            Err(e) => error!("Could not load markers: {:#}", e),
        }
    }

    pub fn toggle_adding_mode(&mut self) {
        self.adding_mode = !self.adding_mode;
    }

    /// Handles a tap on the map. Only starts a new spot in adding mode.
    pub fn press(&self, coordinates: Coordinates) -> Option<PendingSpot> {
        self.adding_mode.then_some(PendingSpot { coordinates })
    }

    /// The user dismissed the description prompt
    pub fn cancel(&mut self) {
        self.adding_mode = false;
    }

    /// Stores the pending spot with the given `description` and shows it on the map. \
    /// A blank description is replaced with [`DEFAULT_DESCRIPTION`]. Adding mode ends either way.
    pub fn confirm(
        &mut self,
        data: &dyn DataClient,
        pending: PendingSpot,
        description: Option<&str>,
        user: Option<&AuthUser>,
    ) -> anyhow::Result<&CrySpot> {
        self.adding_mode = false;
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DESCRIPTION);
        let new_spot = NewCrySpot {
            latitude: pending.coordinates.latitude,
            longitude: pending.coordinates.longitude,
            description: description.to_string(),
            user_id: user.map(|u| u.id.clone()),
        };
        let stored: CrySpot = insert_returning(data, CRY_SPOTS_TABLE, &new_spot)
            .context("Error saving marker.")?;
        info!("Added cry spot {}", stored.id);
        self.markers.push(stored);
        Ok(&self.markers[self.markers.len() - 1])
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use crate::backend::MockDataClient;
    use crate::device::MockLocationProvider;

    const HERE: Coordinates = Coordinates { latitude: 52.52, longitude: 13.405 };

    fn echo_insert(data: &mut MockDataClient) {
        data.expect_insert()
            .withf(|table, _| table == CRY_SPOTS_TABLE)
            .returning(|_, rows| {
                let mut row = rows[0].clone();
                row["id"] = json!(99);
                row["created_at"] = json!("2025-11-20T12:00:00Z");
                Ok(vec![row])
            });
    }

    #[test]
    fn test_blank_description_stores_default() {
        let mut data = MockDataClient::new();
        data.expect_insert()
            .withf(|_, rows: &Value| rows[0]["description"] == json!(DEFAULT_DESCRIPTION))
            .times(2)
            .returning(|_, rows| {
                let mut row = rows[0].clone();
                row["id"] = json!(1);
                row["created_at"] = json!("2025-11-20T12:00:00Z");
                Ok(vec![row])
            });
        let mut map = CryMap { adding_mode: true, ..Default::default() };
        let pending = map.press(HERE).unwrap();
        map.confirm(&data, pending, Some("   "), None).unwrap();
        map.confirm(&data, pending, None, None).unwrap();
        assert_eq!(map.markers.len(), 2);
        assert_eq!(map.markers[0].description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn test_confirm_appends_and_leaves_adding_mode() {
        let mut data = MockDataClient::new();
        echo_insert(&mut data);
        let user = AuthUser { id: "u1".to_string(), email: None, is_anonymous: false };
        let mut map = CryMap::default();
        assert!(map.press(HERE).is_none());

        map.toggle_adding_mode();
        let pending = map.press(HERE).unwrap();
        let stored = map.confirm(&data, pending, Some("  missed the last train "), Some(&user)).unwrap();
        assert_eq!(stored.description, "missed the last train");
        assert_eq!(stored.user_id.as_deref(), Some("u1"));
        assert!(!map.adding_mode);
        assert_eq!(map.markers.len(), 1);
    }

    #[test]
    fn test_failed_insert_surfaces_error() {
        let mut data = MockDataClient::new();
        data.expect_insert().returning(|_, _| Err(anyhow::anyhow!("new row violates row-level security policy")));
        let mut map = CryMap { adding_mode: true, ..Default::default() };
        let pending = map.press(HERE).unwrap();
        let error = map.confirm(&data, pending, Some("x"), None).unwrap_err();
        assert_eq!(error.to_string(), "Error saving marker.");
        assert!(map.markers.is_empty());
        assert!(!map.adding_mode);
    }

    #[test]
    fn test_failed_marker_load_keeps_markers() {
        let mut data = MockDataClient::new();
        data.expect_select()
            .times(1)
            .returning(|_| Ok(vec![json!({
                "id": 3, "created_at": "2025-11-20T12:00:00Z",
                "latitude": 1.0, "longitude": 2.0, "description": "d", "user_id": "u1"
            })]));
        let mut map = CryMap::default();
        map.load_markers(&data);
        assert_eq!(map.markers.len(), 1);

        let mut failing = MockDataClient::new();
        failing.expect_select().returning(|_| Err(anyhow::anyhow!("timeout")));
        map.load_markers(&failing);
        assert_eq!(map.markers.len(), 1);
    }

    #[test]
    fn test_null_description_marker_loads() {
        let mut data = MockDataClient::new();
        data.expect_select()
            .returning(|_| Ok(vec![
                json!({"id": 1, "created_at": "2025-11-20T12:00:00Z", "latitude": 1.0, "longitude": 2.0, "description": "d", "user_id": "u1"}),
                json!({"id": 2, "created_at": "2025-11-20T12:00:00Z", "latitude": 1.0, "longitude": 2.0, "description": null, "user_id": "u1"}),
            ]));
        let mut map = CryMap::default();
        map.load_markers(&data);
        assert_eq!(map.markers.len(), 2);
        assert_eq!(map.markers[1].description, "");
    }

    #[test]
    fn test_open_loads_markers_without_location() {
        let mut data = MockDataClient::new();
        data.expect_select()
            .times(1)
            .returning(|_| Ok(vec![json!({
                "id": 3, "created_at": "2025-11-20T12:00:00Z",
                "latitude": 1.0, "longitude": 2.0, "description": "d", "user_id": "u1"
            })]));
        let mut denied = MockLocationProvider::new();
        denied.expect_request_foreground_permission().returning(|| Ok(PermissionStatus::Denied));
        denied.expect_current_position().never();

        let mut map = CryMap::default();
        assert!(map.open(&data, &denied).is_err());
        assert_eq!(map.markers.len(), 1);
        assert!(map.loading());
    }

    #[test]
    fn test_locate() {
        let mut location = MockLocationProvider::new();
        location.expect_request_foreground_permission().returning(|| Ok(PermissionStatus::Granted));
        location.expect_current_position().returning(|| Ok(HERE));
        let mut map = CryMap::default();
        assert!(map.loading());
        map.locate(&location).unwrap();
        assert!(!map.loading());
        assert_eq!(map.initial_region().unwrap().latitude_delta, 0.01);

        let mut denied = MockLocationProvider::new();
        denied.expect_request_foreground_permission().returning(|| Ok(PermissionStatus::Denied));
        denied.expect_current_position().never();
        let error = CryMap::default().locate(&denied).unwrap_err();
        assert_eq!(error.to_string(), "Permission to access location was denied");
    }
}
