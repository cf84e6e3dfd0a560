use std::sync::{Arc, Mutex};
use log::debug;
use serde::{Deserialize, Serialize};
use crate::session::{Session, SessionManager, SubscriptionId};

/// The screens of the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Route {
    Home,
    Login,
    Signup,
    Map,
    Feed,
    Profile,
}

impl Route {

    /// The path segment of the route, as used for deep links
    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::Signup => "/signup",
            Route::Map => "/map",
            Route::Feed => "/feed",
            Route::Profile => "/profile",
        }
    }

    /// Screens that are reachable without a session
    pub fn is_auth_flow(&self) -> bool {
        matches!(self, Route::Login | Route::Signup)
    }

}

/// Decides where the app has to go, given the session state and the `current` route. \
/// Returns `None`, if the current route may stay.
pub fn guard(loading: bool, session: Option<&Session>, current: Route) -> Option<Route> {
    if loading {
        return None;
    }
    match (session, current.is_auth_flow()) {
        (None, false) => Some(Route::Login),
        (Some(_), true) => Some(Route::Home),
        _ => None,
    }
}

/// Tracks the current route and applies [`guard()`] whenever the session changes. \
/// Cloning yields a handle on the same route.
#[derive(Debug, Clone)]
pub struct Navigator {
    current: Arc<Mutex<Route>>,
}

impl Navigator {

    pub fn new(start: Route) -> Self {
        Self { current: Arc::new(Mutex::new(start)) }
    }

    pub fn current(&self) -> Route {
        *self.current.lock().unwrap()
    }

    /// Navigates to `route`, unless the guard redirects somewhere else. Returns where it ended up.
    pub fn navigate(&self, route: Route, manager: &SessionManager) -> Route {
        let target = guard(manager.loading(), manager.session(), route).unwrap_or(route);
        *self.current.lock().unwrap() = target;
        target
    }

    /// Re-applies the guard on every auth event of `manager`
    pub fn attach(&self, manager: &mut SessionManager) -> SubscriptionId {
        let current = self.current.clone();
        manager.subscribe(move |_, session| {
            let mut current = current.lock().unwrap();
            if let Some(redirect) = guard(false, session, *current) {
                debug!("Redirecting from {} to {}", current.path(), redirect.path());
                *current = redirect;
            }
        })
    }

}
