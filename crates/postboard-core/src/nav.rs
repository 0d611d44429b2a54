//! Navigation shell: the two top-level routes.
//!
//! The shell only knows its routes and their options. Which route to show
//! for a given session is decided by the composition root.

/// Top-level screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Sign-in / sign-up screen
    Auth,
    /// Main tabbed application
    Tabs,
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Route::Auth => "Auth",
            Route::Tabs => "Tabs",
        }
    }
}

/// Per-screen presentation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenOptions {
    pub header_shown: bool,
}

/// Header chrome is suppressed for every screen in the shell.
const SCREEN_OPTIONS: ScreenOptions = ScreenOptions { header_shown: false };

/// Registered routes and the one currently shown, starting at `Auth`.
#[derive(Debug, Clone)]
pub struct Navigator {
    routes: Vec<Route>,
    current: Route,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            routes: vec![Route::Auth, Route::Tabs],
            current: Route::Auth,
        }
    }

    /// Registered routes in registration order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn current(&self) -> Route {
        self.current
    }

    /// Show `route`. Returns whether the current route changed.
    pub fn navigate(&mut self, route: Route) -> bool {
        if self.current == route {
            return false;
        }
        self.current = route;
        true
    }

    pub fn options(&self, _route: Route) -> ScreenOptions {
        SCREEN_OPTIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_two_routes_without_headers() {
        let nav = Navigator::new();
        assert_eq!(nav.routes(), &[Route::Auth, Route::Tabs]);
        assert_eq!(nav.current(), Route::Auth);
        for route in nav.routes() {
            assert!(!nav.options(*route).header_shown);
        }
        assert_eq!(Route::Tabs.name(), "Tabs");
    }

    #[test]
    fn test_navigate_switches_routes() {
        let mut nav = Navigator::new();
        assert!(!nav.navigate(Route::Auth)); // Already shown
        assert!(nav.navigate(Route::Tabs));
        assert_eq!(nav.current(), Route::Tabs);
        assert!(!nav.navigate(Route::Tabs));

        assert!(nav.navigate(Route::Auth));
        assert_eq!(nav.current(), Route::Auth);
    }
}
