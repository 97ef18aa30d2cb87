//! Path → requirement mapping.

use keygate_session::SessionSnapshot;

use crate::{Decision, Redirect, Requirement, RouteGuard};

/// One entry in a [`RouteTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A page guarded by a requirement.
    Page(Requirement),
    /// A path that always forwards somewhere else.
    Alias(String),
}

/// Exact-match routes. Unknown paths are open.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, Route)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The document portal's routes: `/login` open, the four content pages
    /// signed-in only, `/` forwarding to `/dashboard`.
    pub fn portal() -> Self {
        Self::new()
            .open("/login")
            .authenticated("/dashboard")
            .authenticated("/documents")
            .authenticated("/upload")
            .authenticated("/profile")
            .alias("/", "/dashboard")
    }

    #[must_use]
    pub fn open(self, path: &str) -> Self {
        self.with(path, Route::Page(Requirement::None))
    }

    #[must_use]
    pub fn authenticated(self, path: &str) -> Self {
        self.with(path, Route::Page(Requirement::Authenticated))
    }

    #[must_use]
    pub fn role(self, path: &str, role: &str) -> Self {
        self.with(path, Route::Page(Requirement::Role(role.to_string())))
    }

    #[must_use]
    pub fn alias(self, path: &str, target: &str) -> Self {
        self.with(path, Route::Alias(target.to_string()))
    }

    /// The route for `path`. Query, fragment and a trailing slash are
    /// ignored. `None` for paths the table doesn't know.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        let path = normalize(path);
        self.routes
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, route)| route)
    }

    /// Evaluates `path` against `guard`.
    pub fn decide(&self, guard: &RouteGuard, snapshot: &SessionSnapshot, path: &str) -> Decision {
        match self.resolve(path) {
            Some(Route::Alias(target)) => Decision::RedirectTo(Redirect::Path(target.clone())),
            Some(Route::Page(requirement)) => guard.decide(snapshot, requirement),
            None => Decision::Allow,
        }
    }

    /// Registered paths, in insertion order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(path, _)| path.as_str())
    }

    fn with(mut self, path: &str, route: Route) -> Self {
        let path = normalize(path).to_string();
        self.routes.retain(|(existing, _)| *existing != path);
        self.routes.push((path, route));
        self
    }
}

fn normalize(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}
