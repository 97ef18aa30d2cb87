//! In-process [`Location`] for tests and demos.

use std::sync::{Mutex, PoisonError};

use url::Url;

use crate::{Location, LocationError};

#[derive(Debug)]
struct State {
    current: Url,
    history: Vec<String>,
    navigations: Vec<String>,
}

/// An address bar that lives in memory.
///
/// Keeps a history stack (`replace_state` rewrites the top entry, `assign`
/// pushes one) and a separate log of every `assign`, so tests can assert
/// "navigated to `/login` exactly once".
#[derive(Debug)]
pub struct MemoryLocation {
    state: Mutex<State>,
}

impl MemoryLocation {
    /// Starts at `href`, which must be an absolute address.
    pub fn new(href: &str) -> Result<Self, LocationError> {
        let current = parse(href)?;
        Ok(Self {
            state: Mutex::new(State {
                history: vec![current.to_string()],
                current,
                navigations: Vec::new(),
            }),
        })
    }

    /// Every address passed to [`Location::assign`], resolved, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    /// The history stack, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Simulates the user (or the provider) landing on a new address,
    /// replacing the current one outright.
    pub fn land_on(&self, href: &str) -> Result<(), LocationError> {
        let url = parse(href)?;
        let mut state = self.lock();
        state.history.push(url.to_string());
        state.current = url;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(state: &State, target: &str) -> Result<Url, LocationError> {
        state
            .current
            .join(target)
            .map_err(|e| LocationError::InvalidAddress {
                address: target.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Location for MemoryLocation {
    fn href(&self) -> String {
        self.lock().current.to_string()
    }

    fn replace_state(&self, target: &str) -> Result<(), LocationError> {
        let mut state = self.lock();
        let url = Self::resolve(&state, target)?;
        if url.origin() != state.current.origin() {
            return Err(LocationError::Rejected(format!(
                "cannot replace state across origins: {url}"
            )));
        }
        if let Some(top) = state.history.last_mut() {
            *top = url.to_string();
        }
        state.current = url;
        Ok(())
    }

    fn assign(&self, target: &str) -> Result<(), LocationError> {
        let mut state = self.lock();
        let url = Self::resolve(&state, target)?;
        state.navigations.push(url.to_string());
        state.history.push(url.to_string());
        state.current = url;
        Ok(())
    }
}

fn parse(href: &str) -> Result<Url, LocationError> {
    Url::parse(href).map_err(|e| LocationError::InvalidAddress {
        address: href.to_string(),
        reason: e.to_string(),
    })
}
