//! Auth-token timeline (spec §3 "Auth-Token Validity Window", §6).
//!
//! External collaborator in the original spec; this crate still ships a
//! usable default implementation so the channel can be exercised without a
//! real sign-in/refresh subsystem wired up.

use parking_lot::RwLock;
use std::sync::Arc;

/// A half-open validity window `[start, end)` during which `token` is the
/// one to sign outgoing batches with. `end == None` means "unbounded" (the
/// last window in a timeline); at most one window may have `end == None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthTokenWindow {
    pub token: Option<String>,
    pub start: u128,
    pub end: Option<u128>,
}

impl AuthTokenWindow {
    pub fn contains(&self, at: u128) -> bool {
        at >= self.start && self.end.map(|end| at < end).unwrap_or(true)
    }
}

/// Read-only snapshot access to an auth-token timeline. Callers take a
/// snapshot before iterating; there are no partial views (spec §6).
pub trait AuthTokenContext: Send + Sync {
    fn snapshot(&self) -> Vec<AuthTokenWindow>;
}

/// An in-memory, mutable timeline, updated by a sign-in/refresh subsystem.
///
/// Windows are kept non-overlapping and in ascending order, matching the
/// data-model invariant; `begin_token` closes the previously open window
/// (if any) at `at` and opens a new unbounded one.
#[derive(Clone)]
pub struct SharedAuthTokenContext {
    windows: Arc<RwLock<Vec<AuthTokenWindow>>>,
}

impl SharedAuthTokenContext {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start using `token` from `at` onward, closing the previously open
    /// window at `at`. A `None` token models "signed out" / anonymous.
    pub fn begin_token(&self, token: Option<String>, at: u128) {
        let mut windows = self.windows.write();
        if let Some(last) = windows.last_mut() {
            if last.end.is_none() {
                last.end = Some(at);
            }
        }
        windows.push(AuthTokenWindow {
            token,
            start: at,
            end: None,
        });
    }
}

impl Default for SharedAuthTokenContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthTokenContext for SharedAuthTokenContext {
    fn snapshot(&self) -> Vec<AuthTokenWindow> {
        self.windows.read().clone()
    }
}

/// A fixed timeline, useful for tests (spec §8 scenario 6).
#[derive(Clone, Debug, Default)]
pub struct StaticAuthTokenContext(pub Vec<AuthTokenWindow>);

impl AuthTokenContext for StaticAuthTokenContext {
    fn snapshot(&self) -> Vec<AuthTokenWindow> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_token_closes_previous_open_window() {
        let ctx = SharedAuthTokenContext::new();
        ctx.begin_token(Some("t1".to_string()), 0);
        ctx.begin_token(Some("t2".to_string()), 100);

        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].end, Some(100));
        assert_eq!(snap[1].end, None);
    }

    #[test]
    fn window_contains_is_half_open() {
        let w = AuthTokenWindow {
            token: Some("t".to_string()),
            start: 10,
            end: Some(20),
        };
        assert!(!w.contains(9));
        assert!(w.contains(10));
        assert!(w.contains(19));
        assert!(!w.contains(20));
    }

    #[test]
    fn unbounded_window_contains_everything_after_start() {
        let w = AuthTokenWindow {
            token: None,
            start: 10,
            end: None,
        };
        assert!(w.contains(10));
        assert!(w.contains(1_000_000));
    }
}
