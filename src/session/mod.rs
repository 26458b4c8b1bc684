//! Session Context: the per-application-instance auth state machine.
//!
//! ```text
//! Initializing --resolve--> Authenticated | Unauthenticated
//! Authenticated --logout / remote logout--> Unauthenticated
//! Unauthenticated --login--> Authenticated
//! ```
//!
//! Each deployment builds its own [`SessionContext`] from a [`SessionConfig`]
//! at its composition root. State is observable through [`SessionContext::watch`]
//! and changes are announced as [`SessionEvent`]s.

mod context;

pub use context::{handoff_url, SessionConfig, SessionContext};

use crate::{client::ClientError, instances::InstanceSummary, token::Identity};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of the in-memory session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub user: Option<Identity>,
    /// Held bearer token. `None` for cookie sessions resolved through `me`.
    pub token: Option<String>,
    pub instances: Vec<InstanceSummary>,
}

impl Session {
    pub(crate) const fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            user: None,
            token: None,
            instances: Vec::new(),
        }
    }

    pub(crate) const fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            token: None,
            instances: Vec::new(),
        }
    }

    pub(crate) fn authenticated(
        user: Identity,
        token: Option<String>,
        instances: Vec<InstanceSummary>,
    ) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
            token,
            instances,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Initializing
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// In-process notifications for other components of the same application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Startup resolution found a session.
    Established(Identity),
    LoggedIn(Identity),
    LoggedOut,
    /// Another context logged out.
    RemoteLogout,
    /// Another context logged in.
    RemoteLogin,
    /// Configured to discard every in-memory cache after a logout.
    ReloadRequested,
}

/// What happens after a logout, local or remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutBehavior {
    #[default]
    None,
    Reload,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bearer mode requires a token store")]
    MissingTokenStore,
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid portal URL: {0}")]
    Url(#[from] url::ParseError),
}
