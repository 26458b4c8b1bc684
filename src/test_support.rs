//! Scripted collaborators for session tests.

use crate::{
    api::types::LoginResponse,
    client::{AuthApi, ClientError, InstanceApi},
    instances::{AccessLevel, InstanceSummary, OrganizationSummary},
    token::{Identity, TokenCodec},
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

pub(crate) const SECRET: &[u8] = b"session-test-secret";

pub(crate) fn codec() -> TokenCodec {
    TokenCodec::from_secret(SECRET)
}

pub(crate) fn identity(id: i64, email: &str) -> Identity {
    Identity {
        id,
        email: email.to_string(),
        name: format!("User {id}"),
        is_system_admin: false,
    }
}

pub(crate) fn instance(id: i64, name: &str) -> InstanceSummary {
    InstanceSummary {
        id,
        name: name.to_string(),
        access_level: AccessLevel::WebUser,
        owner_organization: OrganizationSummary {
            id: 1,
            name: "Large Event Org".to_string(),
            acronym: Some("LEO".to_string()),
        },
    }
}

fn unauthorized() -> ClientError {
    ClientError::Http {
        status: 401,
        message: "Not authenticated".to_string(),
    }
}

/// Auth server double: a fixed user table, a cookie session flag, call counters.
pub(crate) struct MockAuthApi {
    users: Vec<Identity>,
    codec: TokenCodec,
    cookie_user: Mutex<Option<Identity>>,
    fail_network: AtomicBool,
    pub(crate) login_calls: AtomicUsize,
    pub(crate) logout_calls: AtomicUsize,
    pub(crate) me_calls: AtomicUsize,
    pub(crate) token_calls: AtomicUsize,
}

impl MockAuthApi {
    pub(crate) fn new(users: Vec<Identity>) -> Arc<Self> {
        Arc::new(Self {
            users,
            codec: codec(),
            cookie_user: Mutex::new(None),
            fail_network: AtomicBool::new(false),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_cookie_user(&self, user: Option<Identity>) {
        if let Ok(mut guard) = self.cookie_user.lock() {
            *guard = user;
        }
    }

    pub(crate) fn fail_network(&self, fail: bool) {
        self.fail_network.store(fail, Ordering::SeqCst);
    }

    fn cookie_user(&self) -> Option<Identity> {
        self.cookie_user.lock().ok().and_then(|guard| guard.clone())
    }

    fn check_network(&self) -> Result<(), ClientError> {
        if self.fail_network.load(Ordering::SeqCst) {
            Err(ClientError::Timeout)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn login(&self, email: &str) -> Result<LoginResponse, ClientError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        let user = self
            .users
            .iter()
            .find(|user| user.email == email)
            .cloned()
            .ok_or_else(unauthorized)?;
        let token = self
            .codec
            .issue(&user)
            .map_err(|err| ClientError::Parse(err.to_string()))?;
        self.set_cookie_user(Some(user.clone()));
        Ok(LoginResponse {
            success: true,
            user: Some(user),
            token: Some(token),
        })
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        self.set_cookie_user(None);
        Ok(())
    }

    async fn me(&self) -> Result<Identity, ClientError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        self.cookie_user().ok_or_else(unauthorized)
    }

    async fn handoff_token(&self) -> Result<String, ClientError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        let user = self.cookie_user().ok_or_else(unauthorized)?;
        self.codec
            .issue(&user)
            .map_err(|err| ClientError::Parse(err.to_string()))
    }
}

pub(crate) struct MockInstanceApi {
    instances: Mutex<Vec<InstanceSummary>>,
    fail: AtomicBool,
    pub(crate) calls: AtomicUsize,
}

impl MockInstanceApi {
    pub(crate) fn new(instances: Vec<InstanceSummary>) -> Arc<Self> {
        Arc::new(Self {
            instances: Mutex::new(instances),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_instances(&self, instances: Vec<InstanceSummary>) {
        if let Ok(mut guard) = self.instances.lock() {
            *guard = instances;
        }
    }
}

#[async_trait]
impl InstanceApi for MockInstanceApi {
    async fn fetch_instances(&self) -> Result<Vec<InstanceSummary>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Http {
                status: 500,
                message: "Failed to fetch instances".to_string(),
            });
        }
        Ok(self
            .instances
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default())
    }
}
