//! Token issuance endpoints.
//!
//! `login` issues a signed token for a known email and, unless disabled, sets
//! it as the `auth-token` cookie. `me` and `token` accept either the cookie or
//! an `Authorization: Bearer` header (the header wins); `token` mints a fresh
//! token from a cookie session so it can be handed to a team portal.

mod cookie;
pub(crate) mod login;
pub(crate) mod session;
mod state;
pub mod types;
mod utils;

pub use cookie::AUTH_COOKIE_NAME;
pub use state::{AuthConfig, AuthState};
