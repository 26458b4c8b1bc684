//! # Large Event Auth (cross-application sessions)
//!
//! `large-event-auth` establishes a logged-in identity once, represents it as a
//! signed token, and propagates it into independently deployed team portals.
//!
//! ## Client side
//!
//! An application instance (a browser tab, a mobile process) composes a
//! [`session::SessionContext`] from:
//!
//! - a [`store::TokenStore`] over any [`storage::StorageAdapter`], isolated by a
//!   key prefix so a shell and a portal can share one storage medium,
//! - a [`negotiator::SessionNegotiator`] that resolves the startup session from
//!   the URL (`?auth=<token>`), then the store, then a cookie `me` call,
//! - a [`crosstab::CrossTabNotifier`] that propagates logout to every other
//!   context of the same origin.
//!
//! ## Server side
//!
//! The [`api`] module serves the token issuance endpoints (`/api/auth/*`) and
//! the instance listing. Tokens are HS256 JWTs minted by [`token::TokenCodec`];
//! client-side decoding never replaces a server-side verify.

pub mod api;
pub mod cli;
pub mod client;
pub mod crosstab;
pub mod directory;
pub mod instances;
pub mod negotiator;
pub mod session;
pub mod storage;
pub mod store;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
