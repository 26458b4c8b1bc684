//! HTTP contracts the session core consumes.
//!
//! [`AuthApi`] and [`InstanceApi`] are the seams; [`HttpAuthApi`] and
//! [`HttpInstanceApi`] implement them over one shared [`HttpTransport`].

mod api;
mod config;
mod errors;

pub use api::{AuthApi, HttpAuthApi, HttpInstanceApi, HttpTransport, InstanceApi};
pub use config::{AuthMode, ClientConfig, Platform};
pub use errors::ClientError;
