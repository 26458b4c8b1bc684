#![allow(clippy::needless_for_each)]

#[allow(unused_imports)]
use super::handlers::{
    auth::{
        login::{__path_login, login},
        session::{__path_logout, __path_me, __path_token, logout, me, token},
        types::{ErrorResponse, LoginRequest, LoginResponse, LogoutResponse, MeResponse, TokenResponse},
    },
    health::{self, __path_health, health},
    instances::{__path_instances, instances},
};
use crate::{
    instances::{AccessLevel, InstanceListResponse, InstanceSummary, OrganizationSummary},
    token::Identity,
};
use utoipa::{
    openapi::{Contact, InfoBuilder, License},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(health, login, me, token, logout, instances),
    components(
        schemas(
            health::Health,
            Identity,
            LoginRequest,
            LoginResponse,
            MeResponse,
            TokenResponse,
            LogoutResponse,
            ErrorResponse,
            AccessLevel,
            OrganizationSummary,
            InstanceSummary,
            InstanceListResponse,
        )
    ),
    tags(
        (name = "auth", description = "Token issuance and session endpoints"),
        (name = "instances", description = "Event instances of the caller"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info = cargo_info();
    doc
}

fn cargo_info() -> utoipa::openapi::Info {
    // Use Cargo.toml metadata instead of the utoipa defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    info
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}
