//! Event instances a user may open, as listed by `/api/instances`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Which portals of an instance the user may access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    WebUser,
    WebAdmin,
    Both,
}

impl AccessLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebUser => "web_user",
            Self::WebAdmin => "web_admin",
            Self::Both => "both",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "web_user" => Some(Self::WebUser),
            "web_admin" => Some(Self::WebAdmin),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSummary {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acronym: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: i64,
    pub name: String,
    pub access_level: AccessLevel,
    pub owner_organization: OrganizationSummary,
}

/// Body of `GET /api/instances`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceListResponse {
    #[serde(default)]
    pub success: bool,
    pub instances: Vec<InstanceSummary>,
    pub count: usize,
}

impl InstanceListResponse {
    #[must_use]
    pub fn new(instances: Vec<InstanceSummary>) -> Self {
        let count = instances.len();
        Self {
            success: true,
            instances,
            count,
        }
    }
}
