use super::UserDirectory;
use crate::{
    instances::{AccessLevel, InstanceSummary, OrganizationSummary},
    token::Identity,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Connection, FromRow, PgPool};
use std::time::Duration;
use tracing::{info_span, warn, Instrument};

#[derive(FromRow)]
struct UserRow {
    id: i64,
    email: String,
    name: String,
    is_system_admin: bool,
}

#[derive(FromRow)]
struct InstanceRow {
    id: i64,
    name: String,
    access_level: String,
    org_id: i64,
    org_name: String,
    org_acronym: Option<String>,
}

impl InstanceRow {
    fn into_summary(self) -> Option<InstanceSummary> {
        let Some(access_level) = AccessLevel::parse(&self.access_level) else {
            warn!(
                instance_id = self.id,
                "Skipping instance with unknown access level {:?}", self.access_level
            );
            return None;
        };
        Some(InstanceSummary {
            id: self.id,
            name: self.name,
            access_level,
            owner_organization: OrganizationSummary {
                id: self.org_id,
                name: self.org_name,
                acronym: self.org_acronym,
            },
        })
    }
}

/// Users and grants stored in Postgres, see `sql/schema.sql`.
#[derive(Clone, Debug)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, email, name, is_system_admin
            FROM users
            WHERE lower(email) = lower($1)
            LIMIT 1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .instrument(info_span!("db.query", db.system = "postgresql", db.operation = "SELECT"))
        .await
        .context("Failed to look up user")?;

        Ok(row.map(|row| Identity {
            id: row.id,
            email: row.email,
            name: row.name,
            is_system_admin: row.is_system_admin,
        }))
    }

    async fn instances_for(&self, user: &Identity) -> Result<Vec<InstanceSummary>> {
        let query = if user.is_system_admin {
            sqlx::query_as::<_, InstanceRow>(
                r"
                SELECT i.id, i.name, 'both' AS access_level,
                       o.id AS org_id, o.name AS org_name, o.acronym AS org_acronym
                FROM instances i
                JOIN organizations o ON o.id = i.owner_organization_id
                ORDER BY i.id
                ",
            )
        } else {
            sqlx::query_as::<_, InstanceRow>(
                r"
                SELECT i.id, i.name, ui.access_level,
                       o.id AS org_id, o.name AS org_name, o.acronym AS org_acronym
                FROM user_instances ui
                JOIN instances i ON i.id = ui.instance_id
                JOIN organizations o ON o.id = i.owner_organization_id
                WHERE ui.user_id = $1
                ORDER BY i.id
                ",
            )
            .bind(user.id)
        };

        let rows = query
            .fetch_all(&self.pool)
            .instrument(info_span!("db.query", db.system = "postgresql", db.operation = "SELECT"))
            .await
            .context("Failed to list instances")?;

        Ok(rows.into_iter().filter_map(InstanceRow::into_summary).collect())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!("db.acquire", db.system = "postgresql", db.operation = "ACQUIRE"))
            .await
            .context("Failed to acquire database connection")?;
        conn.ping()
            .instrument(info_span!("db.ping", db.system = "postgresql", db.operation = "PING"))
            .await
            .context("Failed to ping database")
    }

    fn kind(&self) -> &'static str {
        "postgresql"
    }
}
