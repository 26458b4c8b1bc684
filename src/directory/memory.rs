use super::UserDirectory;
use crate::{
    instances::{AccessLevel, InstanceSummary, OrganizationSummary},
    token::Identity,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Entry {
    user: Identity,
    grants: Vec<(i64, AccessLevel)>,
}

/// Fixed in-process user table, used when no database is configured.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    users: Vec<Entry>,
    instances: BTreeMap<i64, (String, OrganizationSummary)>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default platform users and a handful of sample event instances.
    #[must_use]
    pub fn seeded() -> Self {
        let student_union = OrganizationSummary {
            id: 1,
            name: "Student Union".to_string(),
            acronym: Some("SU".to_string()),
        };
        let engineering = OrganizationSummary {
            id: 2,
            name: "Engineering Society".to_string(),
            acronym: Some("ENGSOC".to_string()),
        };

        Self::new()
            .with_instance(1, "Spring Festival", student_union.clone())
            .with_instance(2, "Winter Gala", student_union)
            .with_instance(3, "Hackathon", engineering)
            .with_user(
                Identity {
                    id: 1,
                    email: "admin@example.com".to_string(),
                    name: "Admin".to_string(),
                    is_system_admin: true,
                },
                &[],
            )
            .with_user(
                Identity {
                    id: 2,
                    email: "test@example.com".to_string(),
                    name: "Test User".to_string(),
                    is_system_admin: false,
                },
                &[(1, AccessLevel::WebUser)],
            )
            .with_user(
                Identity {
                    id: 3,
                    email: "user@large-event.com".to_string(),
                    name: "Large Event User".to_string(),
                    is_system_admin: false,
                },
                &[(1, AccessLevel::Both), (3, AccessLevel::WebUser)],
            )
    }

    #[must_use]
    pub fn with_instance(
        mut self,
        id: i64,
        name: &str,
        owner_organization: OrganizationSummary,
    ) -> Self {
        self.instances
            .insert(id, (name.to_string(), owner_organization));
        self
    }

    /// Add `user` with `(instance id, access level)` grants.
    #[must_use]
    pub fn with_user(mut self, user: Identity, grants: &[(i64, AccessLevel)]) -> Self {
        self.users.push(Entry {
            user,
            grants: grants.to_vec(),
        });
        self
    }

    fn summary(&self, id: i64, access_level: AccessLevel) -> Option<InstanceSummary> {
        self.instances
            .get(&id)
            .map(|(name, owner_organization)| InstanceSummary {
                id,
                name: name.clone(),
                access_level,
                owner_organization: owner_organization.clone(),
            })
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.user.email.eq_ignore_ascii_case(email))
            .map(|entry| entry.user.clone()))
    }

    async fn instances_for(&self, user: &Identity) -> Result<Vec<InstanceSummary>> {
        if user.is_system_admin {
            return Ok(self
                .instances
                .keys()
                .filter_map(|id| self.summary(*id, AccessLevel::Both))
                .collect());
        }

        let Some(entry) = self.users.iter().find(|entry| entry.user.id == user.id) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .grants
            .iter()
            .filter_map(|(id, level)| self.summary(*id, *level))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_users_are_found_case_insensitively() -> Result<()> {
        let directory = MemoryDirectory::seeded();

        let admin = directory.find_by_email("ADMIN@example.com").await?;
        assert!(admin.is_some_and(|user| user.is_system_admin));

        let user = directory.find_by_email("user@large-event.com").await?;
        assert_eq!(user.map(|user| user.id), Some(3));

        assert!(directory.find_by_email("nobody@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn admin_sees_every_instance() -> Result<()> {
        let directory = MemoryDirectory::seeded();
        let Some(admin) = directory.find_by_email("admin@example.com").await? else {
            anyhow::bail!("admin missing");
        };

        let instances = directory.instances_for(&admin).await?;
        assert_eq!(instances.len(), 3);
        assert!(instances
            .iter()
            .all(|instance| instance.access_level == AccessLevel::Both));
        Ok(())
    }

    #[tokio::test]
    async fn users_see_their_grants() -> Result<()> {
        let directory = MemoryDirectory::seeded();
        let Some(user) = directory.find_by_email("user@large-event.com").await? else {
            anyhow::bail!("user missing");
        };

        let instances = directory.instances_for(&user).await?;
        let ids: Vec<i64> = instances.iter().map(|instance| instance.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(instances[0].owner_organization.acronym.as_deref(), Some("SU"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_has_no_instances() -> Result<()> {
        let directory = MemoryDirectory::seeded();
        let stranger = Identity {
            id: 99,
            email: "stranger@example.com".to_string(),
            name: "Stranger".to_string(),
            is_system_admin: false,
        };
        assert!(directory.instances_for(&stranger).await?.is_empty());
        Ok(())
    }
}
