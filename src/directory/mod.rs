//! User lookup behind the token issuance endpoint.

mod memory;
mod postgres;

pub use memory::MemoryDirectory;
pub use postgres::PgDirectory;

use crate::{instances::InstanceSummary, token::Identity};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by already normalized (trimmed, lowercase) email.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>>;

    /// Instances `user` may open. System admins see every instance.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    async fn instances_for(&self, user: &Identity) -> Result<Vec<InstanceSummary>>;

    /// # Errors
    /// Returns an error if the backing store is unreachable.
    async fn ping(&self) -> Result<()>;

    /// Short name reported by `/health`.
    fn kind(&self) -> &'static str;
}
