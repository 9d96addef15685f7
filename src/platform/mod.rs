//! Chat-platform capability used by the reconciler and the linking flow.
//!
//! Core logic only ever sees member role sets through [`ChatPlatform`]; the
//! Discord REST client in [`discord`] is the production implementation.

pub mod discord;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::PlatformError;

pub use self::discord::DiscordPlatform;

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Role ids currently held by `member_id`, or `None` if the member is not
    /// in the guild.
    async fn list_member_roles(
        &self,
        member_id: &str,
    ) -> Result<Option<BTreeSet<String>>, PlatformError>;

    /// Grant `role_id`. `reason` lands in the audit log.
    async fn add_role(
        &self,
        member_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Revoke `role_id`. `reason` lands in the audit log.
    async fn remove_role(
        &self,
        member_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), PlatformError>;
}
