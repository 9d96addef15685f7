//! Chat commands and their replies.
//!
//! This is the outermost error boundary for chat interactions: expected
//! domain failures are shown to the invoker as `⚠️ Error: …`, anything else is
//! logged and answered with a generic message.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::db::Database;
use crate::error::ErrorKind;
use crate::linking::{LinkService, LinkState};
use crate::roles::{RefreshOutcome, RoleAdmin, RoleReconciler};

const SOMETHING_WENT_WRONG: &str = "❌ Something went wrong.";

/// Custom id carried by the welcome message button.
pub const LINK_BUTTON_ID: &str = "link";

/// A parsed chat command together with the identity that invoked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Admin: post the public welcome message with a link button.
    Hello,
    Link { invoker: String },
    LinkStatus { invoker: String },
    Unlink { invoker: String },
    Refresh { invoker: String },
    AddFactory { factory_id: u64, role_id: String },
    RemoveFactory { factory_id: u64 },
    AddUosThreshold { threshold: Decimal, role_id: String },
    RemoveUosThreshold { threshold: Decimal },
    SetUosHolderRole { threshold: Decimal, role_id: String },
    DeleteRole { role_id: String },
    PrintRole { role_id: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Link { .. } => "link",
            Self::LinkStatus { .. } => "linkstatus",
            Self::Unlink { .. } => "unlink",
            Self::Refresh { .. } => "refresh",
            Self::AddFactory { .. } => "addfactory",
            Self::RemoveFactory { .. } => "removefactory",
            Self::AddUosThreshold { .. } => "adduosthreshold",
            Self::RemoveUosThreshold { .. } => "removeuosthreshold",
            Self::SetUosHolderRole { .. } => "setuosholderrole",
            Self::DeleteRole { .. } => "deleterole",
            Self::PrintRole { .. } => "printrole",
        }
    }

    /// Command behind a message button press, if the button is ours.
    pub fn from_button(custom_id: &str, invoker: &str) -> Option<Self> {
        (custom_id == LINK_BUTTON_ID).then(|| Self::Link {
            invoker: invoker.to_string(),
        })
    }
}

/// Button attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyButton {
    /// Opens a URL in the browser.
    OpenUrl { label: String, url: String },
    /// Sends `custom_id` back as a button interaction.
    Interaction { label: String, custom_id: String },
}

/// Reply to a command. Only the welcome message is posted publicly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub content: String,
    pub button: Option<ReplyButton>,
    pub ephemeral: bool,
}

impl CommandReply {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            button: None,
            ephemeral: true,
        }
    }

    fn with_button(content: impl Into<String>, button: ReplyButton) -> Self {
        Self {
            button: Some(button),
            ..Self::text(content)
        }
    }

    /// URL of an attached link button.
    pub fn link(&self) -> Option<&str> {
        match &self.button {
            Some(ReplyButton::OpenUrl { url, .. }) => Some(url),
            _ => None,
        }
    }

    fn failure(command: &str, kind: ErrorKind, message: String) -> Self {
        if kind.is_domain() {
            Self::text(format!("⚠️ Error: {message}"))
        } else {
            tracing::error!(command, error = %message, "Command failed");
            Self::text(SOMETHING_WENT_WRONG)
        }
    }
}

pub struct CommandDispatcher {
    links: Arc<LinkService>,
    admin: Arc<RoleAdmin>,
    reconciler: Arc<RoleReconciler>,
    db: Arc<dyn Database>,
}

macro_rules! reply_or_fail {
    ($name:expr, $result:expr, |$ok:pat_param| $body:expr) => {
        match $result {
            Ok($ok) => $body,
            Err(e) => CommandReply::failure($name, e.kind(), e.to_string()),
        }
    };
}

impl CommandDispatcher {
    pub fn new(
        links: Arc<LinkService>,
        admin: Arc<RoleAdmin>,
        reconciler: Arc<RoleReconciler>,
        db: Arc<dyn Database>,
    ) -> Self {
        Self {
            links,
            admin,
            reconciler,
            db,
        }
    }

    pub async fn dispatch(&self, command: Command) -> CommandReply {
        let name = command.name();
        tracing::debug!(command = name, "Dispatching command");
        match command {
            Command::Hello => CommandReply {
                ephemeral: false,
                ..CommandReply::with_button(
                    "Click on the button below to verify your assets!",
                    ReplyButton::Interaction {
                        label: "Link Ultra Wallet".to_string(),
                        custom_id: LINK_BUTTON_ID.to_string(),
                    },
                )
            },
            Command::Link { invoker } => {
                reply_or_fail!(name, self.links.begin_link(&invoker).await, |url| {
                    CommandReply::with_button(
                        "Click the button to begin linking Discord to Ultra Blockchain.",
                        ReplyButton::OpenUrl {
                            label: "Link Ultra Account".to_string(),
                            url,
                        },
                    )
                })
            }
            Command::LinkStatus { invoker } => {
                reply_or_fail!(name, self.links.link_status(&invoker).await, |state| {
                    match state {
                        LinkState::Linked(account) => CommandReply::text(format!(
                            "✅ Linked to Ultra account `{}` since {}.",
                            account.blockchain_id,
                            account.created_at.format("%Y-%m-%d %H:%M UTC")
                        )),
                        LinkState::Pending => CommandReply::text(
                            "A linking request is waiting for your signature. Use the previous URL or wait for it to expire.",
                        ),
                        LinkState::Unlinked => {
                            CommandReply::text("No Ultra account is linked to you.")
                        }
                    }
                })
            }
            Command::Unlink { invoker } => {
                reply_or_fail!(name, self.links.unlink(&invoker).await, |_| {
                    CommandReply::text("✅ Account successfully unlinked.")
                })
            }
            Command::Refresh { invoker } => self.refresh(name, &invoker).await,
            Command::AddFactory {
                factory_id,
                role_id,
            } => reply_or_fail!(
                name,
                self.admin.add_factory(factory_id, &role_id).await,
                |()| CommandReply::text(format!(
                    "✅ Factory: {factory_id} added with role: <@&{role_id}> successfully."
                ))
            ),
            Command::RemoveFactory { factory_id } => {
                reply_or_fail!(name, self.admin.remove_factory(factory_id).await, |_| {
                    CommandReply::text(format!("✅ Factory: {factory_id} removed successfully"))
                })
            }
            Command::AddUosThreshold { threshold, role_id } => reply_or_fail!(
                name,
                self.admin.add_uos_threshold(threshold, &role_id).await,
                |()| CommandReply::text(format!(
                    "✅ UOS threshold: {threshold} added with role: <@&{role_id}> successfully."
                ))
            ),
            Command::RemoveUosThreshold { threshold } => reply_or_fail!(
                name,
                self.admin.remove_uos_threshold(threshold).await,
                |_| CommandReply::text(format!(
                    "✅ UOS threshold: {threshold} removed successfully"
                ))
            ),
            Command::SetUosHolderRole { threshold, role_id } => reply_or_fail!(
                name,
                self.admin.set_uos_holder_role(threshold, &role_id).await,
                |replaced| match replaced {
                    Some(previous) => CommandReply::text(format!(
                        "✅ UOS holder role set to <@&{role_id}> with threshold {threshold}, replacing <@&{previous}>."
                    )),
                    None => CommandReply::text(format!(
                        "✅ UOS holder role set to <@&{role_id}> with threshold {threshold}."
                    )),
                }
            ),
            Command::DeleteRole { role_id } => {
                reply_or_fail!(name, self.admin.delete_role(&role_id).await, |()| {
                    CommandReply::text(format!("✅ Role link: {role_id} removed successfully"))
                })
            }
            Command::PrintRole { role_id } => {
                reply_or_fail!(name, self.admin.describe_role(&role_id).await, |rule| {
                    CommandReply::text(format!("✅ {}", rule.describe()))
                })
            }
        }
    }

    /// Platform event: a guild role was deleted.
    pub async fn on_role_deleted(&self, role_id: &str) {
        if let Err(e) = self.admin.on_platform_role_deleted(role_id).await {
            tracing::warn!(role_id, error = %e, "Failed to drop rule for deleted role");
        }
    }

    async fn refresh(&self, name: &str, invoker: &str) -> CommandReply {
        let account = match self.db.get_linked_account(invoker).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return CommandReply::text(
                    "⚠️ Error: No Ultra account is linked to you. Use /link first.",
                );
            }
            Err(e) => return CommandReply::failure(name, e.kind(), e.to_string()),
        };
        reply_or_fail!(
            name,
            self.reconciler
                .refresh_user(&account.discord_id, &account.blockchain_id)
                .await,
            |outcome| match outcome {
                RefreshOutcome::Applied(report) => CommandReply::text(format!(
                    "✅ Roles refreshed: {} granted, {} revoked.",
                    report.granted, report.revoked
                )),
                RefreshOutcome::MemberNotFound => {
                    CommandReply::text("Could not find user in Discord Guild.")
                }
            }
        )
    }
}
