//! Channel and message payloads.

use crate::error::{Error, Result};
use crate::id::{ChannelId, DocumentId, EntityId, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum number of attachment documents per message.
pub const MAX_ATTACHMENTS: usize = 8;

/// Shape of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Exactly two members; invariants fixed at creation.
    Direct,
    /// Any number of members; membership may change.
    Group,
}

/// Who can see a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Discoverable by any entity.
    Public,
    /// Visible to members only.
    Private,
}

/// How entities join a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Anyone may join.
    Open,
    /// Members must be invited.
    InviteOnly,
    /// Joining requires an approved request.
    Request,
}

/// Channel permission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPermissions {
    /// Channel visibility.
    pub visibility: Visibility,
    /// Join policy.
    pub join_policy: JoinPolicy,
    /// Entities allowed to modify membership.
    pub modify_members: BTreeSet<EntityId>,
}

impl ChannelPermissions {
    /// The fixed permission record for direct channels.
    #[must_use]
    pub fn direct() -> Self {
        Self {
            visibility: Visibility::Private,
            join_policy: JoinPolicy::InviteOnly,
            modify_members: BTreeSet::new(),
        }
    }
}

/// Deterministic name for a direct channel: the two member ids joined by
/// `:` in ascending lexicographic order, so `name(a, b) == name(b, a)`.
#[must_use]
pub fn direct_channel_name(a: &EntityId, b: &EntityId) -> String {
    let (low, high) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

/// The channel payload of an element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel name. For direct channels this is the canonical member join
    /// and is immutable.
    pub name: String,

    /// Shape of the channel.
    pub channel_type: ChannelType,

    /// Member entities. Exactly two for direct channels, immutable there.
    pub members: BTreeSet<EntityId>,

    /// Permission record. Immutable for direct channels.
    pub permissions: ChannelPermissions,
}

impl Channel {
    /// Validate channel invariants.
    ///
    /// # Errors
    ///
    /// Returns a constraint error when a direct channel deviates from its
    /// fixed shape (two members, canonical name, direct permissions).
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::MissingRequiredField("name"));
        }
        if self.channel_type == ChannelType::Direct {
            if self.members.len() != 2 {
                return Err(Error::Constraint(
                    "direct channel must have exactly two members".to_string(),
                ));
            }
            let mut iter = self.members.iter();
            let (a, b) = (iter.next().expect("two members"), iter.next().expect("two members"));
            if self.name != direct_channel_name(a, b) {
                return Err(Error::Constraint(
                    "direct channel name must be the canonical member join".to_string(),
                ));
            }
            if self.permissions != ChannelPermissions::direct() {
                return Err(Error::Constraint(
                    "direct channel permissions are fixed".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Data for creating a new channel.
#[derive(Debug, Clone)]
pub struct NewChannel {
    /// Channel name; ignored for direct channels (derived canonically).
    pub name: Option<String>,
    /// Shape of the channel.
    pub channel_type: ChannelType,
    /// Member entities.
    pub members: BTreeSet<EntityId>,
    /// Permissions; ignored for direct channels.
    pub permissions: Option<ChannelPermissions>,
}

impl NewChannel {
    /// Build the stored payload, deriving direct-channel invariants.
    ///
    /// # Errors
    ///
    /// Returns a constraint error if a direct channel does not have
    /// exactly two members, or a group channel lacks a name.
    pub fn into_channel(self) -> Result<Channel> {
        let channel = match self.channel_type {
            ChannelType::Direct => {
                if self.members.len() != 2 {
                    return Err(Error::Constraint(
                        "direct channel must have exactly two members".to_string(),
                    ));
                }
                let mut iter = self.members.iter();
                let (a, b) =
                    (iter.next().expect("two members"), iter.next().expect("two members"));
                Channel {
                    name: direct_channel_name(a, b),
                    channel_type: ChannelType::Direct,
                    members: self.members.clone(),
                    permissions: ChannelPermissions::direct(),
                }
            }
            ChannelType::Group => Channel {
                name: self.name.ok_or(Error::MissingRequiredField("name"))?,
                channel_type: ChannelType::Group,
                members: self.members,
                permissions: self.permissions.unwrap_or(ChannelPermissions {
                    visibility: Visibility::Private,
                    join_policy: JoinPolicy::InviteOnly,
                    modify_members: BTreeSet::new(),
                }),
            },
        };
        channel.validate()?;
        Ok(channel)
    }
}

/// Membership/permission update for a group channel. Direct channels
/// reject every patch.
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    /// Replacement member set.
    pub members: Option<BTreeSet<EntityId>>,
    /// Replacement permissions.
    pub permissions: Option<ChannelPermissions>,
}

/// The message payload of an element.
///
/// Messages are immutable: once created, every update or delete fails
/// with `IMMUTABLE`, and `created_at == updated_at` forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Channel the message was posted to.
    pub channel_id: ChannelId,

    /// Sending entity (always equals the element's `created_by`).
    pub sender: EntityId,

    /// Document holding the message body.
    pub content_ref: DocumentId,

    /// Root message of the thread this message replies into, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<MessageId>,

    /// Attachment documents, at most [`MAX_ATTACHMENTS`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<DocumentId>,
}

impl Message {
    /// Validate message payload invariants.
    ///
    /// # Errors
    ///
    /// Returns a constraint error when the attachment cap is exceeded.
    pub fn validate(&self) -> Result<()> {
        if self.attachments.len() > MAX_ATTACHMENTS {
            return Err(Error::Constraint(format!(
                "message may carry at most {MAX_ATTACHMENTS} attachments (got {})",
                self.attachments.len()
            )));
        }
        Ok(())
    }
}

/// Data for creating a new message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Target channel.
    pub channel_id: ChannelId,
    /// Document holding the body.
    pub content_ref: DocumentId,
    /// Thread root, for replies.
    pub thread_id: Option<MessageId>,
    /// Attachment documents.
    pub attachments: Vec<DocumentId>,
}
