//! Room-kind-specific join and visibility rules.
//!
//! [`authorize`] is the pure decision. [`admit`] runs it against the
//! directory and performs the group auto-join, which must happen before the
//! user is registered as present anywhere.

use std::fmt;

use tracing::{debug, info};

use crate::directory::{Directory, Room, RoomKind};
use crate::error::{ChatError, ChatResult};
use crate::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotAMember,
    VerificationRequired,
    NotAdmin,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DenyReason::*;
        f.write_str(match self {
            NotAMember => "not a member",
            VerificationRequired => "verification required",
            NotAdmin => "not admin",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// Allowed once the user has been added to the room's members.
    AllowAutoJoin,
    Deny(DenyReason),
}

/// Whether a user holds a verified contact address. Only consulted for
/// group rooms the user is not yet a member of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    Verified,
    Unverified,
    Unknown,
}

pub fn authorize(room: &Room, user_id: &UserId, contact: Contact) -> Access {
    match room.kind {
        RoomKind::Public => Access::Allow,
        RoomKind::Private if room.is_member(user_id) => Access::Allow,
        RoomKind::Private => Access::Deny(DenyReason::NotAMember),
        RoomKind::Group if room.is_member(user_id) => Access::Allow,
        RoomKind::Group => match contact {
            Contact::Verified => Access::AllowAutoJoin,
            Contact::Unverified | Contact::Unknown => Access::Deny(DenyReason::VerificationRequired),
        },
    }
}

/// Rename, member removal and deletion.
pub fn authorize_admin(room: &Room, user_id: &UserId) -> Access {
    if room.admin.as_ref() == Some(user_id) {
        Access::Allow
    } else {
        Access::Deny(DenyReason::NotAdmin)
    }
}

/// Like [`authorize`] but without side effects: group non-members are
/// denied rather than joined. Used for read-only views.
pub fn check_visible(room: &Room, user_id: &UserId) -> ChatResult<()> {
    match authorize(room, user_id, Contact::Unknown) {
        Access::Allow => Ok(()),
        Access::AllowAutoJoin => Err(ChatError::AccessDenied(DenyReason::NotAMember)),
        Access::Deny(reason) => Err(ChatError::AccessDenied(reason)),
    }
}

pub fn check_admin(room: &Room, user_id: &UserId) -> ChatResult<()> {
    match authorize_admin(room, user_id) {
        Access::Deny(reason) => Err(ChatError::AccessDenied(reason)),
        _ => Ok(()),
    }
}

/// Authorizes `user_id` into `room`, auto-joining verified users to groups.
/// On success `room.members` reflects the join.
pub async fn admit(directory: &dyn Directory, room: &mut Room, user_id: &UserId) -> ChatResult<()> {
    let contact = if room.kind == RoomKind::Group && !room.is_member(user_id) {
        if directory.has_verified_contact(user_id).await? {
            Contact::Verified
        } else {
            Contact::Unverified
        }
    } else {
        Contact::Unknown
    };

    match authorize(room, user_id, contact) {
        Access::Allow => Ok(()),
        Access::AllowAutoJoin => {
            directory.add_member(&room.id, user_id).await?;
            room.members.push(user_id.clone());
            info!(room = %room.id, user = %user_id, "auto-joined group");
            Ok(())
        }
        Access::Deny(reason) => {
            debug!(room = %room.id, user = %user_id, %reason, "access denied");
            Err(ChatError::AccessDenied(reason))
        }
    }
}
