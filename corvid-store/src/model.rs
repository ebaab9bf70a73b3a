//! The data model of §3: users, mailboxes, messages, journal entries and
//! attachment blobs, plus the invariants the gateway is trusted to uphold.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::{BlobId, JournalId, MailboxId, MessageId, UserId};

pub const MAX_MAILBOX_FLAGS: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Argon2-encoded password hash (adaptive, salted).
    pub password_hash: String,
    /// Bytes, 0 = unlimited.
    pub quota: u64,
    /// Monotonically adjusted; clamp to >= 0 on read, never at write.
    pub storage_used: i64,
}

impl User {
    /// Invariant 5 of §3: never expose negative storage, even if the
    /// running total drifted below zero due to a missed decrement.
    pub fn storage_used_clamped(&self) -> u64 {
        self.storage_used.max(0) as u64
    }

    pub fn quota_bytes(&self, server_max_storage: u64) -> u64 {
        if self.quota > 0 {
            self.quota
        } else {
            server_max_storage
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpecialUse {
    Sent,
    Trash,
    Junk,
    Drafts,
    Archive,
}

impl SpecialUse {
    pub fn as_flag(&self) -> &'static str {
        match self {
            SpecialUse::Sent => "\\Sent",
            SpecialUse::Trash => "\\Trash",
            SpecialUse::Junk => "\\Junk",
            SpecialUse::Drafts => "\\Drafts",
            SpecialUse::Archive => "\\Archive",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub user: UserId,
    /// `/`-separated, case-sensitive.
    pub path: String,
    pub uid_validity: u32,
    /// Next UID to assign; strictly increasing, never reused.
    pub uid_next: u32,
    /// Highest MODSEQ ever assigned in this mailbox.
    pub modify_index: u64,
    pub subscribed: bool,
    /// Custom keywords ever seen, capped at MAX_MAILBOX_FLAGS.
    pub flags: Vec<String>,
    pub special_use: Option<SpecialUse>,
}

impl Mailbox {
    pub fn learn_flag(&mut self, flag: &str) -> bool {
        if self.flags.iter().any(|f| f == flag) {
            return false;
        }
        if self.flags.len() >= MAX_MAILBOX_FLAGS {
            return false;
        }
        self.flags.push(flag.to_string());
        true
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageSource {
    Imap,
    ImapCopy,
    ImapMove,
    Smtp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageMeta {
    pub source: MessageSource,
    pub recipient: Option<String>,
    pub ingest_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeaderField {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<String>,
    pub sender: Vec<String>,
    pub reply_to: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BodyStructure {
    /// A rendered IMAP BODYSTRUCTURE fragment, computed by the indexer
    /// collaborator (out of scope here); opaque to the core.
    pub rendered: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub mailbox: MailboxId,
    pub uid: u32,
    pub modseq: u64,
    pub internaldate: DateTime<Utc>,
    pub headerdate: DateTime<Utc>,
    pub flags: BTreeSet<String>,
    pub seen: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub size: u64,
    pub envelope: Envelope,
    pub bodystructure: BodyStructure,
    pub mime_tree: Option<BlobId>,
    pub headers: Vec<HeaderField>,
    pub meta: MessageMeta,
    pub attachments: Vec<BlobId>,
}

impl Message {
    /// Invariant 4 of §3: denormalized booleans must track flag membership.
    pub fn resync_denorm_flags(&mut self) {
        self.seen = self.flags.contains("\\Seen");
        self.flagged = self.flags.contains("\\Flagged");
        self.deleted = self.flags.contains("\\Deleted");
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum JournalCommand {
    Exists,
    Expunge,
    Fetch,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalId,
    pub mailbox: MailboxId,
    pub command: JournalCommand,
    pub uid: u32,
    pub message: Option<MessageId>,
    pub flags: Option<BTreeSet<String>>,
    /// Session id that produced the change; that session must not be
    /// re-delivered its own entry.
    pub ignore: Option<u64>,
    pub modseq: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttachmentBlob {
    pub id: BlobId,
    pub user: Option<UserId>,
    pub size: u64,
    /// Multiset of message ids referencing this blob; eligible for
    /// deletion once empty.
    pub messages: Vec<MessageId>,
}

impl AttachmentBlob {
    pub fn is_orphan(&self) -> bool {
        self.messages.is_empty()
    }
}
