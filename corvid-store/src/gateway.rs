//! The Storage Gateway (§4.1): a thin, typed facade over the document
//! store. The concrete document database driver is out of scope (§1/§6);
//! this trait is the seam a real Mongo-like driver would implement. The
//! in-memory reference implementation lives in `crate::memory`.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::ident::{BlobId, MailboxId, MessageId, UserId};
use crate::model::{AttachmentBlob, JournalEntry, Mailbox, Message, User};

#[derive(Clone, Debug, Default)]
pub struct MailboxListOpts {
    pub subscribed_only: bool,
}

/// A query against the `messages` collection. `None` means "no constraint
/// on this axis"; the Search Compiler (`corvid-mail::search`) is the main
/// producer of these, but handlers build simple ones directly (EXPUNGE,
/// STORE, FETCH).
#[derive(Clone, Debug, Default)]
pub struct MessageQuery {
    pub mailbox: Option<MailboxId>,
    pub uids: Option<Vec<u32>>,
    pub deleted: Option<bool>,
    pub seen: Option<bool>,
    pub modseq_gt: Option<u64>,
    pub modseq_le: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct MessageUpdate {
    pub id: MessageId,
    pub flags: Option<std::collections::BTreeSet<String>>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    // --- users ---
    async fn find_user(&self, id: UserId) -> StoreResult<User>;
    async fn find_user_by_name(&self, username: &str) -> StoreResult<User>;
    async fn adjust_storage_used(&self, user: UserId, delta: i64) -> StoreResult<()>;

    // --- mailboxes ---
    async fn find_mailbox(&self, user: UserId, path: &str) -> StoreResult<Mailbox>;
    async fn find_mailbox_by_id(&self, id: MailboxId) -> StoreResult<Mailbox>;
    async fn list_mailboxes(&self, user: UserId, opts: MailboxListOpts) -> StoreResult<Vec<Mailbox>>;
    async fn insert_mailbox(&self, mailbox: Mailbox) -> StoreResult<()>;
    async fn update_mailbox(&self, mailbox: Mailbox) -> StoreResult<()>;
    async fn delete_mailbox(&self, id: MailboxId) -> StoreResult<()>;

    /// Atomically allocates `n` consecutive UIDs from `mailbox.uid_next` and
    /// returns the value `uid_next` had *before* the increment (so the
    /// caller's first allocated UID is the returned value). Invariant 1
    /// of §3: single-document read-modify-write, monotone, never reused.
    async fn find_and_increment_uidnext(&self, mailbox: MailboxId, n: u32) -> StoreResult<u32>;

    /// Atomically bumps `mailbox.modify_index` by one and returns the new
    /// value (the fresh MODSEQ to assign).
    async fn find_and_increment_modseq(&self, mailbox: MailboxId) -> StoreResult<u64>;

    // --- messages ---
    async fn find_message(&self, id: MessageId) -> StoreResult<Message>;
    async fn find_message_by_uid(&self, mailbox: MailboxId, uid: u32) -> StoreResult<Message>;
    async fn find_messages(&self, query: &MessageQuery) -> StoreResult<Vec<Message>>;
    async fn count_messages(&self, query: &MessageQuery) -> StoreResult<u64>;
    async fn insert_message(&self, message: Message) -> StoreResult<()>;
    async fn bulk_write(&self, updates: Vec<MessageUpdate>) -> StoreResult<()>;
    async fn delete_messages(&self, ids: &[MessageId]) -> StoreResult<()>;
    async fn aggregate_size(&self, mailbox: MailboxId) -> StoreResult<u64>;

    // --- journal ---
    async fn append_journal(&self, entries: Vec<JournalEntry>) -> StoreResult<()>;
    async fn journal_since(&self, mailbox: MailboxId, modseq: u64) -> StoreResult<Vec<JournalEntry>>;
    async fn trim_journal(&self, mailbox: MailboxId, older_than_modseq: u64) -> StoreResult<()>;

    // --- attachments ---
    async fn find_blob(&self, id: BlobId) -> StoreResult<AttachmentBlob>;
    async fn link_blob(&self, blob: BlobId, message: MessageId) -> StoreResult<()>;
    async fn unlink_blob(&self, blob: BlobId, message: MessageId) -> StoreResult<()>;
    async fn sweep_orphan_blobs(&self, blobs: &[BlobId]) -> StoreResult<u64>;

    // --- startup ---
    /// Declarative index manifest, verified/created at startup (§6).
    async fn ensure_indexes(&self) -> StoreResult<()>;
    async fn health_check(&self) -> StoreResult<()>;
}

pub type ArcGateway = std::sync::Arc<dyn Gateway>;
