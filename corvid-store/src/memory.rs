//! A minimal in-memory `Gateway`: the reference implementation used by
//! tests across the workspace, and a usable (if non-durable) backend for
//! local development. Data is lost when the process exits — fine for a
//! reference implementation, not for production (a real deployment plugs
//! in a document-database driver behind the same trait).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{StoreError, StoreResult};
use crate::gateway::{Gateway, MailboxListOpts, MessageQuery, MessageUpdate};
use crate::ident::{BlobId, MailboxId, MessageId, UserId};
use crate::model::{AttachmentBlob, JournalEntry, Mailbox, Message, User};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    users_by_name: HashMap<String, UserId>,
    mailboxes: HashMap<MailboxId, Mailbox>,
    messages: HashMap<MessageId, Message>,
    journal: HashMap<MailboxId, Vec<JournalEntry>>,
    blobs: HashMap<BlobId, AttachmentBlob>,
}

/// In-memory reference `Gateway`. Cheap to clone: it's an `Arc` around a
/// single mutex-guarded state, matching the corpus's `MemDb` pattern of a
/// single lock protecting the whole fixture rather than per-collection
/// locks (acceptable since this implementation is for tests and local
/// development, never a production deployment).
#[derive(Default)]
pub struct MemoryGateway(Mutex<State>);

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user directly; used by tests and the `corvidd` dev bootstrap
    /// to avoid re-implementing account creation for every test.
    pub fn seed_user(&self, user: User) {
        let mut st = self.0.lock().unwrap();
        st.users_by_name.insert(user.username.clone(), user.id);
        st.users.insert(user.id, user);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn find_user(&self, id: UserId) -> StoreResult<User> {
        self.lock().users.get(&id).cloned().ok_or(StoreError::NoSuchUser)
    }

    async fn find_user_by_name(&self, username: &str) -> StoreResult<User> {
        let st = self.lock();
        let id = st.users_by_name.get(username).ok_or(StoreError::NoSuchUser)?;
        st.users.get(id).cloned().ok_or(StoreError::NoSuchUser)
    }

    async fn adjust_storage_used(&self, user: UserId, delta: i64) -> StoreResult<()> {
        let mut st = self.lock();
        let u = st.users.get_mut(&user).ok_or(StoreError::NoSuchUser)?;
        u.storage_used += delta;
        Ok(())
    }

    async fn find_mailbox(&self, user: UserId, path: &str) -> StoreResult<Mailbox> {
        self.lock()
            .mailboxes
            .values()
            .find(|m| m.user == user && m.path == path)
            .cloned()
            .ok_or(StoreError::NoSuchMailbox)
    }

    async fn find_mailbox_by_id(&self, id: MailboxId) -> StoreResult<Mailbox> {
        self.lock().mailboxes.get(&id).cloned().ok_or(StoreError::NoSuchMailbox)
    }

    async fn list_mailboxes(&self, user: UserId, opts: MailboxListOpts) -> StoreResult<Vec<Mailbox>> {
        let mut v: Vec<Mailbox> = self
            .lock()
            .mailboxes
            .values()
            .filter(|m| m.user == user && (!opts.subscribed_only || m.subscribed))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(v)
    }

    async fn insert_mailbox(&self, mailbox: Mailbox) -> StoreResult<()> {
        let mut st = self.lock();
        if st
            .mailboxes
            .values()
            .any(|m| m.user == mailbox.user && m.path == mailbox.path)
        {
            return Err(StoreError::MailboxAlreadyExists);
        }
        st.mailboxes.insert(mailbox.id, mailbox);
        Ok(())
    }

    async fn update_mailbox(&self, mailbox: Mailbox) -> StoreResult<()> {
        let mut st = self.lock();
        if !st.mailboxes.contains_key(&mailbox.id) {
            return Err(StoreError::NoSuchMailbox);
        }
        st.mailboxes.insert(mailbox.id, mailbox);
        Ok(())
    }

    async fn delete_mailbox(&self, id: MailboxId) -> StoreResult<()> {
        let mut st = self.lock();
        st.mailboxes.remove(&id).ok_or(StoreError::NoSuchMailbox)?;
        st.journal.remove(&id);
        Ok(())
    }

    async fn find_and_increment_uidnext(&self, mailbox: MailboxId, n: u32) -> StoreResult<u32> {
        let mut st = self.lock();
        let m = st.mailboxes.get_mut(&mailbox).ok_or(StoreError::NoSuchMailbox)?;
        let previous = m.uid_next;
        m.uid_next = m
            .uid_next
            .checked_add(n)
            .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("uidnext overflow")))?;
        Ok(previous)
    }

    async fn find_and_increment_modseq(&self, mailbox: MailboxId) -> StoreResult<u64> {
        let mut st = self.lock();
        let m = st.mailboxes.get_mut(&mailbox).ok_or(StoreError::NoSuchMailbox)?;
        m.modify_index += 1;
        Ok(m.modify_index)
    }

    async fn find_message(&self, id: MessageId) -> StoreResult<Message> {
        self.lock().messages.get(&id).cloned().ok_or(StoreError::NoSuchMessage)
    }

    async fn find_message_by_uid(&self, mailbox: MailboxId, uid: u32) -> StoreResult<Message> {
        self.lock()
            .messages
            .values()
            .find(|m| m.mailbox == mailbox && m.uid == uid)
            .cloned()
            .ok_or(StoreError::NoSuchMessage)
    }

    async fn find_messages(&self, query: &MessageQuery) -> StoreResult<Vec<Message>> {
        let mut v: Vec<Message> = self
            .lock()
            .messages
            .values()
            .filter(|m| matches(m, query))
            .cloned()
            .collect();
        v.sort_by_key(|m| m.uid);
        Ok(v)
    }

    async fn count_messages(&self, query: &MessageQuery) -> StoreResult<u64> {
        Ok(self.lock().messages.values().filter(|m| matches(m, query)).count() as u64)
    }

    async fn insert_message(&self, message: Message) -> StoreResult<()> {
        self.lock().messages.insert(message.id, message);
        Ok(())
    }

    async fn bulk_write(&self, updates: Vec<MessageUpdate>) -> StoreResult<()> {
        let mut st = self.lock();
        for u in updates {
            if let Some(m) = st.messages.get_mut(&u.id) {
                if let Some(flags) = u.flags {
                    m.flags = flags;
                    m.resync_denorm_flags();
                }
            }
        }
        Ok(())
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> StoreResult<()> {
        let mut st = self.lock();
        for id in ids {
            st.messages.remove(id);
        }
        Ok(())
    }

    async fn aggregate_size(&self, mailbox: MailboxId) -> StoreResult<u64> {
        Ok(self
            .lock()
            .messages
            .values()
            .filter(|m| m.mailbox == mailbox)
            .map(|m| m.size)
            .sum())
    }

    async fn append_journal(&self, entries: Vec<JournalEntry>) -> StoreResult<()> {
        let mut st = self.lock();
        for e in entries {
            st.journal.entry(e.mailbox).or_default().push(e);
        }
        Ok(())
    }

    async fn journal_since(&self, mailbox: MailboxId, modseq: u64) -> StoreResult<Vec<JournalEntry>> {
        Ok(self
            .lock()
            .journal
            .get(&mailbox)
            .map(|v| v.iter().filter(|e| e.modseq > modseq).cloned().collect())
            .unwrap_or_default())
    }

    async fn trim_journal(&self, mailbox: MailboxId, older_than_modseq: u64) -> StoreResult<()> {
        if let Some(v) = self.lock().journal.get_mut(&mailbox) {
            v.retain(|e| e.modseq >= older_than_modseq);
        }
        Ok(())
    }

    async fn find_blob(&self, id: BlobId) -> StoreResult<AttachmentBlob> {
        self.lock()
            .blobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("no such blob")))
    }

    async fn link_blob(&self, blob: BlobId, message: MessageId) -> StoreResult<()> {
        let mut st = self.lock();
        let b = st.blobs.entry(blob).or_insert_with(|| AttachmentBlob {
            id: blob,
            ..Default::default()
        });
        b.messages.push(message);
        Ok(())
    }

    async fn unlink_blob(&self, blob: BlobId, message: MessageId) -> StoreResult<()> {
        if let Some(b) = self.lock().blobs.get_mut(&blob) {
            if let Some(pos) = b.messages.iter().position(|m| *m == message) {
                b.messages.remove(pos);
            }
        }
        Ok(())
    }

    async fn sweep_orphan_blobs(&self, blobs: &[BlobId]) -> StoreResult<u64> {
        let mut st = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let mut swept = 0;
        for id in blobs {
            if st.blobs.get(id).map(|b| b.is_orphan()).unwrap_or(false) {
                st.blobs.remove(id);
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        // The in-memory backend has no indexes to build; a real document
        // database driver would create the manifest of §6 here.
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn matches(m: &Message, q: &MessageQuery) -> bool {
    if let Some(mbox) = q.mailbox {
        if m.mailbox != mbox {
            return false;
        }
    }
    if let Some(uids) = &q.uids {
        if !uids.contains(&m.uid) {
            return false;
        }
    }
    if let Some(deleted) = q.deleted {
        if m.deleted != deleted {
            return false;
        }
    }
    if let Some(seen) = q.seen {
        if m.seen != seen {
            return false;
        }
    }
    if let Some(gt) = q.modseq_gt {
        if !(m.modseq > gt) {
            return false;
        }
    }
    if let Some(le) = q.modseq_le {
        if !(m.modseq <= le) {
            return false;
        }
    }
    true
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpecialUse;

    fn mk_user() -> User {
        User {
            id: UserId::gen(),
            username: "alice".into(),
            password_hash: String::new(),
            quota: 0,
            storage_used: 0,
        }
    }

    fn mk_mailbox(user: UserId, path: &str) -> Mailbox {
        Mailbox {
            id: MailboxId::gen(),
            user,
            path: path.into(),
            uid_validity: 1,
            uid_next: 1,
            modify_index: 0,
            subscribed: true,
            flags: vec![],
            special_use: None,
        }
    }

    #[tokio::test]
    async fn uidnext_allocation_is_monotone() {
        let gw = MemoryGateway::new();
        let user = mk_user();
        gw.seed_user(user.clone());
        let mbox = mk_mailbox(user.id, "INBOX");
        gw.insert_mailbox(mbox.clone()).await.unwrap();

        let a = gw.find_and_increment_uidnext(mbox.id, 1).await.unwrap();
        let b = gw.find_and_increment_uidnext(mbox.id, 1).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(gw.find_mailbox_by_id(mbox.id).await.unwrap().uid_next, 3);
    }

    #[tokio::test]
    async fn duplicate_mailbox_path_rejected() {
        let gw = MemoryGateway::new();
        let user = mk_user();
        gw.seed_user(user.clone());
        let mbox = mk_mailbox(user.id, "INBOX");
        gw.insert_mailbox(mbox.clone()).await.unwrap();
        let dup = mk_mailbox(user.id, "INBOX");
        assert!(matches!(
            gw.insert_mailbox(dup).await,
            Err(StoreError::MailboxAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn special_use_is_preserved_on_roundtrip() {
        let gw = MemoryGateway::new();
        let user = mk_user();
        gw.seed_user(user.clone());
        let mut mbox = mk_mailbox(user.id, "Trash");
        mbox.special_use = Some(SpecialUse::Trash);
        gw.insert_mailbox(mbox.clone()).await.unwrap();
        let back = gw.find_mailbox_by_id(mbox.id).await.unwrap();
        assert_eq!(back.special_use, Some(SpecialUse::Trash));
    }

    #[tokio::test]
    async fn orphan_blob_sweep_deletes_only_empty_multisets() {
        let gw = MemoryGateway::new();
        let msg = MessageId::gen();
        let blob_referenced = BlobId::gen();
        let blob_orphan = BlobId::gen();
        gw.link_blob(blob_referenced, msg).await.unwrap();
        gw.link_blob(blob_orphan, msg).await.unwrap();
        gw.unlink_blob(blob_orphan, msg).await.unwrap();

        let swept = gw
            .sweep_orphan_blobs(&[blob_referenced, blob_orphan])
            .await
            .unwrap();
        assert_eq!(swept, 1);
        assert!(gw.find_blob(blob_referenced).await.is_ok());
        assert!(gw.find_blob(blob_orphan).await.is_err());
    }
}
