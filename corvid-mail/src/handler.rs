//! Message Handler (§4.2): the two operations that move bytes across
//! mailbox boundaries — delivering a brand new message (APPEND, and SMTP
//! ingestion outside the scope of this crate) and relocating an existing
//! one (MOVE). Both must leave uid/modseq allocation, the journal and the
//! user's storage counter mutually consistent even if the caller is
//! cancelled partway — there is only one await point per allocated id.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use corvid_store::error::{StoreError, StoreResult};
use corvid_store::gateway::ArcGateway;
use corvid_store::ident::{JournalId, MailboxId, MessageId};
use corvid_store::model::{Envelope, HeaderField, JournalCommand, JournalEntry, Message, MessageMeta};

use crate::notify::Notifier;

/// Everything the transport/parsing layer has already extracted out of a
/// RFC 5322 blob before handing it to the core; rendering MIME structure
/// and header extraction are the (out of scope) Indexer's job, not this
/// crate's.
pub struct IncomingMessage {
    pub headerdate: DateTime<Utc>,
    pub flags: BTreeSet<String>,
    pub size: u64,
    pub envelope: Envelope,
    pub headers: Vec<HeaderField>,
    pub meta: MessageMeta,
}

pub struct MessageHandler {
    gateway: ArcGateway,
    notifier: Arc<Notifier>,
    /// Bytes, 0 = unlimited. §6 server-wide defaults, overridden per-user by
    /// `User::quota_bytes`.
    max_message: u64,
    max_storage: u64,
}

impl MessageHandler {
    pub fn new(gateway: ArcGateway, notifier: Arc<Notifier>, max_message: u64, max_storage: u64) -> Self {
        Self { gateway, notifier, max_message, max_storage }
    }

    pub fn max_message(&self) -> u64 {
        self.max_message
    }

    pub fn max_storage(&self) -> u64 {
        self.max_storage
    }

    /// Delivers a new message into `mailbox`, allocating its UID and
    /// MODSEQ atomically, then publishes the EXISTS journal entry.
    /// `ignore` is the producing session's id when delivery is a result of
    /// an IMAP command in the same connection (APPEND), `None` for
    /// out-of-band delivery (SMTP) which nobody should suppress.
    pub async fn add(&self, mailbox: MailboxId, msg: IncomingMessage, ignore: Option<u64>) -> StoreResult<(MessageId, u32)> {
        let owner = self.gateway.find_mailbox_by_id(mailbox).await?.user;
        let user = self.gateway.find_user(owner).await?;
        let quota = user.quota_bytes(self.max_storage);
        if quota > 0 && user.storage_used_clamped() + msg.size > quota {
            return Err(StoreError::OverQuota);
        }

        let uid = self.gateway.find_and_increment_uidnext(mailbox, 1).await?;
        let modseq = self.gateway.find_and_increment_modseq(mailbox).await?;
        let now = corvid_store::memory::now();
        let id = MessageId::gen();
        let mut flags = msg.flags;
        let seen = flags.contains("\\Seen");
        let flagged = flags.contains("\\Flagged");
        let deleted = flags.contains("\\Deleted");
        // \Recent has no persistent storage representation in this model;
        // it is derived by the dispatcher from "uid >= the session's
        // uid_next at SELECT time", per §4.5.
        flags.remove("\\Recent");

        let message = Message {
            id,
            mailbox,
            uid,
            modseq,
            internaldate: now,
            headerdate: msg.headerdate,
            flags,
            seen,
            flagged,
            deleted,
            size: msg.size,
            envelope: msg.envelope,
            bodystructure: Default::default(),
            mime_tree: None,
            headers: msg.headers,
            meta: msg.meta,
            attachments: Vec::new(),
        };
        self.gateway.insert_message(message).await?;
        self.gateway.adjust_storage_used(owner, msg.size as i64).await?;

        self.notifier
            .publish(
                mailbox,
                vec![JournalEntry {
                    id: JournalId::gen(),
                    mailbox,
                    command: JournalCommand::Exists,
                    uid,
                    message: Some(id),
                    flags: None,
                    ignore,
                    modseq,
                    created_at: now,
                }],
            )
            .await?;

        Ok((id, uid))
    }

    /// Relocates messages from `source` to `dest`: each keeps its flags and
    /// internal date but is assigned a fresh UID in the destination
    /// (invariant 1 of §3 — UIDs are never reused, not even across a
    /// rename-by-move). Returns `(source_uid, dest_uid)` pairs in the same
    /// order as `uids`, for the caller to render a MOVE/UIDPLUS response.
    pub async fn move_messages(&self, source: MailboxId, dest: MailboxId, uids: &[u32], session_id: u64) -> StoreResult<Vec<(u32, u32)>> {
        let mut pairs = Vec::with_capacity(uids.len());
        let mut exists_entries = Vec::with_capacity(uids.len());
        let mut expunge_entries = Vec::with_capacity(uids.len());

        for &src_uid in uids {
            let mut message = self.gateway.find_message_by_uid(source, src_uid).await?;
            let source_id = message.id;
            let new_uid = self.gateway.find_and_increment_uidnext(dest, 1).await?;
            let dest_modseq = self.gateway.find_and_increment_modseq(dest).await?;
            let src_modseq = self.gateway.find_and_increment_modseq(source).await?;

            let dest_id = MessageId::gen();
            message.id = dest_id;
            message.mailbox = dest;
            message.uid = new_uid;
            message.modseq = dest_modseq;
            self.gateway.insert_message(message).await?;
            self.gateway.delete_messages(&[source_id]).await?;

            exists_entries.push(JournalEntry {
                id: JournalId::gen(),
                mailbox: dest,
                command: JournalCommand::Exists,
                uid: new_uid,
                message: Some(dest_id),
                flags: None,
                ignore: Some(session_id),
                modseq: dest_modseq,
                created_at: corvid_store::memory::now(),
            });
            expunge_entries.push(JournalEntry {
                id: JournalId::gen(),
                mailbox: source,
                command: JournalCommand::Expunge,
                uid: src_uid,
                message: None,
                flags: None,
                ignore: Some(session_id),
                modseq: src_modseq,
                created_at: corvid_store::memory::now(),
            });
            pairs.push((src_uid, new_uid));
        }

        self.notifier.publish(source, expunge_entries).await?;
        self.notifier.publish(dest, exists_entries).await?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_store::memory::MemoryGateway;
    use corvid_store::model::{Mailbox, MessageSource, User};

    fn mk_user() -> User {
        User {
            id: corvid_store::ident::UserId::gen(),
            username: "alice".into(),
            password_hash: String::new(),
            quota: 0,
            storage_used: 0,
        }
    }

    fn mk_mailbox(user: corvid_store::ident::UserId, path: &str) -> Mailbox {
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

    fn incoming(size: u64) -> IncomingMessage {
        IncomingMessage {
            headerdate: corvid_store::memory::now(),
            flags: BTreeSet::new(),
            size,
            envelope: Envelope::default(),
            headers: vec![],
            meta: MessageMeta {
                source: MessageSource::Imap,
                recipient: None,
                ingest_time: corvid_store::memory::now(),
            },
        }
    }

    #[tokio::test]
    async fn add_allocates_uid_and_bumps_storage() {
        let memory = Arc::new(MemoryGateway::new());
        let gw: ArcGateway = memory.clone();
        let notifier = Arc::new(Notifier::new(gw.clone()));
        let handler = MessageHandler::new(gw.clone(), notifier, 0, 0);

        let user = mk_user();
        memory.seed_user(user.clone());
        let mbox = mk_mailbox(user.id, "INBOX");
        gw.insert_mailbox(mbox.clone()).await.unwrap();

        let (_, uid1) = handler.add(mbox.id, incoming(100), None).await.unwrap();
        let (_, uid2) = handler.add(mbox.id, incoming(50), None).await.unwrap();
        assert_eq!((uid1, uid2), (1, 2));
        assert_eq!(gw.find_user(user.id).await.unwrap().storage_used_clamped(), 150);
    }

    #[tokio::test]
    async fn add_rejects_when_over_quota() {
        let memory = Arc::new(MemoryGateway::new());
        let gw: ArcGateway = memory.clone();
        let notifier = Arc::new(Notifier::new(gw.clone()));
        let handler = MessageHandler::new(gw.clone(), notifier, 0, 0);

        let mut user = mk_user();
        user.quota = 100;
        memory.seed_user(user.clone());
        let mbox = mk_mailbox(user.id, "INBOX");
        gw.insert_mailbox(mbox.clone()).await.unwrap();

        handler.add(mbox.id, incoming(80), None).await.unwrap();
        let err = handler.add(mbox.id, incoming(50), None).await.unwrap_err();
        assert!(matches!(err, StoreError::OverQuota));
        assert_eq!(gw.find_user(user.id).await.unwrap().storage_used_clamped(), 80);
    }

    #[tokio::test]
    async fn move_assigns_fresh_uid_and_removes_source() {
        let memory = Arc::new(MemoryGateway::new());
        let gw: ArcGateway = memory.clone();
        let notifier = Arc::new(Notifier::new(gw.clone()));
        let handler = MessageHandler::new(gw.clone(), notifier, 0, 0);

        let user = mk_user();
        memory.seed_user(user.clone());
        let src = mk_mailbox(user.id, "INBOX");
        let dst = mk_mailbox(user.id, "Archive");
        gw.insert_mailbox(src.clone()).await.unwrap();
        gw.insert_mailbox(dst.clone()).await.unwrap();

        let (_, uid) = handler.add(src.id, incoming(10), None).await.unwrap();
        let pairs = handler.move_messages(src.id, dst.id, &[uid], 1).await.unwrap();
        assert_eq!(pairs, vec![(1, 1)]);
        assert!(gw.find_message_by_uid(src.id, uid).await.is_err());
        assert!(gw.find_message_by_uid(dst.id, 1).await.is_ok());
    }
}
