//! Per-connection selected-mailbox state (§4.4): the MSN/UID view, CONDSTORE
//! bookkeeping and the queue of not-yet-rendered unsolicited responses a
//! session owes its client.

use std::collections::BTreeSet;

use corvid_store::ident::{MailboxId, UserId};
use corvid_store::model::JournalCommand;
use corvid_store::model::JournalEntry;

use crate::uidindex::UidIndex;

/// One notification a session has absorbed from the journal but not yet
/// rendered as a response line. Rendering (into `* N EXISTS`, `* N EXPUNGE`,
/// `* N FETCH (...)`) is the Command Dispatcher's job; this crate only
/// decides what happened and in what order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingEvent {
    Exists { msn: u32 },
    Expunge { msn: u32 },
    Fetch { msn: u32, uid: u32, flags: BTreeSet<String> },
}

/// The state a session carries while a mailbox is selected. Dropped (and a
/// fresh one built) on every SELECT/EXAMINE; the mailbox's own state is
/// long-lived in the gateway, this is just one client's lens on it.
pub struct SessionState {
    /// Stable per-connection id, stamped on every `JournalEntry` this
    /// session produces so it is never re-delivered its own change.
    pub session_id: u64,
    pub user: UserId,
    pub mailbox: MailboxId,
    pub uids: UidIndex,
    pub highest_modseq_seen: u64,
    /// Set by EXAMINE, or a SELECT that lost a race with a read-only
    /// server policy; STORE/EXPUNGE/APPEND-to-self must be rejected.
    pub writes_disallowed: bool,
    pub condstore_enabled: bool,
    pub qresync_enabled: bool,
    pending: Vec<PendingEvent>,
}

impl SessionState {
    pub fn new(session_id: u64, user: UserId, mailbox: MailboxId, uids: Vec<u32>, highest_modseq: u64, writes_disallowed: bool) -> Self {
        Self {
            session_id,
            user,
            mailbox,
            uids: UidIndex::new(uids),
            highest_modseq_seen: highest_modseq,
            writes_disallowed,
            condstore_enabled: false,
            qresync_enabled: false,
            pending: Vec::new(),
        }
    }

    pub fn exists(&self) -> u32 {
        self.uids.len()
    }

    /// Folds a batch of journal entries (already filtered to this mailbox,
    /// in modseq order) into the session's view, suppressing entries this
    /// very session produced, and queues the resulting notifications in the
    /// order §4.4 requires a flush to render them: EXISTS, then FETCH, then
    /// EXPUNGE. EXPUNGE removal is deferred to a second pass over the whole
    /// batch and applied highest-UID first, so each captured MSN reflects
    /// its true pre-batch position rather than one already shifted by an
    /// earlier removal in the same flush that hasn't been reported yet.
    pub fn absorb(&mut self, entries: &[JournalEntry]) {
        let mut exists_events = Vec::new();
        let mut fetch_events = Vec::new();
        let mut expunge_uids: Vec<u32> = Vec::new();

        for e in entries {
            if e.ignore == Some(self.session_id) {
                self.highest_modseq_seen = self.highest_modseq_seen.max(e.modseq);
                continue;
            }
            match e.command {
                JournalCommand::Exists => {
                    self.uids.insert(e.uid);
                    if let Some(msn) = self.uids.msn_of_uid(e.uid) {
                        exists_events.push(PendingEvent::Exists { msn });
                    }
                }
                JournalCommand::Fetch => {
                    // A pure flag change: the message must still be in our
                    // view (an EXPUNGE for a UID we never learned about
                    // produces no event, by the same logic).
                    if let Some(msn) = self.uids.msn_of_uid(e.uid) {
                        if let Some(flags) = &e.flags {
                            fetch_events.push(PendingEvent::Fetch {
                                msn,
                                uid: e.uid,
                                flags: flags.clone(),
                            });
                        }
                    }
                }
                JournalCommand::Expunge => expunge_uids.push(e.uid),
            }
            self.highest_modseq_seen = self.highest_modseq_seen.max(e.modseq);
        }

        expunge_uids.sort_unstable();
        expunge_uids.dedup();
        let mut expunge_events = Vec::with_capacity(expunge_uids.len());
        for uid in expunge_uids.into_iter().rev() {
            if let Some(msn) = self.uids.remove(uid) {
                expunge_events.push(PendingEvent::Expunge { msn });
            }
        }

        self.pending.extend(exists_events);
        self.pending.extend(fetch_events);
        self.pending.extend(expunge_events);
    }

    /// Drains everything absorbed so far, already in the order `absorb`
    /// queued it (EXISTS, then FETCH, then EXPUNGE), for the Command
    /// Dispatcher to render as untagged responses.
    pub fn drain_pending(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_store::ident::{JournalId, MessageId};

    fn exists(mailbox: MailboxId, uid: u32, modseq: u64, ignore: Option<u64>) -> JournalEntry {
        JournalEntry {
            id: JournalId::gen(),
            mailbox,
            command: JournalCommand::Exists,
            uid,
            message: Some(MessageId::gen()),
            flags: None,
            ignore,
            modseq,
            created_at: corvid_store::memory::now(),
        }
    }

    fn expunge(mailbox: MailboxId, uid: u32, modseq: u64) -> JournalEntry {
        JournalEntry {
            id: JournalId::gen(),
            mailbox,
            command: JournalCommand::Expunge,
            uid,
            message: None,
            flags: None,
            ignore: None,
            modseq,
            created_at: corvid_store::memory::now(),
        }
    }

    #[test]
    fn own_changes_are_not_redelivered() {
        let mailbox = MailboxId::gen();
        let mut s = SessionState::new(42, UserId::gen(), mailbox, vec![], 0, false);
        s.absorb(&[exists(mailbox, 1, 1, Some(42))]);
        assert!(!s.has_pending());
        assert_eq!(s.exists(), 0, "own-change suppression must not skip the index update");
        assert_eq!(s.highest_modseq_seen, 1);
    }

    #[test]
    fn exists_precedes_expunge_in_drain_order_even_when_absorbed_first() {
        let mailbox = MailboxId::gen();
        let mut s = SessionState::new(1, UserId::gen(), mailbox, vec![10, 20], 0, false);
        // uid 10 is expunged and uid 30 arrives in the same batch, with the
        // expunge entry ordered first (lower modseq) — the drained order
        // must still be EXISTS before EXPUNGE regardless of arrival order.
        s.absorb(&[expunge(mailbox, 10, 2), exists(mailbox, 30, 3, None)]);
        let drained = s.drain_pending();
        assert_eq!(
            drained,
            vec![PendingEvent::Exists { msn: 3 }, PendingEvent::Expunge { msn: 1 }]
        );
    }

    #[test]
    fn expunge_batch_is_reported_highest_msn_first() {
        let mailbox = MailboxId::gen();
        let mut s = SessionState::new(1, UserId::gen(), mailbox, vec![10, 20, 30, 40], 0, false);
        s.absorb(&[expunge(mailbox, 20, 1), expunge(mailbox, 40, 2)]);
        let drained = s.drain_pending();
        assert_eq!(
            drained,
            vec![PendingEvent::Expunge { msn: 4 }, PendingEvent::Expunge { msn: 2 }]
        );
    }
}
