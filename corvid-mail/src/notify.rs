//! Cross-session change notification (§4.3): every mutation to a mailbox
//! is durably recorded in the journal, then live sessions with that mailbox
//! selected are woken so they can pull the new entries on their own time.
//!
//! Delivery is a coalescing wake-up, not a message queue: a session that
//! misses three wake-ups because it was busy rendering a FETCH response
//! only needs to notice "something changed" once, then read forward from
//! its own `highest_modseq_seen` via `Gateway::journal_since`.

use std::collections::HashMap;
use std::sync::Mutex;

use corvid_store::error::StoreResult;
use corvid_store::gateway::ArcGateway;
use corvid_store::ident::MailboxId;
use corvid_store::model::JournalEntry;
use tokio::sync::mpsc;

/// A single mailbox's set of interested sessions. The channel is
/// bounded(1): a pending unread wake-up already means "go re-check", so a
/// second `try_send` while one is outstanding is correctly dropped.
#[derive(Default)]
struct MailboxSubs {
    wakers: Vec<mpsc::Sender<()>>,
}

pub struct Notifier {
    gateway: ArcGateway,
    subs: Mutex<HashMap<MailboxId, MailboxSubs>>,
}

impl Notifier {
    pub fn new(gateway: ArcGateway) -> Self {
        Self {
            gateway,
            subs: Mutex::new(HashMap::new()),
        }
    }

    /// Registers interest in a mailbox's journal, returning a receiver that
    /// fires (coalesced) whenever someone calls [`Notifier::publish`] for
    /// it. Drop the receiver (e.g. on UNSELECT) to unsubscribe.
    pub fn subscribe(&self, mailbox: MailboxId) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.entry(mailbox).or_default().wakers.push(tx);
        rx
    }

    /// Appends `entries` to the durable journal, then wakes every other
    /// live subscriber of that mailbox. `entries` must all share the same
    /// `mailbox`; callers build them from a single Message Handler or
    /// Command Dispatcher operation.
    pub async fn publish(&self, mailbox: MailboxId, entries: Vec<JournalEntry>) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.gateway.append_journal(entries).await?;
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = subs.get_mut(&mailbox) {
            m.wakers.retain(|tx| !matches!(tx.try_send(()), Err(mpsc::error::TrySendError::Closed(_))));
        }
        Ok(())
    }

    pub fn gateway(&self) -> &ArcGateway {
        &self.gateway
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_store::ident::{JournalId, MessageId};
    use corvid_store::memory::MemoryGateway;
    use corvid_store::model::JournalCommand;
    use std::sync::Arc;

    fn entry(mailbox: MailboxId, uid: u32) -> JournalEntry {
        JournalEntry {
            id: JournalId::gen(),
            mailbox,
            command: JournalCommand::Exists,
            uid,
            message: Some(MessageId::gen()),
            flags: None,
            ignore: None,
            modseq: 1,
            created_at: corvid_store::memory::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_are_woken_on_publish() {
        let gw: ArcGateway = Arc::new(MemoryGateway::new());
        let notifier = Notifier::new(gw);
        let mailbox = MailboxId::gen();
        let mut rx = notifier.subscribe(mailbox);

        notifier.publish(mailbox, vec![entry(mailbox, 1)]).await.unwrap();
        rx.try_recv().expect("should have been woken");
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_not_fatal() {
        let gw: ArcGateway = Arc::new(MemoryGateway::new());
        let notifier = Notifier::new(gw);
        let mailbox = MailboxId::gen();
        drop(notifier.subscribe(mailbox));

        notifier.publish(mailbox, vec![entry(mailbox, 1)]).await.unwrap();
    }
}
