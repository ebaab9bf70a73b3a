pub mod anonymous;
pub mod anystate;
pub mod authenticated;
pub mod selected;

use anyhow::{anyhow, Result};
use imap_codec::imap_types::mailbox::Mailbox as MailboxCodec;

/// Resolves an `imap_codec` mailbox token (which special-cases `INBOX`) to
/// this server's plain path representation.
pub struct MailboxName<'a>(pub &'a MailboxCodec<'a>);

impl<'a> TryFrom<MailboxName<'a>> for String {
    type Error = anyhow::Error;

    fn try_from(v: MailboxName<'a>) -> Result<String> {
        match v.0 {
            MailboxCodec::Inbox => Ok("INBOX".to_string()),
            MailboxCodec::Other(name) => {
                std::str::from_utf8(name.as_ref()).map(|s| s.to_string()).map_err(|e| anyhow!(e))
            }
        }
    }
}
