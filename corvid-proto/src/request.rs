use imap_codec::imap_types::command::Command;

/// What the net loop hands to the session task. IDLE is modeled as a
/// distinct command rather than threaded through `CommandBody` because
/// imap-codec's `CommandCodec` does not parse IDLE's body — the DONE
/// continuation is a separate line the framing layer must recognize itself.
#[derive(Debug)]
pub enum Request {
    Command(Command<'static>),
    IdleDone,
}
