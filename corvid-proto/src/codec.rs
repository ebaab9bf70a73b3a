//! Wire framing: a `tokio_util::codec::{Decoder, Encoder}` pair wrapping
//! `imap-codec`'s `CommandCodec`, grounded on the same "read a line, try to
//! decode, ask for more on Incomplete/LiteralFound" loop a hand-rolled IMAP
//! server (and `imap-flow`'s own `ServerFlow` internals) both use — kept
//! here as a plain codec rather than adopting `imap-flow` itself, since the
//! latter's continuation-request state machine is built around a command
//! loop this server doesn't need: every literal this server accepts is
//! non-synchronizing (`LITERAL+`), so there is never a continuation
//! response to send before the client keeps writing.

use bytes::{Buf, BytesMut};
use imap_codec::decode::{CommandDecodeError, Decoder as _};
use imap_codec::CommandCodec;
use tokio_util::codec::{Decoder, Encoder};

use crate::request::Request;

#[derive(Default)]
pub struct ImapCodec {
    inner: CommandCodec,
    /// Set once a literal's announced length is known; we refuse to even
    /// try decoding again until the buffer holds that many more bytes, to
    /// avoid quadratic re-parsing of a growing literal.
    awaiting: Option<usize>,
    /// Set by the net loop once it has accepted an IDLE and sent the `+`
    /// continuation. While true, the only legal input is a bare `DONE` line
    /// — imap-codec's `CommandCodec` never sees it.
    idling: bool,
}

impl ImapCodec {
    pub fn set_idling(&mut self, idling: bool) {
        self.idling = idling;
    }
}

impl Decoder for ImapCodec {
    type Item = Request;
    type Error = anyhow::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, Self::Error> {
        if self.idling {
            let pos = match buf.windows(2).position(|w| w == b"\r\n") {
                Some(p) => p,
                None => return Ok(None),
            };
            let line = buf.split_to(pos + 2);
            let trimmed = std::str::from_utf8(&line[..pos]).unwrap_or("").trim();
            if trimmed.eq_ignore_ascii_case("DONE") {
                return Ok(Some(Request::IdleDone));
            }
            // Anything else while idling is noise; drop it and keep waiting.
            return Ok(None);
        }

        if let Some(need) = self.awaiting {
            if buf.len() < need {
                return Ok(None);
            }
        }

        match self.inner.decode(buf) {
            Ok((remainder, command)) => {
                let consumed = buf.len() - remainder.len();
                let command = command.to_static();
                buf.advance(consumed);
                self.awaiting = None;
                Ok(Some(Request::Command(command)))
            }
            Err(CommandDecodeError::Incomplete) => Ok(None),
            Err(CommandDecodeError::LiteralFound { length, .. }) => {
                self.awaiting = Some(buf.len() + length as usize);
                Ok(None)
            }
            Err(CommandDecodeError::Failed) => {
                // Drop up to (and including) the next CRLF so a single
                // malformed line doesn't wedge the connection forever.
                if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                    buf.advance(pos + 2);
                } else {
                    buf.clear();
                }
                self.awaiting = None;
                Err(anyhow::anyhow!("command parse error"))
            }
        }
    }
}

impl Encoder<String> for ImapCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}
