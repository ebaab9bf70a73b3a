//! The handful of commands valid in every connection state (§4.5).

use anyhow::Result;
use imap_codec::imap_types::core::Tag;

use crate::capability::ServerCapability;
use crate::flow::Transition;
use crate::response::Response;

pub fn capability(tag: Tag<'static>, caps: &ServerCapability) -> Result<(Response, Transition)> {
    Ok((
        Response::build(tag.inner().to_string()).untagged(caps.to_line()).ok("CAPABILITY completed"),
        Transition::None,
    ))
}

pub fn noop_nothing(tag: Tag<'static>) -> Result<(Response, Transition)> {
    Ok((Response::build(tag.inner().to_string()).ok("NOOP completed"), Transition::None))
}

pub fn logout() -> Result<(Response, Transition)> {
    Ok((Response::bye("Server logging out"), Transition::Logout))
}

pub fn wrong_state(tag: Tag<'static>) -> Result<(Response, Transition)> {
    Ok((
        Response::build(tag.inner().to_string()).bad("Command not permitted in this state"),
        Transition::None,
    ))
}
