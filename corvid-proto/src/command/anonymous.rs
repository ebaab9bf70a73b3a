//! Not Authenticated state (§4.5): only LOGIN (plus the any-state trio)
//! is permitted. STARTTLS/AUTHENTICATE are out of scope per spec
//! Non-goals — TLS is terminated by the listener before a session ever
//! reaches this state.

use std::net::IpAddr;

use anyhow::Result;
use imap_codec::imap_types::command::{Command, CommandBody};
use imap_codec::imap_types::core::AString;

use corvid_store::login::{ArcLoginProvider, ArcRateLimiter};

use crate::capability::ServerCapability;
use crate::command::anystate;
use crate::flow::Transition;
use crate::response::Response;

pub struct AnonymousContext<'a> {
    pub req: &'a Command<'static>,
    pub login_provider: &'a ArcLoginProvider,
    pub rate_limiter: &'a ArcRateLimiter,
    pub peer_addr: IpAddr,
    pub server_capabilities: &'a ServerCapability,
}

pub async fn dispatch(ctx: AnonymousContext<'_>) -> Result<(Response, Transition)> {
    match &ctx.req.body {
        CommandBody::Noop => anystate::noop_nothing(ctx.req.tag.clone()),
        CommandBody::Capability => anystate::capability(ctx.req.tag.clone(), ctx.server_capabilities),
        CommandBody::Logout => anystate::logout(),
        CommandBody::Login { username, password } => login(&ctx, username.clone(), password.declassify().clone()).await,
        _ => anystate::wrong_state(ctx.req.tag.clone()),
    }
}

async fn login(ctx: &AnonymousContext<'_>, username: AString<'static>, password: AString<'static>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let username = String::from_utf8(username.as_ref().to_vec())?;
    let password = String::from_utf8(password.as_ref().to_vec())?;

    if !ctx.rate_limiter.check(&username, ctx.peer_addr).await {
        return Ok((
            Response::build(tag).no("[AUTHENTICATIONFAILED] Too many attempts, try again later."),
            Transition::None,
        ));
    }

    match ctx.login_provider.login(&username, &password).await {
        Some(user) => {
            tracing::info!(username = %username, "login succeeded");
            Ok((Response::build(tag).ok("Logged in"), Transition::Authenticate(user)))
        }
        None => {
            tracing::info!(username = %username, "login failed");
            Ok((Response::build(tag).no("[AUTHENTICATIONFAILED] Authentication failed."), Transition::None))
        }
    }
}
