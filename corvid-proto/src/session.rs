//! Per-connection session: owns the state machine and the collaborators
//! every command handler needs (§4.5). One `Instance` lives for the life
//! of one TCP connection.

use std::net::IpAddr;
use std::sync::Arc;

use imap_codec::imap_types::command::Command;

use corvid_mail::MessageHandler;
use corvid_mail::Notifier;
use corvid_store::gateway::ArcGateway;
use corvid_store::login::{ArcLoginProvider, ArcRateLimiter};

use crate::capability::{ClientCapability, ServerCapability};
use crate::command::{anonymous, authenticated, selected};
use crate::flow;
use crate::request::Request;
use crate::response::Response;

pub struct Instance {
    pub login_provider: ArcLoginProvider,
    pub rate_limiter: ArcRateLimiter,
    pub gateway: ArcGateway,
    pub notifier: Arc<Notifier>,
    pub handler: Arc<MessageHandler>,
    pub server_capabilities: ServerCapability,
    pub client_capabilities: ClientCapability,
    pub state: flow::State,
    pub peer_addr: IpAddr,
    pub session_id: u64,
}

impl Instance {
    pub fn new(
        login_provider: ArcLoginProvider,
        rate_limiter: ArcRateLimiter,
        gateway: ArcGateway,
        notifier: Arc<Notifier>,
        handler: Arc<MessageHandler>,
        peer_addr: IpAddr,
        session_id: u64,
    ) -> Self {
        Self {
            login_provider,
            rate_limiter,
            gateway,
            notifier,
            handler,
            server_capabilities: ServerCapability,
            client_capabilities: ClientCapability::new(),
            state: flow::State::NotAuthenticated,
            peer_addr,
            session_id,
        }
    }

    pub async fn request(&mut self, req: Request) -> Response {
        match req {
            Request::Command(cmd) => self.command(cmd).await,
            // DONE outside of IDLE is simply ignored; IDLE itself is
            // handled by the net loop, which never forwards a bare
            // `Request::IdleDone` unless it was expecting one.
            Request::IdleDone => Response::build("*").ok(""),
        }
    }

    /// A session is only idle-able to any useful effect once a mailbox is
    /// selected — in the authenticated or not-authenticated states there is
    /// no journal to watch, so IDLE there just blocks until DONE.
    pub fn idle_subscribe(&self) -> Option<tokio::sync::mpsc::Receiver<()>> {
        match &self.state {
            flow::State::Selected(_, mailbox) => Some(self.notifier.subscribe(mailbox.mailbox)),
            _ => None,
        }
    }

    /// Pulls forward and renders any journal entries that arrived while
    /// idling, without touching the state machine (no command, no tagged
    /// completion — just the untagged lines RFC 2177 allows during IDLE).
    pub async fn idle_catchup(&mut self) -> Vec<String> {
        match &mut self.state {
            flow::State::Selected(_, mailbox) => {
                crate::command::selected::refresh_lines(&self.gateway, mailbox)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(err=?e, "idle catch-up failed");
                        Vec::new()
                    })
            }
            _ => Vec::new(),
        }
    }

    async fn command(&mut self, cmd: Command<'static>) -> Response {
        let tag = cmd.tag.inner().to_string();
        let result = match &mut self.state {
            flow::State::NotAuthenticated => {
                let ctx = anonymous::AnonymousContext {
                    req: &cmd,
                    login_provider: &self.login_provider,
                    rate_limiter: &self.rate_limiter,
                    peer_addr: self.peer_addr,
                    server_capabilities: &self.server_capabilities,
                };
                anonymous::dispatch(ctx).await
            }
            flow::State::Authenticated(user) => {
                let ctx = authenticated::AuthenticatedContext {
                    req: &cmd,
                    server_capabilities: &self.server_capabilities,
                    client_capabilities: &mut self.client_capabilities,
                    gateway: &self.gateway,
                    notifier: &self.notifier,
                    handler: &self.handler,
                    user,
                    session_id: self.session_id,
                };
                authenticated::dispatch(ctx).await
            }
            flow::State::Selected(user, mailbox) => {
                let ctx = selected::SelectedContext {
                    req: &cmd,
                    server_capabilities: &self.server_capabilities,
                    client_capabilities: &mut self.client_capabilities,
                    gateway: &self.gateway,
                    notifier: &self.notifier,
                    handler: &self.handler,
                    user,
                    mailbox,
                    session_id: self.session_id,
                };
                selected::dispatch(ctx).await
            }
            flow::State::Logout => Ok((Response::build(tag.clone()).bad("No commands are allowed in the LOGOUT state."), flow::Transition::None)),
        };

        let (resp, tr) = result.unwrap_or_else(|e| {
            tracing::error!(err=?e, tag=%tag, "command handler failed");
            (Response::build(tag).bad("Internal error while processing command"), flow::Transition::None)
        });

        if let Err(e) = self.state.apply(tr) {
            tracing::error!(err=?e, "illegal state transition");
        }
        resp
    }
}
