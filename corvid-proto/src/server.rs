//! TCP/TLS accept loop and per-connection net loop (§4.7). Grounded on the
//! same accept/TLS/`FuturesUnordered`/graceful-shutdown shape as an
//! `imap-flow`-based server, but driving a plain `Framed<_, ImapCodec>`
//! directly instead of `ServerFlow`'s continuation-request state machine —
//! there is no separate session task here, `Instance` is owned inline by
//! the connection that accepted it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

use imap_codec::imap_types::command::CommandBody;

use corvid_mail::MessageHandler;
use corvid_mail::Notifier;
use corvid_store::gateway::ArcGateway;
use corvid_store::login::{ArcLoginProvider, ArcRateLimiter};

use crate::capability::ServerCapability;
use crate::codec::ImapCodec;
use crate::request::Request;
use crate::session::Instance;

pub struct Server {
    pub bind_addr: SocketAddr,
    pub login_provider: ArcLoginProvider,
    pub rate_limiter: ArcRateLimiter,
    pub gateway: ArcGateway,
    pub notifier: Arc<Notifier>,
    pub handler: Arc<MessageHandler>,
    pub tls: Option<TlsAcceptor>,
}

impl Server {
    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("IMAP server listening on {}", self.bind_addr);

        let mut connections = FuturesUnordered::new();
        let mut next_session_id: u64 = 0;

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, peer_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!(%peer_addr, "accepted connection");

            next_session_id += 1;
            let session_id = next_session_id;
            let instance = Instance::new(
                self.login_provider.clone(),
                self.rate_limiter.clone(),
                self.gateway.clone(),
                self.notifier.clone(),
                self.handler.clone(),
                peer_addr.ip(),
                session_id,
            );

            let tls = self.tls.clone();
            let conn = tokio::spawn(async move {
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(socket).await {
                        Ok(stream) => handle_connection(instance, stream, peer_addr).await,
                        Err(e) => {
                            tracing::error!(err=?e, %peer_addr, "TLS handshake failed");
                            return;
                        }
                    },
                    None => handle_connection(instance, socket, peer_addr).await,
                };
                if let Err(e) = result {
                    tracing::error!(err=?e, %peer_addr, "connection ended with error");
                }
            });
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("IMAP server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}
        Ok(())
    }
}

async fn handle_connection<S>(mut instance: Instance, stream: S, peer_addr: SocketAddr) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use futures::SinkExt;

    let mut framed = Framed::new(stream, ImapCodec::default());
    let greeting = format!(
        "* OK [{}] corvidd ready\r\n",
        ServerCapability.to_line().trim_start_matches("* CAPABILITY ")
    );
    framed.send(greeting).await?;

    loop {
        let req = match framed.next().await {
            Some(Ok(req)) => req,
            Some(Err(e)) => {
                framed.send(format!("* BAD {}\r\n", e)).await?;
                continue;
            }
            None => break,
        };

        let is_idle = matches!(
            &req,
            Request::Command(cmd) if matches!(cmd.body, CommandBody::Idle)
        );

        if is_idle {
            let tag = match &req {
                Request::Command(cmd) => cmd.tag.inner().to_string(),
                Request::IdleDone => unreachable!(),
            };
            framed.send("+ idling\r\n".to_string()).await?;
            framed.codec_mut().set_idling(true);

            let mut sub = instance.idle_subscribe();
            loop {
                tokio::select! {
                    next = framed.next() => {
                        match next {
                            Some(Ok(Request::IdleDone)) => break,
                            Some(Ok(Request::Command(_))) => continue,
                            Some(Err(e)) => {
                                tracing::warn!(err=?e, %peer_addr, "error while idling");
                                continue;
                            }
                            None => {
                                framed.codec_mut().set_idling(false);
                                return Ok(());
                            }
                        }
                    }
                    _ = async {
                        match sub.as_mut() {
                            Some(rx) => { rx.recv().await; }
                            None => futures::future::pending().await,
                        }
                    } => {
                        for line in instance.idle_catchup().await {
                            framed.send(format!("{}\r\n", line)).await?;
                        }
                    }
                }
            }

            framed.codec_mut().set_idling(false);
            framed.send(format!("{} OK IDLE terminated\r\n", tag)).await?;
            continue;
        }

        let resp = instance.request(req).await;
        let bye = resp.is_bye();
        framed.send(resp.render()).await?;
        if bye {
            break;
        }
    }

    tracing::info!(%peer_addr, "connection closed");
    Ok(())
}
