//! Drives a real `corvid_proto::server::Server` over a loopback TCP socket
//! with the same component wiring `run_daemon` in `main.rs` assembles, to
//! catch regressions that only show up once the pieces are plugged together
//! (greeting format, LOGIN/SELECT/LOGOUT framing) rather than through direct
//! `Instance::request` calls as `corvid-proto`'s own scenario tests do.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use corvid_mail::{MessageHandler, Notifier};
use corvid_proto::server::Server;
use corvid_store::gateway::{ArcGateway, Gateway};
use corvid_store::ident::MailboxId;
use corvid_store::login::{hash_password, GatewayLoginProvider, SlidingWindowLimiter};
use corvid_store::memory::MemoryGateway;
use corvid_store::model::{Mailbox, User};

async fn spawn_server() -> SocketAddr {
    let memory = Arc::new(MemoryGateway::new());
    memory.ensure_indexes().await.unwrap();

    let user_id = corvid_store::ident::UserId::gen();
    memory.seed_user(User {
        id: user_id,
        username: "alice".to_string(),
        password_hash: hash_password("hunter2").unwrap(),
        quota: 0,
        storage_used: 0,
    });
    let gateway: ArcGateway = memory.clone();
    gateway
        .insert_mailbox(Mailbox {
            id: MailboxId::gen(),
            user: user_id,
            path: "INBOX".to_string(),
            uid_validity: 1,
            uid_next: 1,
            modify_index: 1,
            subscribed: true,
            flags: Vec::new(),
            special_use: None,
        })
        .await
        .unwrap();

    let login_provider = Arc::new(GatewayLoginProvider::new(gateway.clone()));
    let rate_limiter = Arc::new(SlidingWindowLimiter::default_policy());
    let notifier = Arc::new(Notifier::new(gateway.clone()));
    let handler = Arc::new(MessageHandler::new(gateway.clone(), notifier.clone(), 0, 0));

    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await.unwrap();
    let bind_addr = listener.local_addr().unwrap();
    drop(listener);

    let server = Server {
        bind_addr,
        login_provider,
        rate_limiter,
        gateway,
        notifier,
        handler,
        tls: None,
    };
    let (_exit_tx, exit_rx) = watch::channel(false);
    tokio::spawn(async move {
        server.run(exit_rx).await.unwrap();
    });

    bind_addr
}

async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return BufReader::new(stream);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never accepted a connection at {addr}");
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap();
    line
}

#[tokio::test]
async fn login_select_logout_round_trip() {
    let addr = spawn_server().await;
    let mut stream = connect(addr).await;

    let greeting = read_line(&mut stream).await;
    assert!(greeting.starts_with("* OK"), "unexpected greeting: {greeting}");

    stream.get_mut().write_all(b"A1 LOGIN alice hunter2\r\n").await.unwrap();
    let login_resp = read_line(&mut stream).await;
    assert!(login_resp.starts_with("A1 OK"), "LOGIN failed: {login_resp}");

    stream.get_mut().write_all(b"A2 SELECT INBOX\r\n").await.unwrap();
    let mut saw_exists = false;
    loop {
        let line = read_line(&mut stream).await;
        if line.starts_with("* 0 EXISTS") {
            saw_exists = true;
        }
        if line.starts_with("A2 OK") {
            break;
        }
    }
    assert!(saw_exists, "SELECT of an empty mailbox must report 0 EXISTS");

    stream.get_mut().write_all(b"A3 LOGOUT\r\n").await.unwrap();
    let bye = read_line(&mut stream).await;
    assert!(bye.starts_with("* BYE"), "LOGOUT must answer with BYE: {bye}");
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let addr = spawn_server().await;
    let mut stream = connect(addr).await;
    let _greeting = read_line(&mut stream).await;

    stream.get_mut().write_all(b"A1 LOGIN alice wrongpass\r\n").await.unwrap();
    let resp = read_line(&mut stream).await;
    assert!(resp.starts_with("A1 NO"), "wrong password must be rejected: {resp}");
}
