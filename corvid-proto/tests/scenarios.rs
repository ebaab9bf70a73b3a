//! End-to-end scenarios driven straight through `Instance::request`,
//! bypassing the wire codec (the dispatch logic under test lives in
//! `corvid-proto::command::*`, not in framing). Each test name traces back
//! to one of the mailbox-behavior scenarios a conformant IMAP4rev1 server
//! must get right: concurrent UID allocation, cross-session notification
//! ordering, EXPUNGE renumbering, and UIDPLUS COPY.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use imap_codec::imap_types::command::{Command, CommandBody};
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};

use corvid_mail::{MessageHandler, Notifier};
use corvid_proto::request::Request;
use corvid_proto::response::{Response, Status};
use corvid_proto::session::Instance;
use corvid_store::gateway::ArcGateway;
use corvid_store::ident::MailboxId;
use corvid_store::login::{hash_password, GatewayLoginProvider, SlidingWindowLimiter};
use corvid_store::memory::MemoryGateway;
use corvid_store::model::{Mailbox, User};

struct Fixture {
    memory: Arc<MemoryGateway>,
    gateway: ArcGateway,
    notifier: Arc<Notifier>,
    handler: Arc<MessageHandler>,
    login_provider: Arc<GatewayLoginProvider>,
    rate_limiter: Arc<SlidingWindowLimiter>,
}

fn peer() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

async fn fixture() -> Fixture {
    let memory = Arc::new(MemoryGateway::new());
    let gateway: ArcGateway = memory.clone();
    let notifier = Arc::new(Notifier::new(gateway.clone()));
    let handler = Arc::new(MessageHandler::new(gateway.clone(), notifier.clone(), 0, 0));
    let login_provider = Arc::new(GatewayLoginProvider::new(gateway.clone()));
    let rate_limiter = Arc::new(SlidingWindowLimiter::default_policy());
    Fixture { memory, gateway, notifier, handler, login_provider, rate_limiter }
}

fn seed_user(f: &Fixture, username: &str, password: &str) -> corvid_store::ident::UserId {
    let id = corvid_store::ident::UserId::gen();
    let user = User {
        id,
        username: username.to_string(),
        password_hash: hash_password(password).unwrap(),
        quota: 0,
        storage_used: 0,
    };
    f.memory.seed_user(user);
    id
}

async fn seed_mailbox(gw: &ArcGateway, user: corvid_store::ident::UserId, path: &str, uid_next: u32) -> MailboxId {
    let id = MailboxId::gen();
    let mbox = Mailbox {
        id,
        user,
        path: path.to_string(),
        uid_validity: 1,
        uid_next,
        modify_index: 0,
        subscribed: true,
        flags: Vec::new(),
        special_use: None,
    };
    gw.insert_mailbox(mbox).await.unwrap();
    id
}

fn new_instance(f: &Fixture, session_id: u64) -> Instance {
    Instance::new(
        f.login_provider.clone(),
        f.rate_limiter.clone(),
        f.gateway.clone(),
        f.notifier.clone(),
        f.handler.clone(),
        peer(),
        session_id,
    )
}

fn incoming(size: u64) -> corvid_mail::handler::IncomingMessage {
    corvid_mail::handler::IncomingMessage {
        headerdate: chrono::Utc::now(),
        flags: BTreeSet::new(),
        size,
        envelope: Default::default(),
        headers: vec![],
        meta: corvid_store::model::MessageMeta {
            source: corvid_store::model::MessageSource::Imap,
            recipient: None,
            ingest_time: chrono::Utc::now(),
        },
    }
}

async fn cmd(instance: &mut Instance, tag: &'static str, body: CommandBody<'static>) -> Response {
    let command = Command::new(tag, body).unwrap();
    instance.request(Request::Command(command)).await
}

async fn login(instance: &mut Instance, user: &str, pass: &'static str) -> Response {
    cmd(instance, "L1", CommandBody::login(user.to_string(), pass).unwrap()).await
}

async fn select(instance: &mut Instance, mailbox: &'static str) -> Response {
    cmd(instance, "S1", CommandBody::select(mailbox).unwrap()).await
}

#[tokio::test]
async fn s1_append_then_select_reports_exists_and_unseen() {
    let f = fixture().await;
    let uid = seed_user(&f, "alice", "hunter2");
    seed_mailbox(&f.gateway, uid, "INBOX", 1).await;

    let mut sess = new_instance(&f, 1);
    assert_eq!(login(&mut sess, "alice", "hunter2").await.status, Status::Ok);

    let append = CommandBody::append("INBOX", vec![Flag::Seen], None, vec![b'x'; 512]).unwrap();
    let resp = cmd(&mut sess, "A1", append).await;
    assert_eq!(resp.status, Status::Ok);
    assert!(resp.code.as_deref().unwrap().starts_with("APPENDUID"));
    assert!(resp.code.as_deref().unwrap().ends_with(" 1"));

    let resp = select(&mut sess, "INBOX").await;
    assert_eq!(resp.status, Status::Ok);
    assert!(resp.untagged.iter().any(|l| l == "* 1 EXISTS"));
    assert!(resp.untagged.iter().any(|l| l.contains("UIDNEXT 2")));
    // the appended message was flagged \Seen, so nothing is unseen and no
    // `* OK [UNSEEN ...]` line should be present
    assert!(!resp.untagged.iter().any(|l| l.contains("UNSEEN")));
}

#[tokio::test]
async fn s2_concurrent_append_allocates_distinct_uids_and_notifies_peer() {
    let f = fixture().await;
    let uid = seed_user(&f, "alice", "hunter2");
    seed_mailbox(&f.gateway, uid, "INBOX", 5).await;

    let mut a = new_instance(&f, 1);
    let mut b = new_instance(&f, 2);
    login(&mut a, "alice", "hunter2").await;
    login(&mut b, "alice", "hunter2").await;
    select(&mut a, "INBOX").await;
    select(&mut b, "INBOX").await;

    let resp_a = cmd(&mut a, "A1", CommandBody::append("INBOX", vec![], None, vec![1u8]).unwrap()).await;
    let resp_b = cmd(&mut b, "B1", CommandBody::append("INBOX", vec![], None, vec![2u8]).unwrap()).await;

    assert!(resp_a.code.as_deref().unwrap().ends_with(" 5"));
    assert!(resp_b.code.as_deref().unwrap().ends_with(" 6"));

    // A's next command should surface B's append as an untagged EXISTS,
    // prepended ahead of its own tagged completion.
    let resp = cmd(&mut a, "N1", CommandBody::Noop).await;
    assert!(resp.untagged.iter().any(|l| l.contains("EXISTS")));
}

#[tokio::test]
async fn s3_store_flags_are_visible_to_the_other_session_on_next_command() {
    let f = fixture().await;
    let uid = seed_user(&f, "alice", "hunter2");
    let mbox = seed_mailbox(&f.gateway, uid, "INBOX", 1).await;

    f.handler.add(mbox, incoming(1), None).await.unwrap();
    f.handler.add(mbox, incoming(1), None).await.unwrap();

    let mut a = new_instance(&f, 1);
    let mut b = new_instance(&f, 2);
    login(&mut a, "alice", "hunter2").await;
    login(&mut b, "alice", "hunter2").await;
    let resp_a = select(&mut a, "INBOX").await;
    let resp_b = select(&mut b, "INBOX").await;
    assert!(resp_a.untagged.iter().any(|l| l == "* 2 EXISTS"));
    assert!(resp_b.untagged.iter().any(|l| l == "* 2 EXISTS"));

    let store = CommandBody::store("2", StoreType::Add, StoreResponse::Answer, vec![Flag::Seen], true).unwrap();
    let resp = cmd(&mut b, "B1", store).await;
    assert_eq!(resp.status, Status::Ok);
    assert!(resp.untagged.iter().any(|l| l.contains("FETCH") && l.contains("\\Seen")));

    let resp = cmd(&mut a, "N1", CommandBody::Noop).await;
    assert!(resp.untagged.iter().any(|l| l.contains("FETCH") && l.contains("\\Seen")));
}

#[tokio::test]
async fn s4_uid_expunge_of_middle_message_renumbers_and_frees_storage() {
    let f = fixture().await;
    let uid = seed_user(&f, "alice", "hunter2");
    let mbox = seed_mailbox(&f.gateway, uid, "INBOX", 1).await;

    for _ in 0..3 {
        f.handler.add(mbox, incoming(100), None).await.unwrap();
    }
    // uids allocated are 1, 2, 3 (mailbox started at uid_next=1)

    let mut sess = new_instance(&f, 1);
    login(&mut sess, "alice", "hunter2").await;
    select(&mut sess, "INBOX").await;

    let mark_deleted = CommandBody::store("2", StoreType::Add, StoreResponse::Silent, vec![Flag::Deleted], true).unwrap();
    cmd(&mut sess, "D1", mark_deleted).await;

    let resp = cmd(&mut sess, "E1", CommandBody::Expunge { uid_sequence_set: None }).await;
    assert_eq!(resp.status, Status::Ok);
    assert!(resp.untagged.iter().any(|l| l == "* 2 EXPUNGE"));

    let after = f.gateway.find_mailbox_by_id(mbox).await.unwrap();
    assert_eq!(after.uid_next, 4, "uidNext must never move backward on EXPUNGE");

    let user_after = f.gateway.find_user(uid).await.unwrap();
    assert_eq!(user_after.storage_used_clamped(), 200);
}

#[tokio::test]
async fn s5_uid_copy_allocates_destination_uids_and_reports_copyuid() {
    let f = fixture().await;
    let uid = seed_user(&f, "alice", "hunter2");
    let drafts = seed_mailbox(&f.gateway, uid, "Drafts", 7).await;
    let archive = seed_mailbox(&f.gateway, uid, "Archive", 40).await;

    // Drafts needs uids 7 and 9 specifically; allocate 7 then burn 8.
    let (_, uid7) = f.handler.add(drafts, incoming(10), None).await.unwrap();
    let (burned_id, _) = f.handler.add(drafts, incoming(1), None).await.unwrap();
    f.gateway.delete_messages(&[burned_id]).await.unwrap();
    let (_, uid9) = f.handler.add(drafts, incoming(20), None).await.unwrap();
    assert_eq!(uid7, 7);
    assert_eq!(uid9, 9);

    let before_storage = f.gateway.find_user(uid).await.unwrap().storage_used_clamped();

    let mut sess = new_instance(&f, 1);
    login(&mut sess, "alice", "hunter2").await;
    select(&mut sess, "Drafts").await;

    let copy = CommandBody::copy("7,9", "Archive", true).unwrap();
    let resp = cmd(&mut sess, "C1", copy).await;
    assert_eq!(resp.status, Status::Ok);
    let code = resp.code.unwrap();
    assert!(code.starts_with("COPYUID"));
    assert!(code.contains("40,41") || code.contains("40, 41"));

    let archive_after = f.gateway.find_mailbox_by_id(archive).await.unwrap();
    assert_eq!(archive_after.uid_next, 42);

    let storage_after = f.gateway.find_user(uid).await.unwrap().storage_used_clamped();
    assert_eq!(storage_after, before_storage + 10 + 20);
}
