//! Authenticated state (§4.5): mailbox management commands, plus the two
//! that cause a state transition (SELECT/EXAMINE).

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use imap_codec::imap_types::command::{Command, CommandBody};
use imap_codec::imap_types::core::Vec1;
use imap_codec::imap_types::extensions::enable::CapabilityEnable;
use imap_codec::imap_types::mailbox::{ListMailbox, Mailbox as MailboxCodec};
use imap_codec::imap_types::status::StatusDataItemName;

use corvid_mail::{MessageHandler, Notifier, SessionState};
use corvid_mail::handler::IncomingMessage;
use corvid_store::error::StoreError;
use corvid_store::gateway::{ArcGateway, MailboxListOpts, MessageQuery};
use corvid_store::login::AuthenticatedUser;
use corvid_store::model::{Envelope, HeaderField, Mailbox, MessageMeta, MessageSource};

use crate::capability::{ClientCapability, ServerCapability};
use crate::command::{anystate, MailboxName};
use crate::flags::flag_to_string;
use crate::flow::Transition;
use crate::response::Response;

pub struct AuthenticatedContext<'a> {
    pub req: &'a Command<'static>,
    pub server_capabilities: &'a ServerCapability,
    pub client_capabilities: &'a mut ClientCapability,
    pub gateway: &'a ArcGateway,
    pub notifier: &'a Arc<Notifier>,
    pub handler: &'a Arc<MessageHandler>,
    pub user: &'a AuthenticatedUser,
    pub session_id: u64,
}

pub async fn dispatch(mut ctx: AuthenticatedContext<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    match &ctx.req.body {
        CommandBody::Noop => anystate::noop_nothing(ctx.req.tag.clone()),
        CommandBody::Capability => anystate::capability(ctx.req.tag.clone(), ctx.server_capabilities),
        CommandBody::Logout => anystate::logout(),

        CommandBody::Create { mailbox } => create(&ctx, mailbox).await,
        CommandBody::Delete { mailbox } => delete(&ctx, mailbox).await,
        CommandBody::Rename { from, to } => rename(&ctx, from, to).await,
        CommandBody::List { reference, mailbox_wildcard, .. } => list(&ctx, reference, mailbox_wildcard, false).await,
        CommandBody::Lsub { reference, mailbox_wildcard } => list(&ctx, reference, mailbox_wildcard, true).await,
        CommandBody::Subscribe { mailbox } => subscribe(&ctx, mailbox, true).await,
        CommandBody::Unsubscribe { mailbox } => subscribe(&ctx, mailbox, false).await,
        CommandBody::Status { mailbox, item_names } => status(&ctx, mailbox, item_names).await,
        CommandBody::Select { mailbox, .. } => select(ctx, mailbox, false).await,
        CommandBody::Examine { mailbox, .. } => select(ctx, mailbox, true).await,
        CommandBody::Append { mailbox, flags, date, message } => {
            append(&ctx, mailbox, flags, date.clone(), message).await
        }
        CommandBody::Enable { capabilities } => enable(&mut ctx, capabilities),
        CommandBody::Namespace => namespace(&ctx),
        CommandBody::Id { .. } => id(&ctx),
        CommandBody::GetQuotaRoot { mailbox } => get_quota_root(&ctx, mailbox).await,
        CommandBody::GetQuota { root } => get_quota(&ctx, root).await,

        _ => Ok((Response::build(tag).bad("Command not valid without a mailbox selected"), Transition::None)),
    }
}

async fn create(ctx: &AuthenticatedContext<'_>, mailbox: &MailboxCodec<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    if matches!(mailbox, MailboxCodec::Inbox) {
        return Ok((Response::build(tag).bad("Cannot create INBOX, it always exists"), Transition::None));
    }
    let name: String = MailboxName(mailbox).try_into()?;
    let new = Mailbox {
        id: corvid_store::ident::MailboxId::gen(),
        user: ctx.user.id,
        path: name,
        uid_validity: Utc::now().timestamp() as u32,
        uid_next: 1,
        modify_index: 0,
        subscribed: true,
        flags: vec![],
        special_use: None,
    };
    match ctx.gateway.insert_mailbox(new).await {
        Ok(()) => Ok((Response::build(tag).ok("CREATE completed"), Transition::None)),
        Err(e) => Ok((store_error_response(tag, &e), Transition::None)),
    }
}

async fn delete(ctx: &AuthenticatedContext<'_>, mailbox: &MailboxCodec<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let name: String = MailboxName(mailbox).try_into()?;
    if name == "INBOX" {
        return Ok((Response::build(tag).no("INBOX cannot be deleted"), Transition::None));
    }
    let found = ctx.gateway.find_mailbox(ctx.user.id, &name).await;
    match found {
        Ok(m) if m.special_use.is_some() => Ok((Response::build(tag).no("Special-use mailboxes cannot be deleted"), Transition::None)),
        Ok(m) => {
            ctx.gateway.delete_mailbox(m.id).await?;
            Ok((Response::build(tag).ok("DELETE completed"), Transition::None))
        }
        Err(e) => Ok((store_error_response(tag, &e), Transition::None)),
    }
}

async fn rename(ctx: &AuthenticatedContext<'_>, from: &MailboxCodec<'_>, to: &MailboxCodec<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let old_name: String = MailboxName(from).try_into()?;
    let new_name: String = MailboxName(to).try_into()?;

    let source = match ctx.gateway.find_mailbox(ctx.user.id, &old_name).await {
        Ok(m) => m,
        Err(e) => return Ok((store_error_response(tag, &e), Transition::None)),
    };

    // §9 decision: descendants move with their parent, not left orphaned
    // under the old path prefix.
    let all = ctx.gateway.list_mailboxes(ctx.user.id, MailboxListOpts::default()).await?;
    let prefix = format!("{}/", old_name);
    for mut m in all {
        let rewritten = if m.id == source.id {
            Some(new_name.clone())
        } else if let Some(rest) = m.path.strip_prefix(&prefix) {
            Some(format!("{}/{}", new_name, rest))
        } else {
            None
        };
        if let Some(new_path) = rewritten {
            m.path = new_path;
            ctx.gateway.update_mailbox(m).await?;
        }
    }
    Ok((Response::build(tag).ok("RENAME completed"), Transition::None))
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn rec(p: &[u8], c: &[u8]) -> bool {
        match p.first() {
            None => c.is_empty(),
            Some(b'*') => (0..=c.len()).any(|i| rec(&p[1..], &c[i..])),
            Some(b'%') => (0..=c.len()).any(|i| !c[..i].contains(&b'/') && rec(&p[1..], &c[i..])),
            Some(&ch) => c.first() == Some(&ch) && rec(&p[1..], &c[1..]),
        }
    }
    rec(pattern.as_bytes(), candidate.as_bytes())
}

async fn list(ctx: &AuthenticatedContext<'_>, reference: &MailboxCodec<'_>, wildcard: &ListMailbox<'_>, is_lsub: bool) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let reference: String = MailboxName(reference).try_into()?;
    let wildcard = match wildcard {
        ListMailbox::Token(v) => std::str::from_utf8(v.as_ref())?.to_string(),
        ListMailbox::String(v) => std::str::from_utf8(v.as_ref())?.to_string(),
    };

    if wildcard.is_empty() {
        let cmd = if is_lsub { "LSUB" } else { "LIST" };
        return Ok((Response::build(tag).untagged(format!("* {} (\\Noselect) \"/\" \"\"", cmd)).ok(format!("{} completed", cmd)), Transition::None));
    }

    let pattern = format!("{}{}", reference, wildcard);
    let mailboxes = ctx.gateway.list_mailboxes(ctx.user.id, MailboxListOpts { subscribed_only: is_lsub }).await?;
    let cmd = if is_lsub { "LSUB" } else { "LIST" };
    let lines: Vec<String> = mailboxes
        .into_iter()
        .filter(|m| glob_match(&pattern, &m.path))
        .map(|m| {
            let attrs = m.special_use.map(|s| s.as_flag().to_string()).unwrap_or_default();
            format!("* {} ({}) \"/\" \"{}\"", cmd, attrs, m.path)
        })
        .collect();
    Ok((Response::build(tag).untagged_many(lines).ok(format!("{} completed", cmd)), Transition::None))
}

async fn subscribe(ctx: &AuthenticatedContext<'_>, mailbox: &MailboxCodec<'_>, want: bool) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let name: String = MailboxName(mailbox).try_into()?;
    match ctx.gateway.find_mailbox(ctx.user.id, &name).await {
        Ok(mut m) => {
            m.subscribed = want;
            ctx.gateway.update_mailbox(m).await?;
            let verb = if want { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
            Ok((Response::build(tag).ok(format!("{} completed", verb)), Transition::None))
        }
        Err(e) => Ok((store_error_response(tag, &e), Transition::None)),
    }
}

async fn status(ctx: &AuthenticatedContext<'_>, mailbox: &MailboxCodec<'_>, items: &[StatusDataItemName]) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let name: String = MailboxName(mailbox).try_into()?;
    let m = match ctx.gateway.find_mailbox(ctx.user.id, &name).await {
        Ok(m) => m,
        Err(e) => return Ok((store_error_response(tag, &e), Transition::None)),
    };
    let messages = ctx.gateway.count_messages(&MessageQuery { mailbox: Some(m.id), ..Default::default() }).await?;
    let unseen = ctx.gateway.count_messages(&MessageQuery { mailbox: Some(m.id), seen: Some(false), ..Default::default() }).await?;

    let mut parts = Vec::new();
    for item in items {
        let rendered = match item {
            StatusDataItemName::Messages => format!("MESSAGES {}", messages),
            StatusDataItemName::UidNext => format!("UIDNEXT {}", m.uid_next),
            StatusDataItemName::UidValidity => format!("UIDVALIDITY {}", m.uid_validity),
            StatusDataItemName::Unseen => format!("UNSEEN {}", unseen),
            StatusDataItemName::HighestModSeq => format!("HIGHESTMODSEQ {}", m.modify_index),
            StatusDataItemName::Deleted => {
                let deleted = ctx.gateway.count_messages(&MessageQuery { mailbox: Some(m.id), deleted: Some(true), ..Default::default() }).await?;
                format!("DELETED {}", deleted)
            }
            _ => continue,
        };
        parts.push(rendered);
    }
    let line = format!("* STATUS \"{}\" ({})", m.path, parts.join(" "));
    Ok((Response::build(tag).untagged(line).ok("STATUS completed"), Transition::None))
}

async fn select(mut ctx: AuthenticatedContext<'_>, mailbox: &MailboxCodec<'_>, readonly: bool) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let name: String = MailboxName(mailbox).try_into()?;
    let m = match ctx.gateway.find_mailbox(ctx.user.id, &name).await {
        Ok(m) => m,
        Err(e) => return Ok((store_error_response(tag, &e), Transition::None)),
    };
    let messages = ctx.gateway.find_messages(&MessageQuery { mailbox: Some(m.id), ..Default::default() }).await?;
    let exists = messages.len();
    let unseen_msn = messages.iter().position(|msg| !msg.seen).map(|i| i + 1);
    let uids: Vec<u32> = messages.iter().map(|msg| msg.uid).collect();

    let state = SessionState::new(ctx.session_id, ctx.user.id, m.id, uids, m.modify_index, readonly);
    let cmd_name = if readonly { "EXAMINE" } else { "SELECT" };

    let mut untagged = vec![
        format!("* {} EXISTS", exists),
        "* 0 RECENT".to_string(),
        "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)".to_string(),
    ];
    if let Some(msn) = unseen_msn {
        untagged.push(format!("* OK [UNSEEN {}] Message {} is first unseen", msn, msn));
    }
    untagged.push(format!("* OK [UIDVALIDITY {}] UIDs valid", m.uid_validity));
    untagged.push(format!("* OK [UIDNEXT {}] Predicted next UID", m.uid_next));
    if ctx.client_capabilities.condstore {
        untagged.push(format!("* OK [HIGHESTMODSEQ {}] Highest", m.modify_index));
    }

    let code = if readonly { "READ-ONLY" } else { "READ-WRITE" };
    let resp = Response::build(tag).untagged_many(untagged).code(code).ok(format!("{} completed", cmd_name));
    Ok((resp, Transition::Select(Box::new(state))))
}

async fn append(
    ctx: &AuthenticatedContext<'_>,
    mailbox: &MailboxCodec<'_>,
    flags: &[imap_codec::imap_types::flag::Flag<'_>],
    date: Option<imap_codec::imap_types::datetime::DateTime>,
    message: &imap_codec::imap_types::extensions::binary::LiteralOrLiteral8<'_>,
) -> Result<(Response, Transition)> {
    let _ = date;
    let tag = ctx.req.tag.inner().to_string();
    let name: String = MailboxName(mailbox).try_into()?;
    let m = match ctx.gateway.find_mailbox(ctx.user.id, &name).await {
        Ok(m) => m,
        Err(e) => return Ok((store_error_response(tag, &e), Transition::None)),
    };

    let bytes: &[u8] = match message {
        imap_codec::imap_types::extensions::binary::LiteralOrLiteral8::Literal(l) => l.data(),
        imap_codec::imap_types::extensions::binary::LiteralOrLiteral8::Literal8(l) => l.data.as_ref(),
    };
    let flags = flags.iter().map(flag_to_string).collect();
    let incoming = IncomingMessage {
        headerdate: Utc::now(),
        flags,
        size: bytes.len() as u64,
        envelope: Envelope::default(),
        headers: vec![HeaderField { key: "X-Corvid-Append".into(), value: tag.clone() }],
        meta: MessageMeta { source: MessageSource::Imap, recipient: None, ingest_time: Utc::now() },
    };

    let uid_validity = m.uid_validity;
    let (_, uid) = ctx.handler.add(m.id, incoming, Some(ctx.session_id)).await?;
    let resp = Response::build(tag)
        .code(format!("APPENDUID {} {}", uid_validity, uid))
        .ok("APPEND completed");
    Ok((resp, Transition::None))
}

fn enable(ctx: &mut AuthenticatedContext<'_>, capabilities: &Vec1<CapabilityEnable<'_>>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let mut enabled = Vec::new();
    for c in capabilities.as_ref() {
        let name = format!("{:?}", c);
        if ctx.client_capabilities.enable(&name) {
            enabled.push(name);
        }
    }
    Ok((Response::build(tag).untagged(format!("* ENABLED {}", enabled.join(" "))).ok("ENABLE completed"), Transition::None))
}

fn namespace(ctx: &AuthenticatedContext<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    // Single personal namespace, no shared/other-users namespaces (§2
    // Non-goals: no multi-tenant mailbox sharing).
    let resp = Response::build(tag).untagged("* NAMESPACE ((\"\" \"/\")) NIL NIL").ok("NAMESPACE completed");
    Ok((resp, Transition::None))
}

fn id(ctx: &AuthenticatedContext<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let resp = Response::build(tag)
        .untagged("* ID (\"name\" \"corvidd\" \"version\" \"0.1.0\")")
        .ok("ID completed");
    Ok((resp, Transition::None))
}

async fn get_quota_root(ctx: &AuthenticatedContext<'_>, mailbox: &MailboxCodec<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let name: String = MailboxName(mailbox).try_into()?;
    if ctx.gateway.find_mailbox(ctx.user.id, &name).await.is_err() {
        return Ok((Response::build(tag).no("Mailbox does not exist"), Transition::None));
    }
    let user = ctx.gateway.find_user(ctx.user.id).await?;
    let used_kb = user.storage_used_clamped() / 1024;
    let limit_kb = user.quota_bytes(ctx.handler.max_storage()) / 1024;
    let resp = Response::build(tag)
        .untagged(format!("* QUOTAROOT \"{}\" \"\"", name))
        .untagged(format!("* QUOTA \"\" (STORAGE {} {})", used_kb, limit_kb))
        .ok("GETQUOTAROOT completed");
    Ok((resp, Transition::None))
}

async fn get_quota(ctx: &AuthenticatedContext<'_>, root: &imap_codec::imap_types::core::AString<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let _ = root;
    let user = ctx.gateway.find_user(ctx.user.id).await?;
    let used_kb = user.storage_used_clamped() / 1024;
    let limit_kb = user.quota_bytes(ctx.handler.max_storage()) / 1024;
    let resp = Response::build(tag)
        .untagged(format!("* QUOTA \"\" (STORAGE {} {})", used_kb, limit_kb))
        .ok("GETQUOTA completed");
    Ok((resp, Transition::None))
}

pub(crate) fn store_error_message(e: &StoreError) -> String {
    match e {
        StoreError::NoSuchMailbox => "Mailbox does not exist".to_string(),
        StoreError::MailboxAlreadyExists => "Mailbox already exists".to_string(),
        StoreError::NoSuchUser => "No such user".to_string(),
        StoreError::NoSuchMessage => "No such message".to_string(),
        StoreError::SpecialUseMailbox => "Operation not permitted on a special-use mailbox".to_string(),
        StoreError::OverQuota => "Quota exceeded".to_string(),
        StoreError::Internal(e) => {
            tracing::error!(err=?e, "internal storage error");
            "Internal server error".to_string()
        }
    }
}

/// RFC 3501/5530 bracketed response code accompanying a failed command,
/// when the failure has one; `None` falls back to bare NO text.
fn store_error_code(e: &StoreError) -> Option<&'static str> {
    match e {
        StoreError::NoSuchMailbox | StoreError::NoSuchUser | StoreError::NoSuchMessage => Some("NONEXISTENT"),
        StoreError::MailboxAlreadyExists => Some("ALREADYEXISTS"),
        StoreError::SpecialUseMailbox => Some("CANNOT"),
        StoreError::OverQuota => Some("OVERQUOTA"),
        StoreError::Internal(_) => None,
    }
}

pub(crate) fn store_error_response(tag: String, e: &StoreError) -> Response {
    let builder = Response::build(tag);
    let builder = match store_error_code(e) {
        Some(code) => builder.code(code),
        None => builder,
    };
    builder.no(store_error_message(e))
}
