//! Selected state (§4.4, §4.5): the mailbox-scoped commands, plus a
//! fallback to the authenticated-state handlers for everything this state
//! is a superset of (CREATE, LIST, STATUS, ...).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use imap_codec::imap_types::command::{Command, CommandBody, FetchModifier, StoreModifier};
use imap_codec::imap_types::fetch::{MacroOrMessageDataItemNames, MessageDataItemName};
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::mailbox::Mailbox as MailboxCodec;
use imap_codec::imap_types::search::SearchKey as WireSearchKey;
use imap_codec::imap_types::sequence::SequenceSet;

use corvid_mail::session::PendingEvent;
use corvid_mail::{search, MessageHandler, Notifier, SessionState};
use corvid_store::gateway::{ArcGateway, MessageQuery, MessageUpdate};
use corvid_store::login::AuthenticatedUser;
use corvid_store::model::Message;

use crate::capability::{ClientCapability, ServerCapability};
use crate::command::authenticated::{self, AuthenticatedContext};
use crate::command::MailboxName;
use crate::flags::flag_to_string;
use crate::flow::Transition;
use crate::response::Response;

pub struct SelectedContext<'a> {
    pub req: &'a Command<'static>,
    pub server_capabilities: &'a ServerCapability,
    pub client_capabilities: &'a mut ClientCapability,
    pub gateway: &'a ArcGateway,
    pub notifier: &'a Arc<Notifier>,
    pub handler: &'a Arc<MessageHandler>,
    pub user: &'a AuthenticatedUser,
    pub mailbox: &'a mut Box<SessionState>,
    pub session_id: u64,
}

/// Pulls forward any journal entries this session hasn't seen yet and
/// renders them as the untagged lines they must appear as before a tagged
/// completion (§4.3, §4.4). Factored out of [`refresh`] so the IDLE loop in
/// `server.rs` can reuse it without needing a live `Command` to build a
/// full [`SelectedContext`] around.
pub(crate) async fn refresh_lines(gateway: &ArcGateway, mailbox: &mut SessionState) -> Result<Vec<String>> {
    let entries = gateway.journal_since(mailbox.mailbox, mailbox.highest_modseq_seen).await?;
    mailbox.absorb(&entries);
    let events = mailbox.drain_pending();
    let mut lines = Vec::with_capacity(events.len());
    for e in events {
        match e {
            PendingEvent::Exists { .. } => lines.push(format!("* {} EXISTS", mailbox.exists())),
            PendingEvent::Expunge { msn } => lines.push(format!("* {} EXPUNGE", msn)),
            PendingEvent::Fetch { msn, uid, flags } => {
                let flags_str: Vec<String> = flags.into_iter().collect();
                lines.push(format!("* {} FETCH (UID {} FLAGS ({}))", msn, uid, flags_str.join(" ")));
            }
        }
    }
    Ok(lines)
}

async fn refresh(ctx: &mut SelectedContext<'_>) -> Result<Vec<String>> {
    refresh_lines(ctx.gateway, ctx.mailbox).await
}

pub async fn dispatch(mut ctx: SelectedContext<'_>) -> Result<(Response, Transition)> {
    let pre = refresh(&mut ctx).await.unwrap_or_else(|e| {
        tracing::warn!(err=?e, "failed to pull journal catch-up");
        Vec::new()
    });

    let (resp, tr) = dispatch_inner(ctx).await?;
    Ok((resp.prepend_untagged(pre), tr))
}

async fn dispatch_inner(mut ctx: SelectedContext<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    match &ctx.req.body {
        CommandBody::Noop | CommandBody::Check => Ok((Response::build(tag).ok("Still here"), Transition::None)),
        CommandBody::Close => close(ctx).await,
        CommandBody::Unselect => Ok((Response::build(tag).ok("UNSELECT completed"), Transition::Unselect)),
        CommandBody::Expunge { uid_sequence_set } => expunge(&mut ctx, uid_sequence_set.as_ref()).await,
        CommandBody::Fetch { sequence_set, macro_or_item_names, modifiers, uid, .. } => {
            let sequence_set = sequence_set.clone();
            let macro_or_item_names = macro_or_item_names.clone();
            let modifiers = modifiers.clone();
            let uid = *uid;
            fetch(&mut ctx, &sequence_set, &macro_or_item_names, &modifiers, uid).await
        }
        CommandBody::Search { criteria, uid, .. } => search_cmd(&ctx, criteria, *uid).await,
        CommandBody::Store { sequence_set, kind, response, flags, modifiers, uid } => {
            store(&ctx, sequence_set, kind, response, flags, modifiers, *uid).await
        }
        CommandBody::Copy { sequence_set, mailbox, uid } => copy(&ctx, sequence_set, mailbox, *uid).await,
        CommandBody::Move { sequence_set, mailbox, uid } => r#move(&mut ctx, sequence_set, mailbox, *uid).await,

        // Everything authenticated state can also do (CREATE, LIST, STATUS,
        // a re-SELECT of a different mailbox, ...).
        _ => {
            authenticated::dispatch(AuthenticatedContext {
                req: ctx.req,
                server_capabilities: ctx.server_capabilities,
                client_capabilities: ctx.client_capabilities,
                gateway: ctx.gateway,
                notifier: ctx.notifier,
                handler: ctx.handler,
                user: ctx.user,
                session_id: ctx.session_id,
            })
            .await
        }
    }
}

async fn close(mut ctx: SelectedContext<'_>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    if !ctx.mailbox.writes_disallowed {
        // CLOSE also expunges, but unlike EXPUNGE it must not render the
        // untagged lines (RFC 3501 §6.4.2) — the tuple is discarded.
        expunge(&mut ctx, None).await?;
    }
    Ok((Response::build(tag).ok("CLOSE completed"), Transition::Unselect))
}

fn resolve_sequence(set: &SequenceSet, uid_mode: bool, mailbox: &SessionState, all_messages: &[Message]) -> Vec<u32> {
    // `*` resolves against the highest known UID/MSN, per RFC 3501 §9.
    let max = if uid_mode {
        all_messages.iter().map(|m| m.uid).max().unwrap_or(0)
    } else {
        mailbox.exists()
    };
    let mut out: Vec<u32> = set
        .iter(std::num::NonZeroU32::new(max.max(1)).unwrap())
        .filter_map(|n| {
            let n = n.get();
            if uid_mode {
                Some(n)
            } else {
                mailbox.uids.uid_of_msn(n)
            }
        })
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

async fn expunge(ctx: &mut SelectedContext<'_>, uid_restriction: Option<&SequenceSet>) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    if ctx.mailbox.writes_disallowed {
        return Ok((Response::build(tag).no("Mailbox is read-only"), Transition::None));
    }
    let mut candidates = ctx.gateway.find_messages(&MessageQuery { mailbox: Some(ctx.mailbox.mailbox), deleted: Some(true), ..Default::default() }).await?;
    candidates.sort_unstable_by_key(|m| m.uid);
    let restrict: Option<Vec<u32>> = uid_restriction.map(|s| resolve_sequence(s, true, &ctx.mailbox, &candidates));

    let mut expunged_ids = Vec::new();
    let mut entries = Vec::new();
    // `* MSN EXPUNGE` for the issuing session is rendered straight off the
    // local UID index as each UID is removed, not via the journal — the
    // journal's `ignore` tag is only for suppressing *re-delivery* to this
    // same session on a later drain, never for the command's own response.
    let mut lines = Vec::new();
    for msg in &candidates {
        if let Some(allowed) = &restrict {
            if !allowed.contains(&msg.uid) {
                continue;
            }
        }
        expunged_ids.push(msg.id);
        if let Some(msn) = ctx.mailbox.uids.remove(msg.uid) {
            lines.push(format!("* {} EXPUNGE", msn));
        }
        entries.push(corvid_store::model::JournalEntry {
            id: corvid_store::ident::JournalId::gen(),
            mailbox: ctx.mailbox.mailbox,
            command: corvid_store::model::JournalCommand::Expunge,
            uid: msg.uid,
            message: None,
            flags: None,
            ignore: Some(ctx.session_id),
            modseq: ctx.gateway.find_and_increment_modseq(ctx.mailbox.mailbox).await?,
            created_at: corvid_store::memory::now(),
        });
    }
    ctx.gateway.delete_messages(&expunged_ids).await?;
    let owner_delta: i64 = candidates
        .iter()
        .filter(|m| expunged_ids.contains(&m.id))
        .map(|m| m.size as i64)
        .sum();
    if owner_delta > 0 {
        ctx.gateway.adjust_storage_used(ctx.user.id, -owner_delta).await?;
    }
    ctx.notifier.publish(ctx.mailbox.mailbox, entries).await?;

    Ok((Response::build(tag).untagged_many(lines).ok("EXPUNGE completed"), Transition::None))
}

/// Renders a single requested item name as its `NAME value` fragment, or
/// `None` for items this model has no data for (MIME body parts are the
/// out-of-scope Indexer's job, per §2 Non-goals). `peek=false` body items
/// report that they trigger `\Seen`, via the second tuple field.
fn render_item(msg: &Message, item: &MessageDataItemName<'_>) -> (Option<String>, bool) {
    match item {
        MessageDataItemName::Flags => {
            let flags: Vec<&String> = msg.flags.iter().collect();
            (Some(format!("FLAGS ({})", flags.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" "))), false)
        }
        MessageDataItemName::InternalDate => (Some(format!("INTERNALDATE \"{}\"", msg.internaldate.to_rfc3339())), false),
        MessageDataItemName::Rfc822Size => (Some(format!("RFC822.SIZE {}", msg.size)), false),
        MessageDataItemName::Uid => (Some(format!("UID {}", msg.uid)), false),
        MessageDataItemName::Envelope => (Some(format!("ENVELOPE (\"{}\")", msg.envelope.subject.as_deref().unwrap_or(""))), false),
        MessageDataItemName::BodyStructure | MessageDataItemName::Body => (Some(format!("BODYSTRUCTURE ({})", msg.bodystructure.rendered)), false),
        MessageDataItemName::BodyExt { peek, .. } => (Some("BODY[] \"\"".to_string()), !peek),
        MessageDataItemName::Rfc822 => (Some("RFC822 \"\"".to_string()), true),
        MessageDataItemName::Rfc822Text => (Some("RFC822.TEXT \"\"".to_string()), true),
        MessageDataItemName::Rfc822Header => (Some("RFC822.HEADER \"\"".to_string()), false),
        MessageDataItemName::Binary { peek, .. } => (Some("BINARY[] \"\"".to_string()), !peek),
        MessageDataItemName::BinarySize { .. } => (Some("BINARY.SIZE[] 0".to_string()), false),
    }
}

fn item_names_line(msg: &Message, items: &[MessageDataItemName<'_>]) -> (String, bool) {
    let mut parts = Vec::new();
    let mut seen_triggering = false;
    for item in items {
        let (rendered, triggers_seen) = render_item(msg, item);
        if let Some(r) = rendered {
            parts.push(r);
        }
        seen_triggering |= triggers_seen;
    }
    (parts.join(" "), seen_triggering)
}

async fn fetch(
    ctx: &mut SelectedContext<'_>,
    set: &SequenceSet,
    items: &MacroOrMessageDataItemNames<'_>,
    modifiers: &[FetchModifier],
    uid_mode: bool,
) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let resolved: Vec<MessageDataItemName<'_>> = match items {
        MacroOrMessageDataItemNames::Macro(m) => m.expand(),
        MacroOrMessageDataItemNames::MessageDataItemNames(names) => names.clone(),
    };
    let changed_since = modifiers.iter().find_map(|m| match m {
        FetchModifier::ChangedSince(v) => Some(v.get()),
    });

    let mut query = MessageQuery { mailbox: Some(ctx.mailbox.mailbox), ..Default::default() };
    if let Some(since) = changed_since {
        query.modseq_gt = Some(since.saturating_sub(1));
    }
    let all = ctx.gateway.find_messages(&query).await?;
    let uids = resolve_sequence(set, uid_mode, &ctx.mailbox, &all);

    let mut lines = Vec::new();
    let mut mark_seen = Vec::new();
    for msg in all.iter().filter(|m| uids.contains(&m.uid)) {
        let msn = ctx.mailbox.uids.msn_of_uid(msg.uid).ok_or_else(|| anyhow!("uid not in session view"))?;
        let (rendered, seen_triggering) = item_names_line(msg, &resolved);
        lines.push(format!("* {} FETCH ({})", msn, rendered));
        if !ctx.mailbox.writes_disallowed && seen_triggering && !msg.seen {
            mark_seen.push(msg.id);
        }
    }

    for id in mark_seen {
        let mut m = ctx.gateway.find_message(id).await?;
        m.flags.insert("\\Seen".to_string());
        m.resync_denorm_flags();
        let new_flags = m.flags.clone();
        ctx.gateway.bulk_write(vec![MessageUpdate { id, flags: Some(new_flags.clone()) }]).await?;
        let modseq = ctx.gateway.find_and_increment_modseq(ctx.mailbox.mailbox).await?;
        ctx.notifier
            .publish(
                ctx.mailbox.mailbox,
                vec![corvid_store::model::JournalEntry {
                    id: corvid_store::ident::JournalId::gen(),
                    mailbox: ctx.mailbox.mailbox,
                    command: corvid_store::model::JournalCommand::Fetch,
                    uid: m.uid,
                    message: Some(m.id),
                    flags: Some(new_flags),
                    ignore: Some(ctx.session_id),
                    modseq,
                    created_at: corvid_store::memory::now(),
                }],
            )
            .await?;
    }

    Ok((Response::build(tag).untagged_many(lines).ok("FETCH completed"), Transition::None))
}

fn translate_search_key(key: &WireSearchKey<'_>) -> search::SearchKey {
    use search::SearchKey as K;
    match key {
        WireSearchKey::All => K::All,
        WireSearchKey::Answered => K::Answered,
        WireSearchKey::Unanswered => K::Unanswered,
        WireSearchKey::Deleted => K::Deleted,
        WireSearchKey::Undeleted => K::Undeleted,
        WireSearchKey::Flagged => K::Flagged,
        WireSearchKey::Unflagged => K::Unflagged,
        WireSearchKey::Seen => K::Seen,
        WireSearchKey::Unseen => K::Unseen,
        WireSearchKey::Draft => K::Draft,
        WireSearchKey::Undraft => K::Undraft,
        WireSearchKey::New => K::New,
        WireSearchKey::Old => K::Old,
        WireSearchKey::Keyword(a) => K::Keyword(a.as_ref().to_string()),
        WireSearchKey::Unkeyword(a) => K::Unkeyword(a.as_ref().to_string()),
        WireSearchKey::Bcc(s) => K::Bcc(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::Cc(s) => K::Cc(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::From(s) => K::From(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::Subject(s) => K::Subject(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::To(s) => K::To(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::Text(s) => K::Text(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::Body(s) => K::Body(String::from_utf8_lossy(s.as_ref()).to_string()),
        WireSearchKey::Header(name, value) => K::Header(
            String::from_utf8_lossy(name.as_ref()).to_string(),
            String::from_utf8_lossy(value.as_ref()).to_string(),
        ),
        WireSearchKey::Larger(n) => K::Larger(*n),
        WireSearchKey::Smaller(n) => K::Smaller(*n),
        WireSearchKey::Uid(set) => K::Uid(set.iter(std::num::NonZeroU32::MAX).map(|n| n.get()).collect()),
        WireSearchKey::SequenceSet(set) => K::Uid(set.iter(std::num::NonZeroU32::MAX).map(|n| n.get()).collect()),
        WireSearchKey::And(keys) => K::And(keys.iter().map(translate_search_key).collect()),
        WireSearchKey::Or(a, b) => K::Or(Box::new(translate_search_key(a)), Box::new(translate_search_key(b))),
        WireSearchKey::Not(inner) => K::Not(Box::new(translate_search_key(inner))),
        _ => K::All,
    }
}

async fn search_cmd(ctx: &SelectedContext<'_>, criteria: &[WireSearchKey<'_>], uid_mode: bool) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let keys: Vec<search::SearchKey> = criteria.iter().map(translate_search_key).collect();
    let compiled = search::compile(ctx.mailbox.mailbox, &keys);
    let matches = if compiled.nothing {
        Vec::new()
    } else {
        let candidates = ctx.gateway.find_messages(&compiled.query).await?;
        search::search(&keys, &candidates)
    };

    let rendered: Vec<String> = if uid_mode {
        matches.iter().map(|u| u.to_string()).collect()
    } else {
        matches
            .iter()
            .filter_map(|u| ctx.mailbox.uids.msn_of_uid(*u))
            .map(|m| m.to_string())
            .collect()
    };
    Ok((Response::build(tag).untagged(format!("* SEARCH {}", rendered.join(" "))).ok("SEARCH completed"), Transition::None))
}

async fn store(
    ctx: &SelectedContext<'_>,
    set: &SequenceSet,
    kind: &StoreType,
    response: &StoreResponse,
    flags: &[Flag<'_>],
    modifiers: &[StoreModifier],
    uid_mode: bool,
) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    if ctx.mailbox.writes_disallowed {
        return Ok((Response::build(tag).no("Mailbox is read-only"), Transition::None));
    }
    let unchanged_since = modifiers.iter().find_map(|m| match m {
        StoreModifier::UnchangedSince(v) => Some(v.get()),
    });

    let all = ctx.gateway.find_messages(&MessageQuery { mailbox: Some(ctx.mailbox.mailbox), ..Default::default() }).await?;
    let uids = resolve_sequence(set, uid_mode, &ctx.mailbox, &all);
    let requested: Vec<String> = flags.iter().map(flag_to_string).collect();

    // Learning new keywords into the mailbox's flag vocabulary only makes
    // sense for flags that end up attached to a message; ADD/REPLACE can
    // introduce one, REMOVE never does.
    if matches!(kind, StoreType::Add | StoreType::Replace) {
        let mut mailbox_row = ctx.gateway.find_mailbox_by_id(ctx.mailbox.mailbox).await?;
        let mut changed = false;
        for f in &requested {
            changed |= mailbox_row.learn_flag(f);
        }
        if changed {
            ctx.gateway.update_mailbox(mailbox_row).await?;
        }
    }

    let mut lines = Vec::new();
    let mut entries = Vec::new();
    let mut modified_uids = Vec::new();
    for mut msg in all.into_iter().filter(|m| uids.contains(&m.uid)) {
        if let Some(since) = unchanged_since {
            if msg.modseq > since {
                modified_uids.push(msg.uid);
                continue;
            }
        }
        let new_flags = match kind {
            StoreType::Add => {
                let mut f = msg.flags.clone();
                f.extend(requested.iter().cloned());
                f
            }
            StoreType::Remove => {
                let mut f = msg.flags.clone();
                for r in &requested {
                    f.remove(r);
                }
                f
            }
            StoreType::Replace => requested.iter().cloned().collect(),
        };
        if new_flags == msg.flags {
            continue;
        }
        msg.flags = new_flags.clone();
        msg.resync_denorm_flags();
        ctx.gateway.bulk_write(vec![MessageUpdate { id: msg.id, flags: Some(new_flags.clone()) }]).await?;
        let modseq = ctx.gateway.find_and_increment_modseq(ctx.mailbox.mailbox).await?;
        entries.push(corvid_store::model::JournalEntry {
            id: corvid_store::ident::JournalId::gen(),
            mailbox: ctx.mailbox.mailbox,
            command: corvid_store::model::JournalCommand::Fetch,
            uid: msg.uid,
            message: Some(msg.id),
            flags: Some(new_flags.clone()),
            ignore: Some(ctx.session_id),
            modseq,
            created_at: corvid_store::memory::now(),
        });
        if !matches!(response, StoreResponse::Silent) {
            if let Some(msn) = ctx.mailbox.uids.msn_of_uid(msg.uid) {
                let joined: Vec<&String> = new_flags.iter().collect();
                lines.push(format!(
                    "* {} FETCH (UID {} FLAGS ({}))",
                    msn,
                    msg.uid,
                    joined.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ")
                ));
            }
        }
    }
    ctx.notifier.publish(ctx.mailbox.mailbox, entries).await?;

    let mut builder = Response::build(tag).untagged_many(lines);
    if !modified_uids.is_empty() {
        let joined = modified_uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
        builder = builder.code(format!("MODIFIED {}", joined));
    }
    Ok((builder.ok("STORE completed"), Transition::None))
}

async fn resolve_dest(ctx: &SelectedContext<'_>, mailbox: &MailboxCodec<'_>) -> Result<Option<corvid_store::model::Mailbox>> {
    let name: String = MailboxName(mailbox).try_into()?;
    Ok(ctx.gateway.find_mailbox(ctx.user.id, &name).await.ok())
}

async fn copy(ctx: &SelectedContext<'_>, set: &SequenceSet, mailbox: &MailboxCodec<'_>, uid_mode: bool) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let dest = match resolve_dest(ctx, mailbox).await? {
        Some(d) => d,
        None => return Ok((Response::build(tag).no("[TRYCREATE] No such destination mailbox"), Transition::None)),
    };
    let all = ctx.gateway.find_messages(&MessageQuery { mailbox: Some(ctx.mailbox.mailbox), ..Default::default() }).await?;
    let uids = resolve_sequence(set, uid_mode, &ctx.mailbox, &all);

    let uid_validity = dest.uid_validity;
    let mut dest_uids = Vec::new();
    for msg in all.into_iter().filter(|m| uids.contains(&m.uid)) {
        let incoming = corvid_mail::handler::IncomingMessage {
            headerdate: msg.headerdate,
            flags: msg.flags.clone(),
            size: msg.size,
            envelope: msg.envelope.clone(),
            headers: msg.headers.clone(),
            meta: msg.meta.clone(),
        };
        let (_, new_uid) = ctx.handler.add(dest.id, incoming, Some(ctx.session_id)).await?;
        dest_uids.push(new_uid);
    }
    let src_set = uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
    let dst_set = dest_uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
    Ok((
        Response::build(tag).code(format!("COPYUID {} {} {}", uid_validity, src_set, dst_set)).ok("COPY completed"),
        Transition::None,
    ))
}

async fn r#move(ctx: &mut SelectedContext<'_>, set: &SequenceSet, mailbox: &MailboxCodec<'_>, uid_mode: bool) -> Result<(Response, Transition)> {
    let tag = ctx.req.tag.inner().to_string();
    let dest = match resolve_dest(ctx, mailbox).await? {
        Some(d) => d,
        None => return Ok((Response::build(tag).no("[TRYCREATE] No such destination mailbox"), Transition::None)),
    };
    let all = ctx.gateway.find_messages(&MessageQuery { mailbox: Some(ctx.mailbox.mailbox), ..Default::default() }).await?;
    let uids = resolve_sequence(set, uid_mode, &ctx.mailbox, &all);
    let uid_validity = dest.uid_validity;

    let mut pairs = ctx.handler.move_messages(ctx.mailbox.mailbox, dest.id, &uids, ctx.session_id).await?;
    pairs.sort_unstable_by_key(|(src, _)| *src);

    // Every moved message must be expunged from the source mailbox, same as
    // a bare EXPUNGE would render it (RFC 6851), alongside the COPYUID code.
    let mut lines = Vec::new();
    for (src_uid, _) in &pairs {
        if let Some(msn) = ctx.mailbox.uids.remove(*src_uid) {
            lines.push(format!("* {} EXPUNGE", msn));
        }
    }

    let src_set = pairs.iter().map(|(s, _)| s.to_string()).collect::<Vec<_>>().join(",");
    let dst_set = pairs.iter().map(|(_, d)| d.to_string()).collect::<Vec<_>>().join(",");
    Ok((
        Response::build(tag)
            .untagged_many(lines)
            .code(format!("COPYUID {} {} {}", uid_validity, src_set, dst_set))
            .ok("MOVE completed"),
        Transition::None,
    ))
}
