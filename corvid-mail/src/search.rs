//! Search Compiler (§4.7): translates an IMAP SEARCH criteria tree into a
//! narrowing [`MessageQuery`] plus a residual in-memory predicate, since the
//! Storage Gateway's query shape only covers the axes worth indexing
//! (mailbox, uid set, \Deleted, \Seen, MODSEQ). Everything else — header
//! substrings, dates, size, arbitrary keyword flags, boolean combinators —
//! is evaluated against the rows the narrowed query returns.
//!
//! `corvid-proto` is responsible for parsing the wire `search` grammar into
//! `SearchKey`; this module owns only the tree shape and its evaluation.

use chrono::{DateTime, Utc};
use corvid_store::gateway::MessageQuery;
use corvid_store::ident::MailboxId;
use corvid_store::model::Message;

#[derive(Clone, Debug)]
pub enum SearchKey {
    All,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Flagged,
    Unflagged,
    Seen,
    Unseen,
    Draft,
    Undraft,
    New,
    Old,
    Recent(u32),
    Keyword(String),
    Unkeyword(String),
    Bcc(String),
    Cc(String),
    From(String),
    Subject(String),
    To(String),
    Text(String),
    Body(String),
    Header(String, String),
    Before(DateTime<Utc>),
    On(DateTime<Utc>),
    Since(DateTime<Utc>),
    SentBefore(DateTime<Utc>),
    SentOn(DateTime<Utc>),
    SentSince(DateTime<Utc>),
    Larger(u64),
    Smaller(u64),
    Uid(Vec<u32>),
    ModSeq(u64),
    And(Vec<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    Not(Box<SearchKey>),
}

/// A compiled criteria tree: either a narrowed query to run against the
/// gateway, or a `nothing` short-circuit for criteria provably unsatisfiable
/// under this model's evaluation.
pub struct Compiled {
    pub query: MessageQuery,
    pub nothing: bool,
}

/// Builds the narrowing query for a top-level (implicitly AND-ed) list of
/// criteria. Conservative by construction: a criterion this function
/// doesn't recognize is simply left unconstrained here and caught by
/// [`eval`] afterwards, never silently dropped.
pub fn compile(mailbox: MailboxId, keys: &[SearchKey]) -> Compiled {
    let mut q = MessageQuery {
        mailbox: Some(mailbox),
        ..Default::default()
    };
    for k in keys {
        narrow(k, &mut q);
    }
    let nothing = keys.iter().any(negates_full_text);
    Compiled { query: q, nothing }
}

/// `NOT TEXT`/`NOT BODY` can't be evaluated: [`eval`] has no real full-text
/// index and conservatively treats `BODY`/`TEXT` as a miss on content it
/// can't see, so negating them would report every message as a match
/// instead of none. Mark the whole search `nothing` rather than lie.
fn negates_full_text(key: &SearchKey) -> bool {
    match key {
        SearchKey::Not(inner) => matches!(**inner, SearchKey::Text(_) | SearchKey::Body(_)),
        SearchKey::And(inner) => inner.iter().any(negates_full_text),
        _ => false,
    }
}

fn narrow(key: &SearchKey, q: &mut MessageQuery) {
    match key {
        SearchKey::Deleted => q.deleted = Some(true),
        SearchKey::Undeleted => q.deleted = Some(false),
        SearchKey::Seen => q.seen = Some(true),
        SearchKey::Unseen => q.seen = Some(false),
        SearchKey::Uid(uids) => {
            q.uids = Some(match q.uids.take() {
                Some(existing) => existing.into_iter().filter(|u| uids.contains(u)).collect(),
                None => uids.clone(),
            });
        }
        SearchKey::ModSeq(m) => {
            let floor = m.saturating_sub(1);
            q.modseq_gt = Some(q.modseq_gt.map_or(floor, |cur| cur.max(floor)));
        }
        SearchKey::And(inner) => inner.iter().for_each(|k| narrow(k, q)),
        // OR/NOT change which rows can match in ways a single linear
        // narrowing can't represent without risking false negatives; leave
        // the axis open and let `eval` decide.
        _ => {}
    }
}

fn header_contains(m: &Message, name: &str, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    m.headers
        .iter()
        .any(|h| h.key.eq_ignore_ascii_case(name) && h.value.to_lowercase().contains(&needle))
}

fn same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

pub fn eval(key: &SearchKey, m: &Message) -> bool {
    match key {
        SearchKey::All => true,
        SearchKey::Answered => m.flags.contains("\\Answered"),
        SearchKey::Unanswered => !m.flags.contains("\\Answered"),
        SearchKey::Deleted => m.deleted,
        SearchKey::Undeleted => !m.deleted,
        SearchKey::Flagged => m.flagged,
        SearchKey::Unflagged => !m.flagged,
        SearchKey::Seen => m.seen,
        SearchKey::Unseen => !m.seen,
        SearchKey::Draft => m.flags.contains("\\Draft"),
        SearchKey::Undraft => !m.flags.contains("\\Draft"),
        SearchKey::New => !m.seen,
        SearchKey::Old => m.seen,
        SearchKey::Recent(uid_next_at_select) => m.uid >= *uid_next_at_select,
        SearchKey::Keyword(k) => m.flags.contains(k),
        SearchKey::Unkeyword(k) => !m.flags.contains(k),
        SearchKey::Bcc(s) => m.envelope.bcc.iter().any(|a| a.to_lowercase().contains(&s.to_lowercase())),
        SearchKey::Cc(s) => m.envelope.cc.iter().any(|a| a.to_lowercase().contains(&s.to_lowercase())),
        SearchKey::From(s) => m.envelope.from.iter().any(|a| a.to_lowercase().contains(&s.to_lowercase())),
        SearchKey::To(s) => m.envelope.to.iter().any(|a| a.to_lowercase().contains(&s.to_lowercase())),
        SearchKey::Subject(s) => m
            .envelope
            .subject
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
            .contains(&s.to_lowercase()),
        SearchKey::Header(name, value) => header_contains(m, name, value),
        // BODY/TEXT need the decoded message content, which this model does
        // not materialize (it is opaque, rendered by the out-of-scope
        // Indexer); fall back to headers, which at least covers TEXT's
        // requirement to include header data.
        SearchKey::Text(s) => m.headers.iter().any(|h| h.value.to_lowercase().contains(&s.to_lowercase())),
        SearchKey::Body(_) => false,
        SearchKey::Before(d) => m.internaldate < *d,
        SearchKey::On(d) => same_day(m.internaldate, *d),
        SearchKey::Since(d) => m.internaldate >= *d,
        SearchKey::SentBefore(d) => m.headerdate < *d,
        SearchKey::SentOn(d) => same_day(m.headerdate, *d),
        SearchKey::SentSince(d) => m.headerdate >= *d,
        SearchKey::Larger(n) => m.size > *n,
        SearchKey::Smaller(n) => m.size < *n,
        SearchKey::Uid(uids) => uids.contains(&m.uid),
        SearchKey::ModSeq(threshold) => m.modseq >= *threshold,
        SearchKey::And(inner) => inner.iter().all(|k| eval(k, m)),
        SearchKey::Or(a, b) => eval(a, m) || eval(b, m),
        SearchKey::Not(inner) => !eval(inner, m),
    }
}

/// Runs the full criteria tree (already AND-ed at the top level, per IMAP
/// SEARCH grammar) against a batch of candidate messages, returning the
/// matching UIDs in ascending order.
pub fn search(keys: &[SearchKey], candidates: &[Message]) -> Vec<u32> {
    let top = SearchKey::And(keys.to_vec());
    let mut uids: Vec<u32> = candidates.iter().filter(|m| eval(&top, m)).map(|m| m.uid).collect();
    uids.sort_unstable();
    uids
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_store::ident::{MailboxId, MessageId};
    use corvid_store::model::{Envelope, MessageMeta, MessageSource};
    use std::collections::BTreeSet;

    fn msg(uid: u32, seen: bool, subject: &str, size: u64) -> Message {
        Message {
            id: MessageId::gen(),
            mailbox: MailboxId::gen(),
            uid,
            modseq: uid as u64,
            internaldate: Utc::now(),
            headerdate: Utc::now(),
            flags: if seen { BTreeSet::from(["\\Seen".to_string()]) } else { BTreeSet::new() },
            seen,
            flagged: false,
            deleted: false,
            size,
            envelope: Envelope {
                subject: Some(subject.to_string()),
                ..Default::default()
            },
            bodystructure: Default::default(),
            mime_tree: None,
            headers: vec![],
            meta: MessageMeta {
                source: MessageSource::Imap,
                recipient: None,
                ingest_time: Utc::now(),
            },
            attachments: vec![],
        }
    }

    #[test]
    fn and_of_seen_and_subject() {
        let candidates = vec![msg(1, true, "hello world", 10), msg(2, true, "goodbye", 10), msg(3, false, "hello again", 10)];
        let keys = vec![SearchKey::Seen, SearchKey::Subject("hello".into())];
        assert_eq!(search(&keys, &candidates), vec![1]);
    }

    #[test]
    fn or_combinator() {
        let candidates = vec![msg(1, true, "a", 5), msg(2, false, "b", 500)];
        let keys = vec![SearchKey::Or(Box::new(SearchKey::Seen), Box::new(SearchKey::Larger(100)))];
        assert_eq!(search(&keys, &candidates), vec![1, 2]);
    }

    #[test]
    fn not_combinator() {
        let candidates = vec![msg(1, true, "a", 5), msg(2, false, "b", 5)];
        let keys = vec![SearchKey::Not(Box::new(SearchKey::Seen))];
        assert_eq!(search(&keys, &candidates), vec![2]);
    }

    #[test]
    fn not_text_is_not_pushed_into_the_narrowed_query() {
        let with_foo = msg(1, false, "x", 5);
        let keys = vec![SearchKey::Not(Box::new(SearchKey::Text("foo".into())))];
        let compiled = compile(with_foo.mailbox, &keys);
        // TEXT has no index to negate against, so narrow() must leave this
        // criterion out of the pushed-down query entirely rather than
        // guessing at a (wrong) narrowing.
        assert!(compiled.query.deleted.is_none());
        assert!(compiled.query.seen.is_none());
        assert!(compiled.query.uids.is_none());
    }

    #[test]
    fn not_text_and_not_body_short_circuit_to_nothing() {
        let m = msg(1, false, "x", 5);

        let text_keys = vec![SearchKey::Not(Box::new(SearchKey::Text("foo".into())))];
        assert!(compile(m.mailbox, &text_keys).nothing);

        let body_keys = vec![SearchKey::Not(Box::new(SearchKey::Body("foo".into())))];
        assert!(compile(m.mailbox, &body_keys).nothing);

        assert!(!compile(m.mailbox, &[SearchKey::Seen]).nothing);
    }
}
