//! Conversion between `imap_codec`'s parsed `Flag` type and this server's
//! storage representation (a plain `String`, `\`-prefixed for system
//! flags — see `corvid_store::model`).

use imap_codec::imap_types::flag::{Flag, StoreType};

pub fn flag_to_string(f: &Flag<'_>) -> String {
    match f {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::Keyword(a) => a.as_ref().to_string(),
        Flag::Extension(a) => format!("\\{}", a.as_ref()),
    }
}

/// Renders an IMAP flag list parenthesized atom string, e.g. `(\Seen foo)`.
pub fn render_flag_list<'a>(flags: impl IntoIterator<Item = &'a String>) -> String {
    let joined = flags.into_iter().cloned().collect::<Vec<_>>().join(" ");
    format!("({})", joined)
}

pub fn is_add(kind: &StoreType) -> Option<bool> {
    match kind {
        StoreType::Add => Some(true),
        StoreType::Remove => Some(false),
        StoreType::Replace => None,
    }
}
