use thiserror::Error;

/// Programmatic error taxonomy for the storage gateway and the layers built
/// on top of it. String-shaped internal failures are carried as `anyhow`
/// errors instead (see `corvid-store::gateway::Gateway`); this enum only
/// covers outcomes a caller is expected to branch on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such mailbox")]
    NoSuchMailbox,
    #[error("mailbox already exists")]
    MailboxAlreadyExists,
    #[error("no such user")]
    NoSuchUser,
    #[error("no such message")]
    NoSuchMessage,
    #[error("mailbox is a special-use mailbox and cannot be deleted")]
    SpecialUseMailbox,
    #[error("quota exceeded")]
    OverQuota,
    #[error("internal storage error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
