use std::fmt;
use std::io;

use crate::store::ContentRef;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotARepository,
    ConfigParseError,
    TicketNotFound,
    MalformedCommentName,
    TicketNameCollision,
    CommentNameCollision,
    ContentMissing,
    CommitRejected,
    BranchMoved,
    TransactionState,
    StoreCommandFailed,
    StoreIoFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotARepository => "E1001",
            Self::ConfigParseError => "E1002",
            Self::TicketNotFound => "E2001",
            Self::MalformedCommentName => "E2002",
            Self::TicketNameCollision => "E2003",
            Self::CommentNameCollision => "E2004",
            Self::ContentMissing => "E3001",
            Self::CommitRejected => "E4001",
            Self::BranchMoved => "E4002",
            Self::TransactionState => "E4003",
            Self::StoreCommandFailed => "E5001",
            Self::StoreIoFailed => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotARepository => "Not a git repository",
            Self::ConfigParseError => "Config file parse error",
            Self::TicketNotFound => "Ticket not found",
            Self::MalformedCommentName => "Malformed comment file name",
            Self::TicketNameCollision => "Ticket name collision",
            Self::CommentNameCollision => "Comment name collision",
            Self::ContentMissing => "Content reference could not be resolved",
            Self::CommitRejected => "Commit rejected by the store",
            Self::BranchMoved => "Maintenance branch moved during commit",
            Self::TransactionState => "Transaction misuse",
            Self::StoreCommandFailed => "Store command failed",
            Self::StoreIoFailed => "Store I/O failed",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotARepository => Some("Run `git init` or change into a git repository."),
            Self::ConfigParseError => Some("Fix syntax in .tickbox/config.toml and retry."),
            Self::TicketNotFound => Some("Check the full ticket name (epoch_slug_suffix)."),
            Self::MalformedCommentName => Some("Comment files are named COMMENT_<epoch>_<email>."),
            Self::TicketNameCollision => Some("Retry creation; names embed a random suffix."),
            Self::CommentNameCollision => Some("Wait a few seconds and add the comment again."),
            Self::ContentMissing => Some("Fetch the maintenance branch so all blobs are local."),
            Self::CommitRejected | Self::StoreCommandFailed => {
                Some("Inspect the store output above; nothing was committed.")
            }
            Self::BranchMoved => Some("Another writer committed first. Reload the ticket and retry."),
            Self::TransactionState => None,
            Self::StoreIoFailed => Some("Check disk space and write permissions."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures raised by a [`VersionedStore`](crate::store::VersionedStore).
///
/// The tracker never retries these; they surface to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("`git {command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("{0} is not inside a git repository")]
    NotARepository(String),

    #[error("content {0} is not present in the store")]
    MissingContent(ContentRef),

    #[error("commit rejected: {0}")]
    CommitRejected(String),

    #[error("branch {branch} moved while committing; expected tip {expected}")]
    BranchMoved { branch: String, expected: String },

    #[error("no transaction is open")]
    NoTransaction,

    #[error("a transaction is already open")]
    TransactionActive,
}

impl StoreError {
    /// Machine-readable code associated with this store error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::StoreIoFailed,
            Self::Command { .. } => ErrorCode::StoreCommandFailed,
            Self::NotARepository(_) => ErrorCode::NotARepository,
            Self::MissingContent(_) => ErrorCode::ContentMissing,
            Self::CommitRejected(_) => ErrorCode::CommitRejected,
            Self::BranchMoved { .. } => ErrorCode::BranchMoved,
            Self::NoTransaction | Self::TransactionActive => ErrorCode::TransactionState,
        }
    }
}

/// Errors surfaced by ticket reads and mutations.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ticket {0} does not exist on the maintenance branch")]
    NotFound(String),

    #[error("comment file name {0:?} is not COMMENT_<epoch>_<email>")]
    MalformedCommentName(String),

    #[error("could not find a free ticket name for {0:?}")]
    NameCollision(String),

    #[error("ticket {0} already has comments for every nearby second")]
    CommentCollision(String),
}

impl TicketError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::NotFound(_) => ErrorCode::TicketNotFound,
            Self::MalformedCommentName(_) => ErrorCode::MalformedCommentName,
            Self::NameCollision(_) => ErrorCode::TicketNameCollision,
            Self::CommentCollision(_) => ErrorCode::CommentNameCollision,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, StoreError, TicketError};
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotARepository,
            ErrorCode::ConfigParseError,
            ErrorCode::TicketNotFound,
            ErrorCode::MalformedCommentName,
            ErrorCode::TicketNameCollision,
            ErrorCode::CommentNameCollision,
            ErrorCode::ContentMissing,
            ErrorCode::CommitRejected,
            ErrorCode::BranchMoved,
            ErrorCode::TransactionState,
            ErrorCode::StoreCommandFailed,
            ErrorCode::StoreIoFailed,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::BranchMoved.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn ticket_error_forwards_store_code() {
        let err = TicketError::from(StoreError::CommitRejected("hook failed".into()));
        assert_eq!(err.code(), ErrorCode::CommitRejected);
        assert!(err.hint().is_some());
        assert_eq!(err.to_string(), "commit rejected: hook failed");
    }
}
