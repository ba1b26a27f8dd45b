use crate::Reference;

/// A tagged variant describing a desired index mutation. Once dequeued
/// from the action queue, the Engine owns an action to completion,
/// including any retry.
#[derive(Debug, Clone)]
pub enum Action {
    /// Recrawl every configured registry.
    IndexAll,
    /// Recrawl one repository.
    IndexRepository { reference: Reference },
    /// Fetch one tagged image.
    IndexImage { reference: Reference },
    /// Remove one tagged image.
    DeleteImage { reference: Reference },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::IndexAll => write!(f, "IndexAll"),
            Action::IndexRepository { reference } => write!(f, "IndexRepository({reference})"),
            Action::IndexImage { reference } => write!(f, "IndexImage({reference})"),
            Action::DeleteImage { reference } => write!(f, "DeleteImage({reference})"),
        }
    }
}
