//! Failure kinds that callers need to tell apart.
//!
//! Everything in the crate returns `anyhow::Result`; these values ride inside
//! the `anyhow::Error` and can be recovered with `downcast_ref::<MigrateError>()`.

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MigrateError {
    /// Unsupported browser, missing path or an unreadable credential store.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Source page or media asset could not be fetched.
    #[error("failed to fetch {url}: {message}")]
    UpstreamFetch {
        /// URL that was requested.
        url: String,
        /// Transport error or HTTP status.
        message: String,
    },

    /// Sidebar count sequences do not add up.
    #[error("sidebar structure is inconsistent: {0}")]
    StructuralInconsistency(String),

    /// A markup scan step made no progress.
    #[error("markup scanner stalled at byte {offset}")]
    NonTermination {
        /// Byte offset into the input where the scanner stopped advancing.
        offset: usize,
    },
}

impl MigrateError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn upstream(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamFetch {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralInconsistency(message.into())
    }
}
