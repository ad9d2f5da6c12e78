use thiserror::Error;

/// Everything the tracker can report. Only [`Error::AllocationFailed`] can be
/// fatal, and only under [`crate::config::FailurePolicy::Abort`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Memory allocation returned a null pointer, no space left! ({size} bytes requested)")]
    AllocationFailed { size: usize },

    #[error("Could not reallocate to {size} bytes, old contents returned")]
    ResizeFailed { size: usize },

    #[error("{untracked} pointer{} unable to track", plural(.untracked))]
    RegistryOverflow { untracked: usize },

    #[error("Pointer tracking is disabled (registry capacity is 0)")]
    TrackingDisabled,

    #[error(
        "{releases} total release{} and {allocations} total allocation{}",
        plural(.releases),
        plural(.allocations)
    )]
    LeakMismatch {
        allocations: usize,
        releases: usize,
        /// How many pointers the triggered drain released
        drained: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn plural(n: &usize) -> &'static str {
    if *n == 1 {
        ""
    } else {
        "s"
    }
}

pub type Result<T> = std::result::Result<T, Error>;
