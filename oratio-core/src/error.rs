use thiserror::Error;

/// All errors produced by oratio-core.
///
/// Warnings (fallback classification, forced segmentation, KB overwrite, …)
/// are not errors: they are logged through `tracing` and counted in
/// [`PipelineStats`](crate::data::PipelineStats).
#[derive(Debug, Error)]
pub enum OratioError {
    #[error("item buffer overflow")]
    BufOverflow,

    #[error("item buffer underflow — partial or invalid item in buffer")]
    BufUnderflow,

    #[error("knowledge file corrupt: {0}")]
    FileCorrupt(&'static str),

    #[error("unexpected file type: {0}")]
    UnexpectedFileType(String),

    #[error("knowledge base missing: {0}")]
    KbMissing(&'static str),

    #[error("resource is busy: {name} (lock count {locks})")]
    ResourceBusy { name: String, locks: u32 },

    #[error("resource missing: {0}")]
    ResourceMissing(String),

    #[error("name conflict: {0}")]
    NameConflict(String),

    #[error("name undefined: {0}")]
    NameUndefined(String),

    #[error("illegal name: {0}")]
    NameIllegal(String),

    #[error("maximum number exceeded: {0}")]
    MaxNumExceeded(&'static str),

    #[error("index out of range")]
    IndexOutOfRange,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OratioError>;
