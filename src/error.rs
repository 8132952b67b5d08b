// The error taxonomy of spec.md §7. Every variant is fatal to the run
// that produces it; `LinkPrecedenceTie` is logged via `tracing::warn!`
// rather than constructed here, since spec.md classifies it as a warning
// except when it recurs as a duplicate-local-symbol conflict during
// export-jump emission (`ExportJumpCollision` below).

use crate::model::Signature;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata error in `{file}`: {reason}")]
    Metadata { file: PathBuf, reason: String },

    #[error("unresolved ambiguity: `{0}` has an unknown file but is referenced from the module")]
    UnresolvedAmbiguity(String),

    #[error("sidecar invariant violated: {0}")]
    SidecarInvariant(String),

    #[error("struct `{struct_name}` is required to be purely private but has public users: {users:?}")]
    PrivacyViolation {
        struct_name: String,
        users: Vec<Signature>,
    },

    #[error("unsafe redirect through mangled symbol {0}")]
    MangledRedirect(Signature),

    #[error("symbol `{0}` has multiple local definitions; export-jump emission cannot pick a winner")]
    ExportJumpCollision(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
