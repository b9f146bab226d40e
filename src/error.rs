//! The one enumerable domain error. Soft out-of-core states (missing page,
//! full queue, no free slot) are represented as `bool`/`Option`, not as
//! errors — see spec.md Error Handling Design.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScmError {
    #[error("unknown SCM file {0:?}")]
    UnknownFile(String),

    #[error("SCM file not found on SCMPATH: {0:?}")]
    NotFoundOnPath(String),

    #[error("malformed SCM container: {0}")]
    MalformedContainer(String),
}
