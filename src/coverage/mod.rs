//! The coverage engine: parse, merge, and analyse coverage profiles, and
//! build check-run annotations from the analysis.
//!
//! The engine is pure. It knows nothing about the forge, the queue, or the
//! blob store; the worker feeds it bytes and carries its results back out.

pub mod analysis;
pub mod annotations;
pub mod archive;
pub mod merge;
pub mod profile;

use thiserror::Error;

pub use analysis::{AnalysisResult, Comparison, CoverageStats, FileStats, analyze, compare, coverage_stats};
pub use annotations::{Annotation, AnnotationLevel, LineRange, build_annotations, sort_and_group};
pub use archive::parse_profiles_from_zip;
pub use merge::merge_profiles;
pub use profile::{Block, BlockKey, Mode, Profile, parse_profiles, serialize_profiles, validate_profile};

/// Errors produced by the coverage engine.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The input buffer contained zero bytes.
    #[error("coverage data is empty")]
    EmptyProfile,

    /// A header or body line did not match the profile format.
    #[error("malformed profile at line {line}: {reason}")]
    MalformedProfile { line: usize, reason: String },

    /// Profiles with different modes were merged together.
    #[error("profile {index} has mode {found}, expected {expected}")]
    ModeMismatch {
        index: usize,
        expected: Mode,
        found: Mode,
    },

    /// A merge or serialisation was attempted over zero profiles, or an
    /// archive contained no parseable coverage entries.
    #[error("no coverage profiles")]
    NoProfiles,

    /// A parsed block violates the structural invariants. These indicate a
    /// bug in whatever produced the profile, not a recoverable input error.
    #[error("invalid block {index} in {file}: {reason}")]
    InvalidBlock {
        file: String,
        index: usize,
        reason: String,
    },

    /// The artifact archive itself could not be read.
    #[error("failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// An archive entry could not be read.
    #[error("failed to read archive entry: {0}")]
    Io(#[from] std::io::Error),
}
