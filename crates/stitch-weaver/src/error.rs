//! Registration-time errors
//!
//! Everything here is fatal for the bundle being registered and nothing
//! else: the weaving path itself never surfaces errors, it falls through to
//! unchanged bytes.

use crate::violation::WeaveViolation;
use stitch_classfile::ClassFileError;
use thiserror::Error;

/// Errors raised while compiling a bundle from class bodies
#[derive(Debug, Error)]
pub enum BundleError {
    /// A class body in the bundle could not be decoded
    #[error("Malformed class body in bundle: {0}")]
    Malformed(#[from] ClassFileError),

    /// Two class bodies in the bundle declare the same name
    #[error("Duplicate class {0} in bundle")]
    DuplicateClass(String),

    /// The bundle compiled with build-time violations
    #[error("Bundle {name} failed to compile with {} violation(s)", violations.len())]
    Violations {
        /// Bundle name
        name: String,
        /// Everything that was wrong with the bundle's own classes
        violations: Vec<WeaveViolation>,
    },
}

/// Errors raised while reading a packaged bundle archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Archive could not be read
    #[error("Failed to read bundle archive: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest could not be parsed
    #[error("Failed to parse bundle manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    /// Manifest could not be serialized while packaging
    #[error("Failed to encode bundle manifest: {0}")]
    ManifestEncode(#[from] toml::ser::Error),

    /// Archive contains no manifest entry
    #[error("Bundle archive is missing bundle.toml")]
    MissingManifest,

    /// Manifest suppresses a violation kind this build does not know
    #[error("Unknown violation kind {0:?} in bundle manifest")]
    UnknownViolationKind(String),

    /// Archive contents failed to compile
    #[error(transparent)]
    Bundle(#[from] BundleError),
}
