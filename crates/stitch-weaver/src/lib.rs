//! Annotation-driven class transformation for managed-runtime hosts.
//!
//! Bundles of transformation modules are compiled at registration, proven
//! against each loading-context they meet, and composed into candidate
//! classes as the host loads them. The weaving path never fails: a class
//! that cannot be safely rewritten loads untouched, and a module whose
//! structural assumptions do not hold in a context is dropped there.
//!
//! The host drives everything through a [`WeaveManager`]:
//!
//! ```no_run
//! use stitch_weaver::{BundleConfig, ClassSource, LoaderId, WeaveManager};
//!
//! # fn load(source: &dyn ClassSource, bodies: &[Vec<u8>], candidate: &[u8]) {
//! let manager = WeaveManager::new();
//! manager
//!     .register(BundleConfig::builder("probes").build(), bodies)
//!     .unwrap();
//!
//! // inside the host's load hook:
//! match manager.weave(source, LoaderId::BOOTSTRAP, candidate, None) {
//!     Some(rewritten) => { /* define the rewritten class */ }
//!     None => { /* define the candidate untouched */ }
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod bundle;
pub mod error;
pub mod listener;
mod lru;
pub mod manager;
pub mod matcher;
pub mod module;
pub mod reference;
pub mod structure;
pub mod validate;
pub mod violation;
pub mod weave;

pub use bundle::{BundleConfig, BundleConfigBuilder, TransformationBundle};
pub use error::{ArchiveError, BundleError};
pub use listener::{LifecycleListener, LogListener};
pub use lru::MAX_TRACKED_CONTEXTS;
pub use manager::WeaveManager;
pub use matcher::{CandidateProfile, HostAnnotations};
pub use module::{Selector, TransformationModule};
pub use structure::{ClassSource, LoaderId};
pub use validate::{Outcome, ValidationResult};
pub use violation::{MemberDesc, ViolationKind, WeaveViolation};
pub use weave::{AppliedModule, WeaveOutcome};
