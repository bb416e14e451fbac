//! Lifecycle observation
//!
//! Hosts hang diagnostics off the manager through this trait. Every method
//! defaults to a no-op so implementors only override what they care about.
//! Listeners run inline on the weaving path and must stay cheap.

use crate::bundle::TransformationBundle;
use crate::structure::LoaderId;
use crate::validate::ValidationResult;
use crate::weave::AppliedModule;
use log::{debug, info};

/// Observer of manager lifecycle events
pub trait LifecycleListener: Send + Sync {
    /// A bundle finished compiling and joined the registry
    fn bundle_registered(&self, bundle: &TransformationBundle) {
        let _ = bundle;
    }

    /// A bundle was removed from the registry
    fn bundle_deregistered(&self, name: &str) {
        let _ = name;
    }

    /// A bundle was freshly validated against a loading-context
    fn bundle_validated(&self, result: &ValidationResult, loader: LoaderId) {
        let _ = (result, loader);
    }

    /// A candidate class was rewritten
    fn class_woven(&self, class_name: &str, loader: LoaderId, applied: &[AppliedModule]) {
        let _ = (class_name, loader, applied);
    }

    /// A loading-context was reported unloaded and its state dropped
    fn context_unloaded(&self, loader: LoaderId) {
        let _ = loader;
    }
}

/// A listener that forwards every event to the log facade
#[derive(Debug, Default)]
pub struct LogListener;

impl LifecycleListener for LogListener {
    fn bundle_registered(&self, bundle: &TransformationBundle) {
        info!(
            "registered bundle {} v{} ({} modules)",
            bundle.name(),
            bundle.config().version,
            bundle.modules().len()
        );
    }

    fn bundle_deregistered(&self, name: &str) {
        info!("deregistered bundle {name}");
    }

    fn bundle_validated(&self, result: &ValidationResult, loader: LoaderId) {
        debug!(
            "validated bundle {} against {:?}: succeeded={}, {} violation(s)",
            result.bundle_name(),
            loader,
            result.succeeded(),
            result.violations().len()
        );
    }

    fn class_woven(&self, class_name: &str, loader: LoaderId, applied: &[AppliedModule]) {
        info!(
            "wove {} in {:?} with {} module(s)",
            class_name,
            loader,
            applied.len()
        );
    }

    fn context_unloaded(&self, loader: LoaderId) {
        debug!("dropped state for unloaded context {:?}", loader);
    }
}
