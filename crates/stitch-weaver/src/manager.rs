//! The weave manager
//!
//! One manager owns the bundle registry, the structure and validation
//! caches, and the weave entry point the host calls for every class it
//! loads. Registration swaps an immutable registry snapshot under a lock;
//! the weaving path only ever reads a snapshot, so weaving never blocks on
//! registration and re-registration invalidates cached validation through
//! the registry epoch.

use crate::archive;
use crate::bundle::{BundleConfig, TransformationBundle};
use crate::error::{ArchiveError, BundleError};
use crate::listener::LifecycleListener;
use crate::lru::{ContextLru, MAX_TRACKED_CONTEXTS};
use crate::matcher::{CandidateProfile, HostAnnotations, MatchIndex};
use crate::structure::{ClassDescriptor, ClassSource, ClassStructureCache, LoaderId};
use crate::validate::{check_candidate, validate_bundle, ValidationResult};
use crate::weave::{compose, PendingModule, WeaveOutcome};
use log::{debug, trace};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use stitch_classfile::ClassFile;

#[derive(Default)]
struct Registry {
    /// Bumped on every registration change; stale epochs invalidate cached
    /// validation results
    epoch: u64,
    bundles: Vec<Arc<TransformationBundle>>,
    index: MatchIndex,
}

/// Owns every registered bundle and weaves candidate classes against them
pub struct WeaveManager {
    registry: RwLock<Arc<Registry>>,
    structure: ClassStructureCache,
    validations: ContextLru,
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
}

impl WeaveManager {
    /// Create a manager with no bundles registered
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Arc::new(Registry::default())),
            structure: ClassStructureCache::new(),
            validations: ContextLru::new(MAX_TRACKED_CONTEXTS),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Attach a lifecycle listener
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.write().push(listener);
    }

    /// Compile and register a bundle from its class bodies
    ///
    /// A disabled config is ignored and `Ok(false)` returned. Registering a
    /// bundle under a name already taken replaces the previous bundle.
    pub fn register(&self, config: BundleConfig, bodies: &[Vec<u8>]) -> Result<bool, BundleError> {
        if !config.enabled {
            debug!("ignoring disabled bundle {}", config.name);
            return Ok(false);
        }
        let bundle = TransformationBundle::compile(config, bodies)?;
        self.install(bundle);
        Ok(true)
    }

    /// Register an already-compiled bundle
    pub fn register_bundle(&self, bundle: TransformationBundle) {
        self.install(bundle);
    }

    /// Read a packaged bundle archive and register it
    ///
    /// A disabled manifest is ignored, mirroring [`register`](Self::register).
    pub fn register_archive(&self, path: &Path) -> Result<bool, ArchiveError> {
        match archive::read_bundle(path)? {
            Some(bundle) => {
                self.install(bundle);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a bundle by name; returns whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        {
            let mut registry = self.registry.write();
            let mut bundles = registry.bundles.clone();
            let before = bundles.len();
            bundles.retain(|b| b.name() != name);
            if bundles.len() == before {
                return false;
            }
            *registry = Arc::new(Self::rebuilt(registry.epoch + 1, bundles));
        }
        for listener in self.listeners.read().iter() {
            listener.bundle_deregistered(name);
        }
        true
    }

    /// Look up a registered bundle by name
    pub fn bundle(&self, name: &str) -> Option<Arc<TransformationBundle>> {
        self.registry
            .read()
            .bundles
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    /// Names of every registered bundle, in registration order
    pub fn bundle_names(&self) -> Vec<String> {
        self.registry
            .read()
            .bundles
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    /// The cached (or freshly computed) validation of a bundle against a
    /// loading-context
    pub fn validation(
        &self,
        bundle_name: &str,
        source: &dyn ClassSource,
        loader: LoaderId,
    ) -> Option<Arc<ValidationResult>> {
        let registry = self.registry.read().clone();
        let bundle = registry.bundles.iter().find(|b| b.name() == bundle_name)?;
        Some(self.validation_for(registry.epoch, bundle, source, loader))
    }

    /// Weave one candidate class, returning the full outcome
    pub fn weave_class(
        &self,
        source: &dyn ClassSource,
        loader: LoaderId,
        candidate_bytes: &[u8],
        host: Option<&HostAnnotations>,
    ) -> WeaveOutcome {
        let registry = self.registry.read().clone();
        if registry.bundles.is_empty() {
            return WeaveOutcome::unchanged();
        }

        let candidate = match ClassFile::decode(candidate_bytes) {
            Ok(candidate) => candidate,
            // the host keeps loading whatever it handed us
            Err(error) => {
                debug!("candidate could not be decoded, passing through: {error}");
                return WeaveOutcome::unchanged();
            }
        };
        let descriptor = ClassDescriptor::from_class(&candidate);
        let closure = self.structure.closure_of(source, loader, &descriptor);
        let profile = CandidateProfile::new(&descriptor, &closure, host);

        if !registry.index.possible_match(&profile) {
            trace!("fast-rejected {}", profile.name);
            return WeaveOutcome::unchanged();
        }

        let mut pending = Vec::new();
        for bundle in &registry.bundles {
            let matched = bundle.matched_modules(&profile);
            if matched.is_empty() {
                continue;
            }
            let validation = self.validation_for(registry.epoch, bundle, source, loader);
            for index in matched {
                let module = &bundle.modules()[index];
                if !validation.module_valid(module.name()) {
                    trace!(
                        "module {} of bundle {} skipped in {:?}: failed context validation",
                        module.name(),
                        bundle.name(),
                        loader
                    );
                    continue;
                }
                let candidate_violations = check_candidate(module, &descriptor, &closure);
                if !candidate_violations.is_empty() {
                    debug!(
                        "module {} skipped for {}: {} candidate violation(s)",
                        module.name(),
                        profile.name,
                        candidate_violations.len()
                    );
                    continue;
                }
                pending.push(PendingModule {
                    bundle_name: bundle.name(),
                    module,
                });
            }
        }
        if pending.is_empty() {
            return WeaveOutcome::unchanged();
        }

        let (woven, applied) = compose(candidate, pending);
        if applied.is_empty() {
            return WeaveOutcome::unchanged();
        }
        for listener in self.listeners.read().iter() {
            listener.class_woven(&woven.name, loader, &applied);
        }
        WeaveOutcome {
            bytes: Some(woven.encode()),
            applied,
        }
    }

    /// Weave one candidate class
    ///
    /// This is the shape of the host's load hook: rewritten bytes, or `None`
    /// to load the candidate untouched. No input ever makes this fail.
    pub fn weave(
        &self,
        source: &dyn ClassSource,
        loader: LoaderId,
        candidate_bytes: &[u8],
        host: Option<&HostAnnotations>,
    ) -> Option<Vec<u8>> {
        self.weave_class(source, loader, candidate_bytes, host).bytes
    }

    /// Drop all cached state for an unloaded loading-context
    pub fn context_unloaded(&self, loader: LoaderId) {
        self.validations.forget(loader);
        self.structure.evict_loader(loader);
        for listener in self.listeners.read().iter() {
            listener.context_unloaded(loader);
        }
    }

    /// Number of loading-contexts with cached validation state
    pub fn tracked_contexts(&self) -> usize {
        self.validations.tracked()
    }

    fn install(&self, bundle: TransformationBundle) {
        let bundle = Arc::new(bundle);
        {
            let mut registry = self.registry.write();
            let mut bundles = registry.bundles.clone();
            match bundles.iter_mut().find(|b| b.name() == bundle.name()) {
                Some(existing) => *existing = bundle.clone(),
                None => bundles.push(bundle.clone()),
            }
            *registry = Arc::new(Self::rebuilt(registry.epoch + 1, bundles));
        }
        for listener in self.listeners.read().iter() {
            listener.bundle_registered(&bundle);
        }
    }

    fn rebuilt(epoch: u64, bundles: Vec<Arc<TransformationBundle>>) -> Registry {
        let mut index = MatchIndex::new();
        for bundle in &bundles {
            index.add_bundle(bundle);
        }
        Registry {
            epoch,
            bundles,
            index,
        }
    }

    fn validation_for(
        &self,
        epoch: u64,
        bundle: &TransformationBundle,
        source: &dyn ClassSource,
        loader: LoaderId,
    ) -> Arc<ValidationResult> {
        let (cached, evicted) = self.validations.cached(loader, epoch, bundle.name());
        if let Some(victim) = evicted {
            self.structure.evict_loader(victim);
        }
        if let Some(result) = cached {
            return result;
        }
        let result = Arc::new(validate_bundle(bundle, &self.structure, source, loader));
        self.validations
            .store(loader, epoch, bundle.name(), result.clone());
        for listener in self.listeners.read().iter() {
            listener.bundle_validated(&result, loader);
        }
        result
    }
}

impl Default for WeaveManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ORIGINAL_METHOD, ORIGINAL_OWNER, TARGET};
    use rustc_hash::FxHashMap;
    use stitch_classfile::{flags, Annotation, Insn, Method};

    struct MapSource {
        classes: FxHashMap<String, Vec<u8>>,
    }

    impl MapSource {
        fn new(classes: Vec<ClassFile>) -> Self {
            Self {
                classes: classes
                    .into_iter()
                    .map(|c| (c.name.clone(), c.encode()))
                    .collect(),
            }
        }
    }

    impl ClassSource for MapSource {
        fn class_bytes(&self, _loader: LoaderId, name: &str) -> Option<Vec<u8>> {
            self.classes.get(name).cloned()
        }
    }

    const APP: LoaderId = LoaderId(7);

    fn service_class() -> ClassFile {
        let mut class = ClassFile::new("app/Service");
        class.methods.push(Method {
            name: "handle".to_string(),
            descriptor: "()S".to_string(),
            access: flags::PUBLIC,
            annotations: Vec::new(),
            code: vec![Insn::Const("original".to_string()), Insn::Return],
        });
        class
    }

    fn probe_module() -> ClassFile {
        let mut class = ClassFile::new("ext/Probe");
        class.annotations.push(Annotation::with_values(
            TARGET,
            vec![("name".to_string(), "app/Service".to_string())],
        ));
        class.methods.push(Method {
            name: "handle".to_string(),
            descriptor: "()S".to_string(),
            access: flags::PUBLIC,
            annotations: Vec::new(),
            code: vec![
                Insn::Const("probe:".to_string()),
                Insn::Invoke {
                    owner: ORIGINAL_OWNER.to_string(),
                    name: ORIGINAL_METHOD.to_string(),
                    descriptor: "()S".to_string(),
                },
                Insn::Concat,
                Insn::Return,
            ],
        });
        class
    }

    #[test]
    fn test_unmatched_class_passes_through() {
        let manager = WeaveManager::new();
        manager
            .register(
                BundleConfig::builder("probes").build(),
                &[probe_module().encode()],
            )
            .unwrap();
        let source = MapSource::new(vec![]);
        let unrelated = ClassFile::new("app/Unrelated").encode();
        assert!(manager.weave(&source, APP, &unrelated, None).is_none());
    }

    #[test]
    fn test_matched_class_is_rewritten() {
        let manager = WeaveManager::new();
        manager
            .register(
                BundleConfig::builder("probes").build(),
                &[probe_module().encode()],
            )
            .unwrap();
        let source = MapSource::new(vec![]);
        let woven = manager
            .weave(&source, APP, &service_class().encode(), None)
            .unwrap();
        let woven = ClassFile::decode(&woven).unwrap();
        assert!(woven.method("handle", "()S").is_some());
        assert!(woven.method("handle$original$0", "()S").is_some());
    }

    #[test]
    fn test_malformed_candidate_passes_through() {
        let manager = WeaveManager::new();
        manager
            .register(
                BundleConfig::builder("probes").build(),
                &[probe_module().encode()],
            )
            .unwrap();
        let source = MapSource::new(vec![]);
        assert!(manager.weave(&source, APP, b"not a class", None).is_none());
    }

    #[test]
    fn test_reregistration_refreshes_cached_validation() {
        let manager = WeaveManager::new();
        manager
            .register(
                BundleConfig::builder("probes").build(),
                &[probe_module().encode()],
            )
            .unwrap();
        let source = MapSource::new(vec![]);

        let first = manager.validation("probes", &source, APP).unwrap();
        let again = manager.validation("probes", &source, APP).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        manager
            .register(
                BundleConfig::builder("probes").build(),
                &[probe_module().encode()],
            )
            .unwrap();
        let refreshed = manager.validation("probes", &source, APP).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
    }

    #[test]
    fn test_unregister_removes_bundle() {
        let manager = WeaveManager::new();
        manager
            .register(
                BundleConfig::builder("probes").build(),
                &[probe_module().encode()],
            )
            .unwrap();
        assert!(manager.unregister("probes"));
        assert!(!manager.unregister("probes"));
        let source = MapSource::new(vec![]);
        assert!(manager
            .weave(&source, APP, &service_class().encode(), None)
            .is_none());
    }
}
