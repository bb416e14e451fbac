//! Bundle compilation
//!
//! A bundle is an ordered collection of class bodies compiled once at
//! registration into modules, utility classes, guards, and the aggregate
//! index sets used for cheap rejection during matching. Compiled bundles
//! are immutable.

use crate::error::BundleError;
use crate::matcher::CandidateProfile;
use crate::module::{classify, ClassRole, Selector, TransformationModule};
use crate::reference::StructuralReference;
use crate::violation::ViolationKind;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use stitch_classfile::ClassFile;

/// Metadata describing one bundle
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Bundle name; unique within a manager
    pub name: String,
    /// Optional alias the packaging side may carry
    pub alias: Option<String>,
    /// Optional vendor string
    pub vendor: Option<String>,
    /// Bundle version
    pub version: f64,
    /// Disabled bundles are ignored at registration
    pub enabled: bool,
    /// Default composition priority for the bundle's modules
    pub priority: i64,
    /// Violation kinds this bundle tolerates during validation
    pub suppressed_violations: FxHashSet<ViolationKind>,
}

impl BundleConfig {
    /// Start building a config with the given bundle name
    pub fn builder(name: impl Into<String>) -> BundleConfigBuilder {
        BundleConfigBuilder {
            config: BundleConfig {
                name: name.into(),
                alias: None,
                vendor: None,
                version: 1.0,
                enabled: true,
                priority: 0,
                suppressed_violations: FxHashSet::default(),
            },
        }
    }
}

/// Builder for [`BundleConfig`]
pub struct BundleConfigBuilder {
    config: BundleConfig,
}

impl BundleConfigBuilder {
    /// Set the alias
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.config.alias = Some(alias.into());
        self
    }

    /// Set the vendor
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.config.vendor = Some(vendor.into());
        self
    }

    /// Set the version
    pub fn version(mut self, version: f64) -> Self {
        self.config.version = version;
        self
    }

    /// Enable or disable the bundle
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Set the default module priority
    pub fn priority(mut self, priority: i64) -> Self {
        self.config.priority = priority;
        self
    }

    /// Suppress a violation kind during validation
    pub fn suppress(mut self, kind: ViolationKind) -> Self {
        self.config.suppressed_violations.insert(kind);
        self
    }

    /// Finish building
    pub fn build(self) -> BundleConfig {
        self.config
    }
}

/// A compiled, immutable bundle of transformation modules
#[derive(Debug)]
pub struct TransformationBundle {
    config: BundleConfig,
    modules: Vec<TransformationModule>,
    utilities: FxHashMap<String, ClassFile>,
    guards: FxHashSet<String>,
    references: Vec<StructuralReference>,
    required_names: FxHashSet<String>,
    class_annotation_index: FxHashSet<String>,
    method_annotation_index: FxHashSet<String>,
    method_signatures: FxHashSet<(String, String)>,
}

impl TransformationBundle {
    /// Compile a bundle from its class bodies
    ///
    /// Build-time violations in any body abort the whole compilation;
    /// nothing about a bundle is ever partially usable.
    pub fn compile(config: BundleConfig, bodies: &[Vec<u8>]) -> Result<Self, BundleError> {
        let mut classes = Vec::with_capacity(bodies.len());
        let mut names = FxHashSet::default();
        for body in bodies {
            let class = ClassFile::decode(body)?;
            if !names.insert(class.name.clone()) {
                return Err(BundleError::DuplicateClass(class.name));
            }
            classes.push(class);
        }

        let mut modules = Vec::new();
        let mut utilities = FxHashMap::default();
        let mut guards = FxHashSet::default();
        let mut violations = Vec::new();

        for class in classes {
            match classify(class, config.priority) {
                Ok(ClassRole::Module(module)) => modules.push(module),
                Ok(ClassRole::Utility(class)) => {
                    utilities.insert(class.name.clone(), class);
                }
                Ok(ClassRole::Guard { class_name }) => {
                    guards.insert(class_name);
                }
                Err(mut class_violations) => violations.append(&mut class_violations),
            }
        }

        if !violations.is_empty() {
            return Err(BundleError::Violations {
                name: config.name,
                violations,
            });
        }

        // references to classes the bundle itself carries are already
        // resolved; everything else must be proven per loading-context
        let own_names: FxHashSet<&str> = modules
            .iter()
            .map(|m| m.name())
            .chain(utilities.keys().map(String::as_str))
            .collect();
        let mut references = Vec::new();
        for class in modules
            .iter()
            .map(|m| &m.class)
            .chain(utilities.values())
        {
            for reference in StructuralReference::extract(class) {
                if own_names.contains(reference.class_name.as_str()) {
                    continue;
                }
                references.push(reference);
            }
        }

        let mut required_names = FxHashSet::default();
        let mut class_annotation_index = FxHashSet::default();
        let mut method_annotation_index = FxHashSet::default();
        let mut method_signatures = FxHashSet::default();
        for module in &modules {
            match &module.selector {
                Selector::Exact(name) | Selector::Supertype(name) => {
                    required_names.insert(name.clone());
                }
                Selector::Annotation {
                    class_annotations,
                    method_annotations,
                } => {
                    class_annotation_index.extend(class_annotations.iter().cloned());
                    method_annotation_index.extend(method_annotations.iter().cloned());
                }
            }
            for method in module.matched_methods() {
                method_signatures.insert((method.name.clone(), method.descriptor.clone()));
            }
        }

        debug!(
            "compiled bundle {} v{}: {} module(s), {} utility class(es), {} guard(s), {} reference(s)",
            config.name,
            config.version,
            modules.len(),
            utilities.len(),
            guards.len(),
            references.len()
        );

        Ok(Self {
            config,
            modules,
            utilities,
            guards,
            references,
            required_names,
            class_annotation_index,
            method_annotation_index,
            method_signatures,
        })
    }

    /// Bundle name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bundle metadata
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// The bundle's modules, in declaration order
    pub fn modules(&self) -> &[TransformationModule] {
        &self.modules
    }

    /// Utility classes carried with the bundle
    pub fn utilities(&self) -> &FxHashMap<String, ClassFile> {
        &self.utilities
    }

    /// Skip-if-present guard class names
    pub fn guards(&self) -> &FxHashSet<String> {
        &self.guards
    }

    /// External structural references, one per (origin, referenced class)
    pub fn references(&self) -> &[StructuralReference] {
        &self.references
    }

    /// Exact/supertype target names for fast rejection
    pub fn required_names(&self) -> &FxHashSet<String> {
        &self.required_names
    }

    /// Class annotation triggers for fast rejection
    pub fn class_annotation_index(&self) -> &FxHashSet<String> {
        &self.class_annotation_index
    }

    /// Method annotation triggers for fast rejection
    pub fn method_annotation_index(&self) -> &FxHashSet<String> {
        &self.method_annotation_index
    }

    /// Matched method signatures for fast rejection
    pub fn method_signatures(&self) -> &FxHashSet<(String, String)> {
        &self.method_signatures
    }

    /// Indices of the modules whose selector matches the candidate
    pub fn matched_modules(&self, candidate: &CandidateProfile) -> Vec<usize> {
        let mut matched = Vec::new();
        for (index, module) in self.modules.iter().enumerate() {
            let hit = match &module.selector {
                Selector::Exact(name) => name == &candidate.name,
                Selector::Supertype(name) => {
                    name == &candidate.name
                        || candidate.super_names.iter().any(|s| s == name)
                        || candidate.interface_names.iter().any(|i| i == name)
                }
                Selector::Annotation {
                    class_annotations,
                    method_annotations,
                } => {
                    class_annotations
                        .iter()
                        .any(|a| candidate.class_annotations.contains(a))
                        || method_annotations
                            .iter()
                            .any(|a| candidate.method_annotations.contains(a))
                }
            };
            if hit {
                matched.push(index);
            }
        }
        matched
    }
}
