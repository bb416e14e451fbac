//! Validation of bundles against loading-contexts and candidates
//!
//! Two layers, mirroring what can be cached:
//! - context-level: every structural reference and guard of a bundle is
//!   proven against one loading-context; the result is cached per
//!   (bundle, context) and reused for every class loaded there.
//! - candidate-level: a matched module's assumptions about the specific
//!   class being woven (matched members exist, new members do not); cheap,
//!   computed per weave call, never cached.

use crate::bundle::TransformationBundle;
use crate::module::{Selector, TransformationModule};
use crate::structure::{ClassDescriptor, ClassSource, ClassStructureCache, HierarchyClosure, LoaderId};
use crate::violation::{ViolationKind, WeaveViolation};
use log::debug;
use rustc_hash::FxHashSet;

/// Whether a bundle as a whole is usable in a loading-context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The bundle may weave in the context (individual modules may still be dropped)
    Valid,
    /// The bundle must not weave anything in the context
    Invalid,
}

/// Immutable result of validating one bundle against one loading-context
#[derive(Debug)]
pub struct ValidationResult {
    bundle_name: String,
    outcome: Outcome,
    violations: Vec<WeaveViolation>,
    invalid_modules: FxHashSet<String>,
}

impl ValidationResult {
    /// Name of the validated bundle
    pub fn bundle_name(&self) -> &str {
        &self.bundle_name
    }

    /// Whether the bundle is usable in the context
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Valid
    }

    /// Every violation found, after suppression
    pub fn violations(&self) -> &[WeaveViolation] {
        &self.violations
    }

    /// Whether the named module survived reference validation
    pub fn module_valid(&self, module_name: &str) -> bool {
        self.outcome == Outcome::Valid && !self.invalid_modules.contains(module_name)
    }
}

/// Prove a bundle's references and guards against one loading-context
pub fn validate_bundle(
    bundle: &TransformationBundle,
    cache: &ClassStructureCache,
    source: &dyn ClassSource,
    loader: LoaderId,
) -> ValidationResult {
    let mut violations = Vec::new();

    for guard in bundle.guards() {
        if cache.resolve(source, loader, guard).is_some() {
            violations.push(WeaveViolation::of_class(
                ViolationKind::SkipIfPresent,
                guard,
                bundle.name(),
            ));
        }
    }

    for reference in bundle.references() {
        match cache.resolve(source, loader, &reference.class_name) {
            Some(descriptor) => violations.extend(reference.check(&descriptor)),
            // unresolvable counts as unproven, never as a crash
            None => violations.push(WeaveViolation::of_class(
                ViolationKind::ClassMissing,
                &reference.class_name,
                &reference.origin,
            )),
        }
    }

    let suppressed = &bundle.config().suppressed_violations;
    violations.retain(|v| !suppressed.contains(&v.kind));

    // violations originating in a module only drop that module; anything
    // else (guards, utility classes) poisons the bundle for this context
    let module_names: FxHashSet<&str> = bundle.modules().iter().map(|m| m.name()).collect();
    let mut invalid_modules = FxHashSet::default();
    let mut bundle_wide = false;
    for violation in &violations {
        if module_names.contains(violation.origin.as_str()) {
            invalid_modules.insert(violation.origin.clone());
        } else {
            bundle_wide = true;
        }
    }

    let outcome = if bundle_wide {
        Outcome::Invalid
    } else {
        Outcome::Valid
    };

    if !violations.is_empty() {
        debug!(
            "validated bundle {} against context {:?}: {:?}, {} violation(s)",
            bundle.name(),
            loader,
            outcome,
            violations.len()
        );
    }

    ValidationResult {
        bundle_name: bundle.name().to_string(),
        outcome,
        violations,
        invalid_modules,
    }
}

/// Check a matched module's assumptions about the candidate class itself
pub fn check_candidate(
    module: &TransformationModule,
    candidate: &ClassDescriptor,
    closure: &HierarchyClosure,
) -> Vec<WeaveViolation> {
    let mut violations = Vec::new();
    let origin = module.name();

    for field in module.matched_fields() {
        let found = candidate
            .field(&field.name)
            .or_else(|| closure.field(&field.name));
        match found {
            Some(info) if info.descriptor == field.descriptor => {}
            _ => violations.push(WeaveViolation::of_member(
                ViolationKind::FieldMissing,
                &candidate.name,
                &field.name,
                &field.descriptor,
                origin,
            )),
        }
    }

    for method in module.matched_methods() {
        let found = match &module.selector {
            // exact modules splice into the class itself
            Selector::Exact(_) => candidate.method(&method.name, &method.descriptor),
            _ => candidate
                .method(&method.name, &method.descriptor)
                .or_else(|| closure.method(&method.name, &method.descriptor)),
        };
        if found.is_none() {
            violations.push(WeaveViolation::of_member(
                ViolationKind::MethodMissing,
                &candidate.name,
                &method.name,
                &method.descriptor,
                origin,
            ));
        }
    }

    for field_name in &module.new_fields {
        if candidate.field(field_name).is_some() || closure.field(field_name).is_some() {
            violations.push(WeaveViolation::of_member(
                ViolationKind::NewFieldExists,
                &candidate.name,
                field_name,
                "",
                origin,
            ));
        }
    }
    for (name, descriptor) in &module.new_methods {
        if candidate.method(name, descriptor).is_some() || closure.method(name, descriptor).is_some()
        {
            violations.push(WeaveViolation::of_member(
                ViolationKind::NewMethodExists,
                &candidate.name,
                name,
                descriptor,
                origin,
            ));
        }
    }

    violations
}
