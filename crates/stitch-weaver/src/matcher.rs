//! Candidate matching
//!
//! Matching is two-phased: an aggregate index over every registered bundle
//! rejects the vast majority of classes with a few set probes, and only a
//! possible hit pays for per-bundle, per-module selector evaluation.

use crate::bundle::TransformationBundle;
use crate::structure::{ClassDescriptor, HierarchyClosure};
use rustc_hash::FxHashSet;

/// Class/method annotation names the host extracted out-of-band
///
/// Passed alongside the candidate bytes so annotations the host discovers
/// through side channels still participate in matching.
#[derive(Debug, Default, Clone)]
pub struct HostAnnotations {
    /// Annotation type names on the class
    pub class_annotations: Vec<String>,
    /// Annotation type names on any method
    pub method_annotations: Vec<String>,
}

/// Everything the matcher needs to know about one candidate class
#[derive(Debug)]
pub struct CandidateProfile {
    /// Internal class name
    pub name: String,
    /// Transitive supertype names, nearest first
    pub super_names: Vec<String>,
    /// Transitive interface names
    pub interface_names: Vec<String>,
    /// Annotations on the class
    pub class_annotations: FxHashSet<String>,
    /// Annotations on any method
    pub method_annotations: FxHashSet<String>,
    /// Declared method signatures
    pub method_signatures: FxHashSet<(String, String)>,
}

impl CandidateProfile {
    /// Build a profile from the candidate's descriptor and hierarchy
    pub fn new(
        descriptor: &ClassDescriptor,
        closure: &HierarchyClosure,
        host: Option<&HostAnnotations>,
    ) -> Self {
        let mut class_annotations = descriptor.class_annotations.clone();
        let mut method_annotations = descriptor.method_annotations.clone();
        if let Some(host) = host {
            class_annotations.extend(host.class_annotations.iter().cloned());
            method_annotations.extend(host.method_annotations.iter().cloned());
        }
        Self {
            name: descriptor.name.clone(),
            super_names: closure.super_names.clone(),
            interface_names: closure.interface_names.clone(),
            class_annotations,
            method_annotations,
            method_signatures: descriptor
                .methods()
                .iter()
                .map(|m| (m.name.clone(), m.descriptor.clone()))
                .collect(),
        }
    }
}

/// Aggregate fast-reject index over every registered bundle
#[derive(Debug, Default)]
pub struct MatchIndex {
    required_names: FxHashSet<String>,
    class_annotations: FxHashSet<String>,
    method_annotations: FxHashSet<String>,
    method_signatures: FxHashSet<(String, String)>,
}

impl MatchIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one bundle's indices into the aggregate
    pub fn add_bundle(&mut self, bundle: &TransformationBundle) {
        self.required_names
            .extend(bundle.required_names().iter().cloned());
        self.class_annotations
            .extend(bundle.class_annotation_index().iter().cloned());
        self.method_annotations
            .extend(bundle.method_annotation_index().iter().cloned());
        self.method_signatures
            .extend(bundle.method_signatures().iter().cloned());
    }

    /// Whether any registered bundle could possibly match the candidate
    ///
    /// A `false` here is definitive; a `true` only licenses the per-bundle
    /// check.
    pub fn possible_match(&self, candidate: &CandidateProfile) -> bool {
        if self.required_names.contains(&candidate.name) {
            return true;
        }
        if candidate
            .super_names
            .iter()
            .any(|s| self.required_names.contains(s))
        {
            return true;
        }
        if candidate
            .interface_names
            .iter()
            .any(|i| self.required_names.contains(i))
        {
            return true;
        }
        if candidate
            .class_annotations
            .iter()
            .any(|a| self.class_annotations.contains(a))
        {
            return true;
        }
        if candidate
            .method_annotations
            .iter()
            .any(|a| self.method_annotations.contains(a))
        {
            return true;
        }
        candidate
            .method_signatures
            .iter()
            .any(|sig| self.method_signatures.contains(sig))
    }
}
