//! Structural reference extraction
//!
//! Module and utility classes routinely lean on original code they do not
//! weave: a supertype they extend, a field they read, a method they call.
//! Each such assumption becomes a [`StructuralReference`] when the bundle is
//! compiled, and is proven against the real classes of a loading-context
//! before the bundle is allowed to weave there.

use crate::structure::ClassDescriptor;
use crate::violation::{ViolationKind, WeaveViolation};
use rustc_hash::FxHashMap;
use stitch_classfile::{flags, ClassFile, Insn};

/// Whether a member reference names a field or a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// A field reference
    Field,
    /// A method reference
    Method,
}

/// A single referenced member with its access requirements
#[derive(Debug, Clone)]
pub struct MemberReference {
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
    /// Field or method
    pub kind: MemberKind,
    /// Flags that must be present on the resolved member
    pub required_access: u32,
    /// Flags that must be absent on the resolved member
    pub forbidden_access: u32,
}

/// Everything one origin class assumes about a single original class
///
/// Immutable once the bundle is compiled; merging only happens during
/// compilation, before the reference set is published.
#[derive(Debug, Clone)]
pub struct StructuralReference {
    /// The module or utility class that created this reference
    pub origin: String,
    /// Internal name of the referenced class
    pub class_name: String,
    /// The origin extends this class
    pub extended: bool,
    /// The origin implements this class as an interface
    pub implemented: bool,
    /// Referenced fields by name
    pub fields: FxHashMap<String, MemberReference>,
    /// Referenced methods by (name, descriptor)
    pub methods: FxHashMap<(String, String), MemberReference>,
}

impl StructuralReference {
    fn new(origin: &str, class_name: &str) -> Self {
        Self {
            origin: origin.to_string(),
            class_name: class_name.to_string(),
            extended: false,
            implemented: false,
            fields: FxHashMap::default(),
            methods: FxHashMap::default(),
        }
    }

    /// Extract every external reference made by `class`
    ///
    /// References to the class itself and to the `stitch/` runtime namespace
    /// are excluded; self references are checked separately at bundle
    /// compile time, and the runtime API is always present.
    pub fn extract(class: &ClassFile) -> Vec<StructuralReference> {
        fn entry<'a>(
            by_class: &'a mut FxHashMap<String, StructuralReference>,
            origin: &str,
            name: &str,
        ) -> &'a mut StructuralReference {
            by_class
                .entry(name.to_string())
                .or_insert_with(|| StructuralReference::new(origin, name))
        }

        let mut by_class: FxHashMap<String, StructuralReference> = FxHashMap::default();
        let origin = class.name.as_str();

        if let Some(super_name) = &class.super_name {
            if !is_internal(origin, super_name) {
                entry(&mut by_class, origin, super_name).extended = true;
            }
        }
        for interface in &class.interfaces {
            if !is_internal(origin, interface) {
                entry(&mut by_class, origin, interface).implemented = true;
            }
        }

        for method in &class.methods {
            for insn in &method.code {
                match insn {
                    Insn::GetField {
                        owner,
                        name,
                        descriptor,
                    }
                    | Insn::PutField {
                        owner,
                        name,
                        descriptor,
                    } => {
                        if is_internal(origin, owner) {
                            continue;
                        }
                        entry(&mut by_class, origin, owner)
                            .fields
                            .entry(name.clone())
                            .or_insert_with(|| MemberReference {
                                name: name.clone(),
                                descriptor: descriptor.clone(),
                                kind: MemberKind::Field,
                                required_access: 0,
                                forbidden_access: flags::PRIVATE,
                            });
                    }
                    Insn::Invoke {
                        owner,
                        name,
                        descriptor,
                    } => {
                        if is_internal(origin, owner) {
                            continue;
                        }
                        entry(&mut by_class, origin, owner)
                            .methods
                            .entry((name.clone(), descriptor.clone()))
                            .or_insert_with(|| MemberReference {
                                name: name.clone(),
                                descriptor: descriptor.clone(),
                                kind: MemberKind::Method,
                                required_access: 0,
                                forbidden_access: flags::PRIVATE,
                            });
                    }
                    _ => {}
                }
            }
        }

        by_class.into_values().collect()
    }

    /// Merge another reference to the same class into this one
    pub fn merge(&mut self, other: StructuralReference) {
        debug_assert_eq!(self.class_name, other.class_name);
        self.extended |= other.extended;
        self.implemented |= other.implemented;
        for (name, member) in other.fields {
            self.fields.entry(name).or_insert(member);
        }
        for (key, member) in other.methods {
            self.methods.entry(key).or_insert(member);
        }
    }

    /// Prove this reference against a resolved class descriptor
    pub fn check(&self, descriptor: &ClassDescriptor) -> Vec<WeaveViolation> {
        let mut violations = Vec::new();

        if self.extended && descriptor.access & flags::FINAL != 0 {
            violations.push(WeaveViolation::of_class(
                ViolationKind::TargetFinal,
                &self.class_name,
                &self.origin,
            ));
        }
        if self.extended && descriptor.access & flags::INTERFACE != 0 {
            violations.push(WeaveViolation::of_class(
                ViolationKind::ClassAccessMismatch,
                &self.class_name,
                &self.origin,
            ));
        }
        if self.implemented && descriptor.access & flags::INTERFACE == 0 {
            violations.push(WeaveViolation::of_class(
                ViolationKind::ClassAccessMismatch,
                &self.class_name,
                &self.origin,
            ));
        }

        for member in self.fields.values() {
            match descriptor.field(&member.name) {
                Some(found) if found.descriptor == member.descriptor => {
                    if !access_compatible(found.access, member) {
                        violations.push(WeaveViolation::of_member(
                            ViolationKind::FieldAccessMismatch,
                            &self.class_name,
                            &member.name,
                            &member.descriptor,
                            &self.origin,
                        ));
                    }
                }
                _ => violations.push(WeaveViolation::of_member(
                    ViolationKind::FieldMissing,
                    &self.class_name,
                    &member.name,
                    &member.descriptor,
                    &self.origin,
                )),
            }
        }

        for member in self.methods.values() {
            match descriptor.method(&member.name, &member.descriptor) {
                Some(found) => {
                    if !access_compatible(found.access, member) {
                        violations.push(WeaveViolation::of_member(
                            ViolationKind::MethodAccessMismatch,
                            &self.class_name,
                            &member.name,
                            &member.descriptor,
                            &self.origin,
                        ));
                    }
                }
                None => violations.push(WeaveViolation::of_member(
                    ViolationKind::MethodMissing,
                    &self.class_name,
                    &member.name,
                    &member.descriptor,
                    &self.origin,
                )),
            }
        }

        violations
    }
}

fn access_compatible(actual: u32, member: &MemberReference) -> bool {
    actual & member.forbidden_access == 0
        && actual & member.required_access == member.required_access
}

fn is_internal(origin: &str, owner: &str) -> bool {
    owner == origin || owner.starts_with("stitch/")
}
