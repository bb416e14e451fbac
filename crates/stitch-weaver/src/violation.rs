//! Structural violations
//!
//! A violation records one reason why a module (or a whole bundle) cannot be
//! applied. Violations found while compiling a bundle abort registration;
//! violations found against a live loading-context only narrow what gets
//! woven there.

use std::fmt;

/// The kind of structural violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A referenced class could not be resolved
    ClassMissing,
    /// A referenced class exists but its access flags conflict with the reference
    ClassAccessMismatch,
    /// A supertype-targeted class is final and cannot be extended
    TargetFinal,
    /// A referenced field does not exist
    FieldMissing,
    /// A referenced field exists with conflicting access flags
    FieldAccessMismatch,
    /// A referenced method does not exist
    MethodMissing,
    /// A referenced method exists with conflicting access flags
    MethodAccessMismatch,
    /// A field declared new already exists on the target
    NewFieldExists,
    /// A method declared new already exists on the target
    NewMethodExists,
    /// A skip-if-present guard class was resolvable in the loading-context
    SkipIfPresent,
    /// Module code touches a self member that is neither declared nor new
    UndeclaredSelfMember,
    /// A module declaration annotation is malformed
    InvalidDeclaration,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ViolationKind::ClassMissing => "referenced class is missing",
            ViolationKind::ClassAccessMismatch => "referenced class has conflicting access",
            ViolationKind::TargetFinal => "target class is final",
            ViolationKind::FieldMissing => "referenced field is missing",
            ViolationKind::FieldAccessMismatch => "referenced field has conflicting access",
            ViolationKind::MethodMissing => "referenced method is missing",
            ViolationKind::MethodAccessMismatch => "referenced method has conflicting access",
            ViolationKind::NewFieldExists => "new field already exists on target",
            ViolationKind::NewMethodExists => "new method already exists on target",
            ViolationKind::SkipIfPresent => "skip-if-present guard class is present",
            ViolationKind::UndeclaredSelfMember => "module touches an undeclared self member",
            ViolationKind::InvalidDeclaration => "module declaration is malformed",
        };
        f.write_str(text)
    }
}

/// A single structural violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaveViolation {
    /// What went wrong
    pub kind: ViolationKind,
    /// The class the violation was found against
    pub class_name: String,
    /// The offending member, when the violation is member-scoped
    pub member: Option<MemberDesc>,
    /// The module or utility class that caused the violation
    pub origin: String,
}

impl WeaveViolation {
    /// Create a class-scoped violation
    pub fn of_class(kind: ViolationKind, class_name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            kind,
            class_name: class_name.into(),
            member: None,
            origin: origin.into(),
        }
    }

    /// Create a member-scoped violation
    pub fn of_member(
        kind: ViolationKind,
        class_name: impl Into<String>,
        member_name: impl Into<String>,
        descriptor: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            class_name: class_name.into(),
            member: Some(MemberDesc {
                name: member_name.into(),
                descriptor: descriptor.into(),
            }),
            origin: origin.into(),
        }
    }
}

impl fmt::Display for WeaveViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(
                f,
                "{} [{}.{} {}] (from {})",
                self.kind, self.class_name, member.name, member.descriptor, self.origin
            ),
            None => write!(f, "{} [{}] (from {})", self.kind, self.class_name, self.origin),
        }
    }
}

/// Name and descriptor of a member involved in a violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDesc {
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
}
