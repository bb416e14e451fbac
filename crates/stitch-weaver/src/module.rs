//! Transformation module declarations
//!
//! A module is a class annotated in the `stitch/` namespace. The annotations
//! say what the module targets and which of its members are new; everything
//! else the module declares must already exist on the original class it is
//! woven into.

use crate::violation::{ViolationKind, WeaveViolation};
use rustc_hash::FxHashSet;
use stitch_classfile::{ClassFile, Field, Insn, Method};

/// Class annotation selecting the target by name
pub const TARGET: &str = "stitch/Target";
/// Class annotation selecting targets by required annotations
pub const TARGET_ANNOTATION: &str = "stitch/TargetAnnotation";
/// Class annotation declaring a skip-if-present guard
pub const SKIP_IF_PRESENT: &str = "stitch/SkipIfPresent";
/// Class annotation overriding the bundle priority
pub const PRIORITY: &str = "stitch/Priority";
/// Member annotation marking a wholly new field or method
pub const NEW_MEMBER: &str = "stitch/NewMember";
/// Owner of the call-original sentinel invocation
pub const ORIGINAL_OWNER: &str = "stitch/Original";
/// Name of the call-original sentinel method
pub const ORIGINAL_METHOD: &str = "call";

/// How a module selects the classes it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Applies only to the identically named class
    Exact(String),
    /// Applies to any class with the named type in its hierarchy
    Supertype(String),
    /// Applies to any class carrying one of the required annotations
    Annotation {
        /// Annotations required on the class itself
        class_annotations: FxHashSet<String>,
        /// Annotations required on at least one method
        method_annotations: FxHashSet<String>,
    },
}

/// One compiled transformation module
#[derive(Debug, Clone)]
pub struct TransformationModule {
    /// The module's class body
    pub class: ClassFile,
    /// Target selector
    pub selector: Selector,
    /// Composition priority (lower weaves outermost)
    pub priority: i64,
    /// Names of fields this module introduces
    pub new_fields: FxHashSet<String>,
    /// (name, descriptor) of methods this module introduces
    pub new_methods: FxHashSet<(String, String)>,
}

impl TransformationModule {
    /// Internal name of the module class
    pub fn name(&self) -> &str {
        &self.class.name
    }

    /// Fields the module assumes already exist on the target
    pub fn matched_fields(&self) -> impl Iterator<Item = &Field> {
        self.class
            .fields
            .iter()
            .filter(|f| !self.new_fields.contains(&f.name))
    }

    /// Methods the module splices into pre-existing target methods
    pub fn matched_methods(&self) -> impl Iterator<Item = &Method> {
        self.class.methods.iter().filter(|m| {
            !self
                .new_methods
                .contains(&(m.name.clone(), m.descriptor.clone()))
        })
    }
}

/// What one class body in a bundle turns out to be
#[derive(Debug)]
pub enum ClassRole {
    /// A weaving module
    Module(TransformationModule),
    /// A plain utility class carried along with the bundle
    Utility(ClassFile),
    /// A skip-if-present guard declaration
    Guard {
        /// Class whose presence disables the bundle
        class_name: String,
    },
}

/// Classify one class body and run its build-time checks
///
/// Returns the accumulated violations when the declaration is unusable;
/// the bundle compiler turns those into a registration failure.
pub fn classify(class: ClassFile, default_priority: i64) -> Result<ClassRole, Vec<WeaveViolation>> {
    let mut violations = Vec::new();

    let target = class.annotation(TARGET).cloned();
    let target_annotation = class.annotation(TARGET_ANNOTATION).cloned();
    let guard = class.annotation(SKIP_IF_PRESENT).cloned();

    if let Some(guard) = guard {
        if target.is_some() || target_annotation.is_some() {
            violations.push(WeaveViolation::of_class(
                ViolationKind::InvalidDeclaration,
                &class.name,
                &class.name,
            ));
            return Err(violations);
        }
        return match guard.value("name") {
            Some(name) => Ok(ClassRole::Guard {
                class_name: name.to_string(),
            }),
            None => {
                violations.push(WeaveViolation::of_class(
                    ViolationKind::InvalidDeclaration,
                    &class.name,
                    &class.name,
                ));
                Err(violations)
            }
        };
    }

    let selector = match (&target, &target_annotation) {
        (Some(_), Some(_)) => {
            violations.push(WeaveViolation::of_class(
                ViolationKind::InvalidDeclaration,
                &class.name,
                &class.name,
            ));
            return Err(violations);
        }
        (Some(target), None) => match parse_target(target, &class, &mut violations) {
            Some(selector) => selector,
            None => return Err(violations),
        },
        (None, Some(target)) => match parse_target_annotation(target, &class, &mut violations) {
            Some(selector) => selector,
            None => return Err(violations),
        },
        (None, None) => {
            // not a module at all: a utility class carried with the bundle
            if contains_sentinel(&class) {
                violations.push(WeaveViolation::of_class(
                    ViolationKind::InvalidDeclaration,
                    &class.name,
                    &class.name,
                ));
                return Err(violations);
            }
            return Ok(ClassRole::Utility(class));
        }
    };

    let priority = match class.annotation(PRIORITY) {
        Some(annotation) => match annotation.value("value").map(str::parse::<i64>) {
            Some(Ok(priority)) => priority,
            _ => {
                violations.push(WeaveViolation::of_class(
                    ViolationKind::InvalidDeclaration,
                    &class.name,
                    &class.name,
                ));
                default_priority
            }
        },
        None => default_priority,
    };

    let new_fields: FxHashSet<String> = class
        .fields
        .iter()
        .filter(|f| f.annotations.iter().any(|a| a.name == NEW_MEMBER))
        .map(|f| f.name.clone())
        .collect();
    let new_methods: FxHashSet<(String, String)> = class
        .methods
        .iter()
        .filter(|m| m.annotations.iter().any(|a| a.name == NEW_MEMBER))
        .map(|m| (m.name.clone(), m.descriptor.clone()))
        .collect();

    check_self_references(&class, &mut violations);
    check_sentinel_placement(&class, &new_methods, &mut violations);

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(ClassRole::Module(TransformationModule {
        class,
        selector,
        priority,
        new_fields,
        new_methods,
    }))
}

fn parse_target(
    annotation: &stitch_classfile::Annotation,
    class: &ClassFile,
    violations: &mut Vec<WeaveViolation>,
) -> Option<Selector> {
    let name = match annotation.value("name") {
        Some(name) => name.to_string(),
        None => {
            violations.push(WeaveViolation::of_class(
                ViolationKind::InvalidDeclaration,
                &class.name,
                &class.name,
            ));
            return None;
        }
    };
    match annotation.value("kind").unwrap_or("exact") {
        "exact" => Some(Selector::Exact(name)),
        "supertype" => Some(Selector::Supertype(name)),
        _ => {
            violations.push(WeaveViolation::of_class(
                ViolationKind::InvalidDeclaration,
                &class.name,
                &class.name,
            ));
            None
        }
    }
}

fn parse_target_annotation(
    annotation: &stitch_classfile::Annotation,
    class: &ClassFile,
    violations: &mut Vec<WeaveViolation>,
) -> Option<Selector> {
    let class_annotations = split_names(annotation.value("class"));
    let method_annotations = split_names(annotation.value("method"));
    if class_annotations.is_empty() && method_annotations.is_empty() {
        violations.push(WeaveViolation::of_class(
            ViolationKind::InvalidDeclaration,
            &class.name,
            &class.name,
        ));
        return None;
    }
    Some(Selector::Annotation {
        class_annotations,
        method_annotations,
    })
}

fn split_names(value: Option<&str>) -> FxHashSet<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Every self member the module code touches must be declared on the module
fn check_self_references(class: &ClassFile, violations: &mut Vec<WeaveViolation>) {
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
                } if owner == &class.name => {
                    if class.field(name).is_none() {
                        violations.push(WeaveViolation::of_member(
                            ViolationKind::UndeclaredSelfMember,
                            &class.name,
                            name,
                            descriptor,
                            &class.name,
                        ));
                    }
                }
                Insn::Invoke {
                    owner,
                    name,
                    descriptor,
                } if owner == &class.name => {
                    if class.method(name, descriptor).is_none() {
                        violations.push(WeaveViolation::of_member(
                            ViolationKind::UndeclaredSelfMember,
                            &class.name,
                            name,
                            descriptor,
                            &class.name,
                        ));
                    }
                }
                _ => {}
            }
        }
    }
}

/// The call-original sentinel only makes sense inside matched methods
fn check_sentinel_placement(
    class: &ClassFile,
    new_methods: &FxHashSet<(String, String)>,
    violations: &mut Vec<WeaveViolation>,
) {
    for method in &class.methods {
        if !new_methods.contains(&(method.name.clone(), method.descriptor.clone())) {
            continue;
        }
        if method_contains_sentinel(method) {
            violations.push(WeaveViolation::of_member(
                ViolationKind::InvalidDeclaration,
                &class.name,
                &method.name,
                &method.descriptor,
                &class.name,
            ));
        }
    }
}

fn contains_sentinel(class: &ClassFile) -> bool {
    class.methods.iter().any(method_contains_sentinel)
}

fn method_contains_sentinel(method: &Method) -> bool {
    method.code.iter().any(|insn| {
        matches!(
            insn,
            Insn::Invoke { owner, name, .. } if owner == ORIGINAL_OWNER && name == ORIGINAL_METHOD
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_classfile::{flags, Annotation};

    fn exact_module(name: &str, target: &str) -> ClassFile {
        let mut class = ClassFile::new(name);
        class.annotations.push(Annotation::with_values(
            TARGET,
            vec![("name".to_string(), target.to_string())],
        ));
        class
    }

    #[test]
    fn test_classify_exact_module() {
        let role = classify(exact_module("ext/Probe", "app/Service"), 0).unwrap();
        match role {
            ClassRole::Module(module) => {
                assert_eq!(module.selector, Selector::Exact("app/Service".to_string()));
                assert_eq!(module.priority, 0);
            }
            _ => panic!("expected module"),
        }
    }

    #[test]
    fn test_classify_supertype_module_with_priority() {
        let mut class = ClassFile::new("ext/Probe");
        class.annotations.push(Annotation::with_values(
            TARGET,
            vec![
                ("name".to_string(), "app/Handler".to_string()),
                ("kind".to_string(), "supertype".to_string()),
            ],
        ));
        class.annotations.push(Annotation::with_values(
            PRIORITY,
            vec![("value".to_string(), "-5".to_string())],
        ));

        match classify(class, 3).unwrap() {
            ClassRole::Module(module) => {
                assert_eq!(
                    module.selector,
                    Selector::Supertype("app/Handler".to_string())
                );
                assert_eq!(module.priority, -5);
            }
            _ => panic!("expected module"),
        }
    }

    #[test]
    fn test_classify_annotation_module() {
        let mut class = ClassFile::new("ext/Probe");
        class.annotations.push(Annotation::with_values(
            TARGET_ANNOTATION,
            vec![
                ("class".to_string(), "app/Component".to_string()),
                ("method".to_string(), "app/Traced, app/Timed".to_string()),
            ],
        ));

        match classify(class, 0).unwrap() {
            ClassRole::Module(module) => match module.selector {
                Selector::Annotation {
                    class_annotations,
                    method_annotations,
                } => {
                    assert!(class_annotations.contains("app/Component"));
                    assert!(method_annotations.contains("app/Traced"));
                    assert!(method_annotations.contains("app/Timed"));
                }
                _ => panic!("expected annotation selector"),
            },
            _ => panic!("expected module"),
        }
    }

    #[test]
    fn test_classify_guard_and_utility() {
        let mut guard = ClassFile::new("ext/Guard");
        guard.annotations.push(Annotation::with_values(
            SKIP_IF_PRESENT,
            vec![("name".to_string(), "other/Agent".to_string())],
        ));
        match classify(guard, 0).unwrap() {
            ClassRole::Guard { class_name } => assert_eq!(class_name, "other/Agent"),
            _ => panic!("expected guard"),
        }

        let utility = ClassFile::new("ext/Helper");
        assert!(matches!(
            classify(utility, 0).unwrap(),
            ClassRole::Utility(_)
        ));
    }

    #[test]
    fn test_undeclared_self_member_is_build_violation() {
        let mut class = exact_module("ext/Probe", "app/Service");
        class.methods.push(Method {
            name: "handle".to_string(),
            descriptor: "()S".to_string(),
            access: flags::PUBLIC,
            annotations: Vec::new(),
            code: vec![
                Insn::GetField {
                    owner: "ext/Probe".to_string(),
                    name: "missing".to_string(),
                    descriptor: "S".to_string(),
                },
                Insn::Return,
            ],
        });

        let violations = classify(class, 0).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::UndeclaredSelfMember);
    }

    #[test]
    fn test_sentinel_in_new_method_rejected() {
        let mut class = exact_module("ext/Probe", "app/Service");
        class.methods.push(Method {
            name: "extra".to_string(),
            descriptor: "()S".to_string(),
            access: flags::PUBLIC,
            annotations: vec![Annotation::marker(NEW_MEMBER)],
            code: vec![
                Insn::Invoke {
                    owner: ORIGINAL_OWNER.to_string(),
                    name: ORIGINAL_METHOD.to_string(),
                    descriptor: "()S".to_string(),
                },
                Insn::Return,
            ],
        });

        let violations = classify(class, 0).unwrap_err();
        assert_eq!(violations[0].kind, ViolationKind::InvalidDeclaration);
    }

    #[test]
    fn test_target_without_name_rejected() {
        let mut class = ClassFile::new("ext/Probe");
        class.annotations.push(Annotation::marker(TARGET));
        let violations = classify(class, 0).unwrap_err();
        assert_eq!(violations[0].kind, ViolationKind::InvalidDeclaration);
    }
}
