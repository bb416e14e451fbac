//! The merge engine
//!
//! Weaving rewrites an owned copy of the candidate class: new members are
//! appended, matched methods are replaced by the module's body, and the
//! pre-existing body is preserved under a renamed method that the module's
//! call-original sentinel is rewired to. Composition across modules is a
//! fold: each application treats the previous composite as its original.

use crate::module::{TransformationModule, NEW_MEMBER, ORIGINAL_METHOD, ORIGINAL_OWNER};
use log::trace;
use stitch_classfile::{flags, Annotation, ClassFile, Insn, Method};

/// One module that actually changed the composite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedModule {
    /// Name of the bundle the module came from
    pub bundle: String,
    /// Internal name of the module class
    pub module: String,
}

/// Result of weaving one candidate class
#[derive(Debug)]
pub struct WeaveOutcome {
    /// The composite bytes, or `None` when the candidate is unchanged
    pub bytes: Option<Vec<u8>>,
    /// Modules that changed the composite, innermost first
    pub applied: Vec<AppliedModule>,
}

impl WeaveOutcome {
    /// An outcome that leaves the candidate untouched
    pub fn unchanged() -> Self {
        Self {
            bytes: None,
            applied: Vec::new(),
        }
    }
}

/// A module waiting to be composed into a candidate
pub(crate) struct PendingModule<'a> {
    pub bundle_name: &'a str,
    pub module: &'a TransformationModule,
}

/// Compose every pending module into the candidate
///
/// Modules are ordered ascending by (priority, bundle name, module name)
/// and applied in reverse, so the ascending-first module ends up as the
/// outermost wrapper around the true original. The tie on name keeps the
/// output reproducible regardless of registration order.
pub(crate) fn compose(
    mut composite: ClassFile,
    mut pending: Vec<PendingModule<'_>>,
) -> (ClassFile, Vec<AppliedModule>) {
    pending.sort_by(|a, b| {
        (a.module.priority, a.bundle_name, a.module.name())
            .cmp(&(b.module.priority, b.bundle_name, b.module.name()))
    });

    let mut applied = Vec::new();
    for (index, pending_module) in pending.iter().rev().enumerate() {
        if apply_module(&mut composite, pending_module.module, index) {
            applied.push(AppliedModule {
                bundle: pending_module.bundle_name.to_string(),
                module: pending_module.module.name().to_string(),
            });
        }
    }
    (composite, applied)
}

/// Merge one module into the composite; returns whether anything changed
pub(crate) fn apply_module(
    composite: &mut ClassFile,
    module: &TransformationModule,
    application_index: usize,
) -> bool {
    let mut changed = false;
    let module_name = module.class.name.clone();
    let target_name = composite.name.clone();

    // new members are appended verbatim, minus the marker annotations
    for field in &module.class.fields {
        if !module.new_fields.contains(&field.name) {
            continue;
        }
        let mut field = field.clone();
        strip_markers(&mut field.annotations);
        composite.fields.push(field);
        changed = true;
    }
    for method in &module.class.methods {
        if !module
            .new_methods
            .contains(&(method.name.clone(), method.descriptor.clone()))
        {
            continue;
        }
        let mut method = method.clone();
        strip_markers(&mut method.annotations);
        rewrite_code(&mut method.code, &module_name, &target_name, None);
        composite.methods.push(method);
        changed = true;
    }

    // matched methods: preserve the current body under a renamed method,
    // splice the module body in, rewire the sentinel to the preserved copy
    for matched in module.matched_methods() {
        let position = composite
            .methods
            .iter()
            .position(|m| m.name == matched.name && m.descriptor == matched.descriptor);
        let position = match position {
            Some(position) => position,
            // a supertype module may match a class that does not declare
            // the method itself; nothing to splice here
            None => continue,
        };

        let preserved_name = format!("{}$original${}", matched.name, application_index);
        let target_method = &composite.methods[position];
        let preserved = Method {
            name: preserved_name.clone(),
            descriptor: target_method.descriptor.clone(),
            access: flags::PRIVATE | (target_method.access & flags::STATIC),
            annotations: Vec::new(),
            code: target_method.code.clone(),
        };

        let mut spliced_code = matched.code.clone();
        rewrite_code(
            &mut spliced_code,
            &module_name,
            &target_name,
            Some((&preserved_name, &matched.descriptor)),
        );

        let mut merged_annotations = target_method.annotations.clone();
        for annotation in &matched.annotations {
            if annotation.name.starts_with("stitch/") {
                continue;
            }
            if !merged_annotations.iter().any(|a| a.name == annotation.name) {
                merged_annotations.push(annotation.clone());
            }
        }

        let target_method = &mut composite.methods[position];
        target_method.code = spliced_code;
        target_method.annotations = merged_annotations;
        composite.methods.push(preserved);

        trace!(
            "spliced {}.{}{} (original preserved as {})",
            target_name,
            matched.name,
            matched.descriptor,
            preserved_name
        );
        changed = true;
    }

    if changed {
        merge_class_annotations(composite, &module.class.annotations);
    }
    changed
}

/// Rewrite module code for its new home in the composite
///
/// Self references move to the target class; the call-original sentinel
/// (when `preserved` is given) becomes an invocation of the preserved copy.
fn rewrite_code(
    code: &mut [Insn],
    module_name: &str,
    target_name: &str,
    preserved: Option<(&str, &str)>,
) {
    for insn in code.iter_mut() {
        match insn {
            Insn::Invoke {
                owner,
                name,
                descriptor,
            } => {
                if owner == ORIGINAL_OWNER && name == ORIGINAL_METHOD {
                    if let Some((preserved_name, preserved_descriptor)) = preserved {
                        *owner = target_name.to_string();
                        *name = preserved_name.to_string();
                        *descriptor = preserved_descriptor.to_string();
                    }
                } else if owner == module_name {
                    *owner = target_name.to_string();
                }
            }
            Insn::GetField { owner, .. } | Insn::PutField { owner, .. } => {
                if owner == module_name {
                    *owner = target_name.to_string();
                }
            }
            _ => {}
        }
    }
}

fn strip_markers(annotations: &mut Vec<Annotation>) {
    annotations.retain(|a| a.name != NEW_MEMBER && !a.name.starts_with("stitch/"));
}

fn merge_class_annotations(composite: &mut ClassFile, annotations: &[Annotation]) {
    for annotation in annotations {
        if annotation.name.starts_with("stitch/") {
            continue;
        }
        if !composite.annotations.iter().any(|a| a.name == annotation.name) {
            composite.annotations.push(annotation.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleConfig, TransformationBundle};
    use crate::module::TARGET;
    use stitch_classfile::Field;

    fn target_class() -> ClassFile {
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

    fn wrapping_module(marker: &str) -> TransformationModule {
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
                Insn::Const(marker.to_string()),
                Insn::Invoke {
                    owner: ORIGINAL_OWNER.to_string(),
                    name: ORIGINAL_METHOD.to_string(),
                    descriptor: "()S".to_string(),
                },
                Insn::Concat,
                Insn::Return,
            ],
        });

        let bundle = TransformationBundle::compile(
            BundleConfig::builder("test-bundle").build(),
            &[class.encode()],
        )
        .unwrap();
        bundle.modules()[0].clone()
    }

    #[test]
    fn test_matched_method_splice_preserves_original() {
        let mut composite = target_class();
        let module = wrapping_module("wrap:");
        assert!(apply_module(&mut composite, &module, 0));

        // the original body lives on under the preserved name
        let preserved = composite.method("handle$original$0", "()S").unwrap();
        assert_eq!(
            preserved.code,
            vec![Insn::Const("original".to_string()), Insn::Return]
        );
        assert_ne!(preserved.access & flags::PRIVATE, 0);

        // the entry method is the module body with the sentinel rewired
        let entry = composite.method("handle", "()S").unwrap();
        assert!(entry.code.contains(&Insn::Invoke {
            owner: "app/Service".to_string(),
            name: "handle$original$0".to_string(),
            descriptor: "()S".to_string(),
        }));
    }

    #[test]
    fn test_new_members_appended_without_markers() {
        let mut class = ClassFile::new("ext/Probe");
        class.annotations.push(Annotation::with_values(
            TARGET,
            vec![("name".to_string(), "app/Service".to_string())],
        ));
        class.fields.push(Field {
            name: "callCount".to_string(),
            descriptor: "J".to_string(),
            access: flags::PRIVATE,
            annotations: vec![Annotation::marker(NEW_MEMBER)],
        });
        class.methods.push(Method {
            name: "reset".to_string(),
            descriptor: "()S".to_string(),
            access: flags::PUBLIC,
            annotations: vec![Annotation::marker(NEW_MEMBER)],
            code: vec![
                Insn::PutField {
                    owner: "ext/Probe".to_string(),
                    name: "callCount".to_string(),
                    descriptor: "J".to_string(),
                },
                Insn::Return,
            ],
        });
        let bundle = TransformationBundle::compile(
            BundleConfig::builder("test-bundle").build(),
            &[class.encode()],
        )
        .unwrap();
        let module = &bundle.modules()[0];

        let mut composite = target_class();
        assert!(apply_module(&mut composite, module, 0));

        let field = composite.field("callCount").unwrap();
        assert!(field.annotations.is_empty());

        // self references in new methods now point at the target
        let reset = composite.method("reset", "()S").unwrap();
        assert!(reset.annotations.is_empty());
        assert_eq!(
            reset.code[0],
            Insn::PutField {
                owner: "app/Service".to_string(),
                name: "callCount".to_string(),
                descriptor: "J".to_string(),
            }
        );
    }

    #[test]
    fn test_supertype_module_skips_undeclared_method() {
        let mut composite = ClassFile::new("app/Child");
        composite.super_name = Some("app/Service".to_string());
        let module = wrapping_module("wrap:");
        // the child declares no handle(); nothing changes
        assert!(!apply_module(&mut composite, &module, 0));
        assert!(composite.methods.is_empty());
    }

    #[test]
    fn test_compose_orders_by_priority_then_name() {
        let composite = target_class();
        let inner = wrapping_module("inner");
        let mut outer = wrapping_module("outer");
        outer.priority = -1;

        let (woven, applied) = compose(
            composite,
            vec![
                PendingModule {
                    bundle_name: "b-inner",
                    module: &inner,
                },
                PendingModule {
                    bundle_name: "a-outer",
                    module: &outer,
                },
            ],
        );

        // applied list is innermost first
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].bundle, "b-inner");
        assert_eq!(applied[1].bundle, "a-outer");

        // outermost entry is the priority -1 module
        let entry = woven.method("handle", "()S").unwrap();
        assert_eq!(entry.code[0], Insn::Const("outer".to_string()));
    }
}
