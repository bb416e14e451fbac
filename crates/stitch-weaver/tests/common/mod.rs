#![allow(dead_code)]

//! Shared fixtures: class builders, an in-memory class source, and a small
//! evaluator that executes string-building method bodies so tests can
//! assert on observable behavior instead of instruction listings.

use rustc_hash::FxHashMap;
use stitch_classfile::{flags, Annotation, ClassFile, Insn, Method};
use stitch_weaver::module::{ORIGINAL_METHOD, ORIGINAL_OWNER, TARGET};
use stitch_weaver::{ClassSource, LoaderId};

/// Route log output through the test harness
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Class source backed by a name-keyed map, identical for every context
pub struct MapSource {
    classes: FxHashMap<String, Vec<u8>>,
}

impl MapSource {
    pub fn new(classes: Vec<ClassFile>) -> Self {
        Self {
            classes: classes
                .into_iter()
                .map(|c| (c.name.clone(), c.encode()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl ClassSource for MapSource {
    fn class_bytes(&self, _loader: LoaderId, name: &str) -> Option<Vec<u8>> {
        self.classes.get(name).cloned()
    }
}

/// A class whose `handle()S` returns a constant string
pub fn service_class(name: &str, body: &str) -> ClassFile {
    let mut class = ClassFile::new(name);
    class.methods.push(Method {
        name: "handle".to_string(),
        descriptor: "()S".to_string(),
        access: flags::PUBLIC,
        annotations: Vec::new(),
        code: vec![Insn::Const(body.to_string()), Insn::Return],
    });
    class
}

/// A module that wraps `handle()S` with `marker` on both sides
pub fn wrapping_module(class_name: &str, target: &str, marker: &str) -> ClassFile {
    let mut class = ClassFile::new(class_name);
    class.annotations.push(Annotation::with_values(
        TARGET,
        vec![("name".to_string(), target.to_string())],
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
            Insn::Const(marker.to_string()),
            Insn::Concat,
            Insn::Return,
        ],
    });
    class
}

/// Execute a string-building method body
///
/// Supports the instructions the fixtures emit; invocations of methods on
/// the same class recurse, which is exactly how woven entry methods reach
/// their preserved originals.
pub fn run(class: &ClassFile, name: &str, descriptor: &str) -> String {
    let method = class
        .method(name, descriptor)
        .unwrap_or_else(|| panic!("{}.{}{} not found", class.name, name, descriptor));
    let mut stack: Vec<String> = Vec::new();
    for insn in &method.code {
        match insn {
            Insn::Const(value) => stack.push(value.clone()),
            Insn::Concat => {
                let rhs = stack.pop().expect("concat rhs");
                let lhs = stack.pop().expect("concat lhs");
                stack.push(format!("{lhs}{rhs}"));
            }
            Insn::Invoke {
                owner,
                name,
                descriptor,
            } if owner == &class.name => {
                stack.push(run(class, name, descriptor));
            }
            Insn::Return => return stack.pop().unwrap_or_default(),
            other => panic!("evaluator does not support {other:?}"),
        }
    }
    String::new()
}
