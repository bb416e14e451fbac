//! Class structure resolution and caching
//!
//! The engine never loads classes; the host runtime hands it class bytes on
//! demand through [`ClassSource`]. Resolved structure is memoized per
//! (loading-context, class name), including negative results, so a class
//! that cannot be resolved is only probed once per context.

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use stitch_classfile::ClassFile;

/// Identifier of one loading-context
///
/// Contexts are host-managed scopes; the engine only ever sees their ids.
/// The host signals teardown through `WeaveManager::context_unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u64);

impl LoaderId {
    /// The virtual root context for the runtime's own foundational classes
    pub const BOOTSTRAP: LoaderId = LoaderId(0);
}

/// Host-side resolution of class bytes
///
/// Implementations must tolerate being asked for classes that do not exist
/// in the given context and return `None` rather than failing.
pub trait ClassSource: Send + Sync {
    /// Return the binary form of `name` as visible from `loader`, if any
    fn class_bytes(&self, loader: LoaderId, name: &str) -> Option<Vec<u8>>;
}

/// A declared member of a resolved class
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
    /// Access flags
    pub access: u32,
}

/// Resolved structure of one class
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    /// Internal class name
    pub name: String,
    /// Access flags
    pub access: u32,
    /// Direct supertype name
    pub super_name: Option<String>,
    /// Direct interface names
    pub interfaces: Vec<String>,
    /// Annotation type names present on the class
    pub class_annotations: FxHashSet<String>,
    /// Annotation type names present on any method
    pub method_annotations: FxHashSet<String>,
    fields: Vec<MemberInfo>,
    methods: Vec<MemberInfo>,
}

impl ClassDescriptor {
    /// Build a descriptor from a decoded class
    pub fn from_class(class: &ClassFile) -> Self {
        let class_annotations = class.annotations.iter().map(|a| a.name.clone()).collect();
        let method_annotations = class
            .methods
            .iter()
            .flat_map(|m| m.annotations.iter().map(|a| a.name.clone()))
            .collect();
        Self {
            name: class.name.clone(),
            access: class.access,
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.clone(),
            class_annotations,
            method_annotations,
            fields: class
                .fields
                .iter()
                .map(|f| MemberInfo {
                    name: f.name.clone(),
                    descriptor: f.descriptor.clone(),
                    access: f.access,
                })
                .collect(),
            methods: class
                .methods
                .iter()
                .map(|m| MemberInfo {
                    name: m.name.clone(),
                    descriptor: m.descriptor.clone(),
                    access: m.access,
                })
                .collect(),
        }
    }

    /// Find a declared field by name
    pub fn field(&self, name: &str) -> Option<&MemberInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a declared method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MemberInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// All declared methods
    pub fn methods(&self) -> &[MemberInfo] {
        &self.methods
    }
}

/// Transitively resolved supertype chain and interface set of a class
#[derive(Debug, Default)]
pub struct HierarchyClosure {
    /// Supertype names, nearest first
    pub super_names: Vec<String>,
    /// All interface names reachable through the hierarchy
    pub interface_names: Vec<String>,
    /// Descriptors of every hierarchy class that could be resolved
    pub descriptors: Vec<Arc<ClassDescriptor>>,
}

impl HierarchyClosure {
    /// Look up a field anywhere in the resolved hierarchy
    pub fn field(&self, name: &str) -> Option<&MemberInfo> {
        self.descriptors.iter().find_map(|d| d.field(name))
    }

    /// Look up a method anywhere in the resolved hierarchy
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MemberInfo> {
        self.descriptors.iter().find_map(|d| d.method(name, descriptor))
    }
}

/// Memoizing cache of class structure per loading-context
pub struct ClassStructureCache {
    entries: DashMap<(LoaderId, String), Option<Arc<ClassDescriptor>>>,
}

impl ClassStructureCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Resolve a class in the given context, memoizing the outcome
    ///
    /// `None` means the class is not resolvable right now; callers treat
    /// that as "cannot be proven", never as a failure of the whole
    /// operation.
    pub fn resolve(
        &self,
        source: &dyn ClassSource,
        loader: LoaderId,
        name: &str,
    ) -> Option<Arc<ClassDescriptor>> {
        let key = (loader, name.to_string());
        if let Some(cached) = self.entries.get(&key) {
            return cached.clone();
        }
        let resolved = source
            .class_bytes(loader, name)
            .and_then(|bytes| ClassFile::decode(&bytes).ok())
            .map(|class| Arc::new(ClassDescriptor::from_class(&class)));
        self.entries.insert(key, resolved.clone());
        resolved
    }

    /// Compute the transitive hierarchy closure starting from `class`
    ///
    /// Unresolvable parents still contribute their names (the matcher works
    /// on names), they just cannot contribute members.
    pub fn closure_of(
        &self,
        source: &dyn ClassSource,
        loader: LoaderId,
        class: &ClassDescriptor,
    ) -> HierarchyClosure {
        let mut closure = HierarchyClosure::default();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut pending_interfaces: Vec<String> = class.interfaces.clone();

        // walk the supertype chain first
        let mut current_super = class.super_name.clone();
        while let Some(super_name) = current_super {
            if !seen.insert(super_name.clone()) {
                break; // cycle in host metadata; stop walking
            }
            closure.super_names.push(super_name.clone());
            match self.resolve(source, loader, &super_name) {
                Some(descriptor) => {
                    pending_interfaces.extend(descriptor.interfaces.iter().cloned());
                    current_super = descriptor.super_name.clone();
                    closure.descriptors.push(descriptor);
                }
                None => current_super = None,
            }
        }

        // then every interface reachable from the class or its supers
        while let Some(interface) = pending_interfaces.pop() {
            if !seen.insert(interface.clone()) {
                continue;
            }
            closure.interface_names.push(interface.clone());
            if let Some(descriptor) = self.resolve(source, loader, &interface) {
                pending_interfaces.extend(descriptor.interfaces.iter().cloned());
                closure.descriptors.push(descriptor);
            }
        }

        closure
    }

    /// Drop everything cached for one loading-context
    pub fn evict_loader(&self, loader: LoaderId) {
        self.entries.retain(|key, _| key.0 != loader);
    }

    /// Number of memoized entries, including negative ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ClassStructureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rustc_hash::FxHashMap;

    /// Test source that counts how often each class is fetched
    struct CountingSource {
        classes: FxHashMap<(LoaderId, String), Vec<u8>>,
        fetches: Mutex<usize>,
    }

    impl CountingSource {
        fn new(classes: Vec<(LoaderId, ClassFile)>) -> Self {
            Self {
                classes: classes
                    .into_iter()
                    .map(|(loader, class)| ((loader, class.name.clone()), class.encode()))
                    .collect(),
                fetches: Mutex::new(0),
            }
        }
    }

    impl ClassSource for CountingSource {
        fn class_bytes(&self, loader: LoaderId, name: &str) -> Option<Vec<u8>> {
            *self.fetches.lock() += 1;
            self.classes.get(&(loader, name.to_string())).cloned()
        }
    }

    const APP: LoaderId = LoaderId(7);

    #[test]
    fn test_resolve_memoizes_hits_and_misses() {
        let source = CountingSource::new(vec![(APP, ClassFile::new("app/Service"))]);
        let cache = ClassStructureCache::new();

        assert!(cache.resolve(&source, APP, "app/Service").is_some());
        assert!(cache.resolve(&source, APP, "app/Service").is_some());
        assert!(cache.resolve(&source, APP, "app/Missing").is_none());
        assert!(cache.resolve(&source, APP, "app/Missing").is_none());

        // one fetch per distinct name, misses included
        assert_eq!(*source.fetches.lock(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_closure_walks_supers_and_interfaces() {
        let mut base = ClassFile::new("app/Base");
        base.interfaces.push("app/Closeable".to_string());
        let mut closeable = ClassFile::new("app/Closeable");
        closeable.access |= stitch_classfile::flags::INTERFACE;
        let mut service = ClassFile::new("app/Service");
        service.super_name = Some("app/Base".to_string());
        service.interfaces.push("app/Hook".to_string());

        let source = CountingSource::new(vec![
            (APP, base),
            (APP, closeable),
            (APP, service.clone()),
        ]);
        let cache = ClassStructureCache::new();
        let descriptor = ClassDescriptor::from_class(&service);
        let closure = cache.closure_of(&source, APP, &descriptor);

        assert_eq!(closure.super_names, vec!["app/Base".to_string()]);
        let mut interfaces = closure.interface_names.clone();
        interfaces.sort();
        // app/Hook is unresolvable but still present by name
        assert_eq!(
            interfaces,
            vec!["app/Closeable".to_string(), "app/Hook".to_string()]
        );
        assert_eq!(closure.descriptors.len(), 2);
    }

    #[test]
    fn test_evict_loader_drops_only_that_context() {
        let source = CountingSource::new(vec![
            (APP, ClassFile::new("app/Service")),
            (LoaderId(8), ClassFile::new("app/Other")),
        ]);
        let cache = ClassStructureCache::new();
        cache.resolve(&source, APP, "app/Service");
        cache.resolve(&source, LoaderId(8), "app/Other");
        assert_eq!(cache.len(), 2);

        cache.evict_loader(APP);
        assert_eq!(cache.len(), 1);
        assert!(cache.resolve(&source, LoaderId(8), "app/Other").is_some());
    }
}
