//! Object instance and class-info registries (spec.md §3).
//!
//! Instances are identified by an opaque `i64` handle (the same "id" value
//! the JIT passes through `RDI`/`RAX` for a `ClassInstance`-typed slot);
//! the registry owns the actual field storage behind that handle so the
//! compiled code never has to know a struct layout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

pub type ObjectId = i64;

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<String>,
    pub field_names: Vec<String>,
}

#[derive(Debug, Default)]
struct Instance {
    class_name: String,
    fields: Vec<i64>,
    /// Per-slot property-name handles for anonymous object literals
    /// (spec.md §6 `__object_set_property_name`/`__object_get_property_name`):
    /// class instances address fields by `field_index` instead and leave
    /// this empty.
    field_names: Vec<i64>,
}

pub struct ObjectRegistry {
    classes: RwLock<HashMap<String, ClassInfo>>,
    instances: RwLock<HashMap<ObjectId, Instance>>,
    next_id: AtomicI64,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        ObjectRegistry {
            classes: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn register_class(&self, info: ClassInfo) {
        self.classes.write().unwrap().insert(info.name.clone(), info);
    }

    pub fn class_info(&self, name: &str) -> Option<ClassInfo> {
        self.classes.read().unwrap().get(name).cloned()
    }

    pub fn field_index(&self, class_name: &str, field: &str) -> Option<usize> {
        self.classes
            .read()
            .unwrap()
            .get(class_name)
            .and_then(|info| info.field_names.iter().position(|f| f == field))
    }

    pub fn create(&self, class_name: &str, field_count: usize) -> ObjectId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = Instance {
            class_name: class_name.to_string(),
            fields: vec![0; field_count],
            field_names: vec![0; field_count],
        };
        self.instances.write().unwrap().insert(id, instance);
        id
    }

    pub fn get_property(&self, id: ObjectId, index: usize) -> i64 {
        self.instances
            .read()
            .unwrap()
            .get(&id)
            .and_then(|instance| instance.fields.get(index).copied())
            .unwrap_or(0)
    }

    pub fn set_property(&self, id: ObjectId, index: usize, value: i64) {
        if let Some(instance) = self.instances.write().unwrap().get_mut(&id) {
            if index < instance.fields.len() {
                instance.fields[index] = value;
            }
        }
    }

    /// Records the property-name handle for slot `index` of an anonymous
    /// object literal (spec.md §6 `__object_set_property_name`); class
    /// instances never call this, so `field_names` stays all-zero for them.
    pub fn set_property_name(&self, id: ObjectId, index: usize, name_handle: i64) {
        if let Some(instance) = self.instances.write().unwrap().get_mut(&id) {
            if index < instance.field_names.len() {
                instance.field_names[index] = name_handle;
            }
        }
    }

    pub fn get_property_name(&self, id: ObjectId, index: usize) -> i64 {
        self.instances
            .read()
            .unwrap()
            .get(&id)
            .and_then(|instance| instance.field_names.get(index).copied())
            .unwrap_or(0)
    }

    pub fn field_count(&self, id: ObjectId) -> i64 {
        self.instances.read().unwrap().get(&id).map(|i| i.fields.len() as i64).unwrap_or(0)
    }

    pub fn class_name_of(&self, id: ObjectId) -> Option<String> {
        self.instances.read().unwrap().get(&id).map(|i| i.class_name.clone())
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_instance_fields_default_to_zero() {
        let registry = ObjectRegistry::new();
        let id = registry.create("Point", 2);
        assert_eq!(registry.get_property(id, 0), 0);
        assert_eq!(registry.get_property(id, 1), 0);
    }

    #[test]
    fn set_then_get_round_trips() {
        let registry = ObjectRegistry::new();
        let id = registry.create("Point", 2);
        registry.set_property(id, 0, 10);
        registry.set_property(id, 1, 20);
        assert_eq!(registry.get_property(id, 0), 10);
        assert_eq!(registry.get_property(id, 1), 20);
    }

    #[test]
    fn field_index_resolves_from_registered_class() {
        let registry = ObjectRegistry::new();
        registry.register_class(ClassInfo {
            name: "Point".to_string(),
            parent: None,
            field_names: vec!["x".to_string(), "y".to_string()],
        });
        assert_eq!(registry.field_index("Point", "y"), Some(1));
        assert_eq!(registry.field_index("Point", "z"), None);
    }
}
