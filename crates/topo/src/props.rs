//! Flat key/value property store.
//!
//! Every creation parameter of every object is recorded here so that a tile
//! joining an object later can re-derive its exact footprint without access
//! to the builder. Keys are `obj.<id>.<prop>`; logical names are recorded as
//! `<name>.<idx>` pointing at an object id.

use std::collections::BTreeMap;

use crate::error::TopoError;
use crate::ObjId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropStore {
    props: BTreeMap<String, u64>,
}

impl PropStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn set(&mut self, key: impl Into<String>, value: u64) {
        self.props.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.props.get(key).copied()
    }

    pub fn require(&self, key: &str) -> Result<u64, TopoError> {
        self.get(key)
            .ok_or_else(|| TopoError::MissingProp(key.to_string()))
    }

    pub fn set_obj(&mut self, obj: ObjId, prop: &str, value: u64) {
        self.set(obj_key(obj, prop), value);
    }

    pub fn obj(&self, obj: ObjId, prop: &str) -> Result<u64, TopoError> {
        self.require(&obj_key(obj, prop))
    }

    /// Registers `obj` under the logical name `<name>.<idx>`.
    pub fn set_named(&mut self, name: &str, idx: usize, obj: ObjId) {
        self.set(format!("{name}.{idx}"), obj.0 as u64);
    }

    pub fn named(&self, name: &str, idx: usize) -> Result<ObjId, TopoError> {
        let key = format!("{name}.{idx}");
        self.get(&key)
            .map(|id| ObjId(id as usize))
            .ok_or(TopoError::UnknownNamedObj(key))
    }

    /// Logical names in key order, with the object they resolve to.
    pub fn named_objs(&self) -> impl Iterator<Item = (&str, ObjId)> {
        self.props
            .iter()
            .filter(|(k, _)| !k.starts_with("obj."))
            .map(|(k, v)| (k.as_str(), ObjId(*v as usize)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.props.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn obj_key(obj: ObjId, prop: &str) -> String {
    format!("obj.{}.{prop}", obj.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_props_are_namespaced() {
        let mut props = PropStore::new();
        props.set_obj(ObjId(3), "depth", 128);
        props.set_obj(ObjId(4), "depth", 256);

        assert_eq!(props.obj(ObjId(3), "depth").unwrap(), 128);
        assert_eq!(props.obj(ObjId(4), "depth").unwrap(), 256);
        assert!(matches!(
            props.obj(ObjId(5), "depth"),
            Err(TopoError::MissingProp(k)) if k == "obj.5.depth"
        ));
    }

    #[test]
    fn test_named_objects_skip_obj_keys() {
        let mut props = PropStore::new();
        props.set_obj(ObjId(0), "seed", 9);
        props.set_named("exec_spad", 0, ObjId(7));
        props.set_named("exec_spad", 1, ObjId(8));

        assert_eq!(props.named("exec_spad", 1).unwrap(), ObjId(8));
        let named: Vec<_> = props.named_objs().collect();
        assert_eq!(named, vec![("exec_spad.0", ObjId(7)), ("exec_spad.1", ObjId(8))]);
        assert!(props.named("exec_spad", 2).is_err());
    }
}
