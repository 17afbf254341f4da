//! Persisted layout of named objects.
//!
//! Objects that hold state across restarts (the account store, the exec
//! scratch pads) are recorded by logical name with their kind and footprint.
//! A later run refuses to start if its topology would lay them out
//! differently.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TopoError;
use crate::topo::Topo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointObj {
    pub kind: String,
    pub footprint: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutCheckpoint {
    pub objects: BTreeMap<String, CheckpointObj>,
}

impl LayoutCheckpoint {
    pub fn capture(topo: &Topo) -> Result<Self, TopoError> {
        let mut objects = BTreeMap::new();
        for (name, id) in topo.props().named_objs() {
            let obj = topo.obj(id)?;
            objects.insert(
                name.to_string(),
                CheckpointObj {
                    kind: obj.kind.tag().to_string(),
                    footprint: obj.footprint as u64,
                },
            );
        }
        Ok(Self { objects })
    }

    pub fn load(path: &Path) -> Result<Self, TopoError> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| TopoError::CheckpointFormat(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), TopoError> {
        let text =
            toml::to_string_pretty(self).map_err(|e| TopoError::CheckpointFormat(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Every checkpointed object must exist with the same kind and footprint.
    pub fn verify(&self, topo: &Topo) -> Result<(), TopoError> {
        let current = Self::capture(topo)?;
        for (name, expected) in &self.objects {
            let found = current
                .objects
                .get(name)
                .ok_or_else(|| TopoError::CheckpointMissing(name.clone()))?;
            if found != expected {
                return Err(TopoError::CheckpointMismatch {
                    name: name.clone(),
                    expected: expected.footprint,
                    found: found.footprint,
                });
            }
        }
        Ok(())
    }
}
