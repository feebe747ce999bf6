//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Canonical attribute paths and the index resolving them to live handles."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! Paths are `device.node.object.attribute`, where the attribute part may itself
//! be dotted (`instMag.f`). Object paths stop after the object name.
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::cdc::Cdc;
use crate::error::{ModelError, Result};
use crate::stack::{AttributeHandle, FunctionalConstraint, NodeHandle};
use crate::value::DataType;

pub const SEPARATOR: char = '.';

pub fn join_path(device: &str, node: &str, object: &str, attribute: &str) -> String {
    format!("{device}.{node}.{object}.{attribute}")
}

pub fn object_path(device: &str, node: &str, object: &str) -> String {
    format!("{device}.{node}.{object}")
}

/// Split a canonical attribute path into its four segments.
pub fn split_path(path: &str) -> Option<(&str, &str, &str, &str)> {
    let mut parts = path.splitn(4, SEPARATOR);
    let device = parts.next().filter(|part| !part.is_empty())?;
    let node = parts.next().filter(|part| !part.is_empty())?;
    let object = parts.next().filter(|part| !part.is_empty())?;
    let attribute = parts.next().filter(|part| !part.is_empty())?;
    Some((device, node, object, attribute))
}

/// Field-protocol reference of a report control block: `LD/LN.BR.name` or
/// `LD/LN.RP.name`.
pub fn rcb_reference(device: &str, node: &str, buffered: bool, name: &str) -> String {
    let class = if buffered { "BR" } else { "RP" };
    format!("{device}/{node}.{class}.{name}")
}

/// A data-set member written in MMS variable form, `[LD/]LN$FC$DO$DA[$DA...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    pub device: String,
    pub node: String,
    pub fc: FunctionalConstraint,
    pub object: String,
    pub attribute: String,
}

impl VariableRef {
    /// Parse `variable`, taking the device from `default_device` when the
    /// variable carries no `LD/` prefix.
    pub fn parse(variable: &str, default_device: &str) -> Option<Self> {
        let (device, rest) = match variable.split_once('/') {
            Some((device, rest)) if !device.is_empty() => (device, rest),
            Some(_) => return None,
            None => (default_device, variable),
        };
        let mut segments = rest.split('$');
        let node = segments.next().filter(|part| !part.is_empty())?;
        let fc = FunctionalConstraint::from_str(segments.next()?).ok()?;
        let object = segments.next().filter(|part| !part.is_empty())?;
        let attribute: Vec<&str> = segments.collect();
        if attribute.is_empty() || attribute.iter().any(|part| part.is_empty()) {
            return None;
        }
        Some(Self {
            device: device.to_owned(),
            node: node.to_owned(),
            fc,
            object: object.to_owned(),
            attribute: attribute.join("."),
        })
    }

    pub fn path(&self) -> String {
        join_path(&self.device, &self.node, &self.object, &self.attribute)
    }

    pub fn object_path(&self) -> String {
        object_path(&self.device, &self.node, &self.object)
    }
}

/// Index entry for one declared data attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeEntry {
    pub handle: AttributeHandle,
    pub data_type: DataType,
    pub fc: FunctionalConstraint,
}

/// Index entry for one data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    pub handle: NodeHandle,
    pub cdc: Cdc,
    /// Commanded value type, present only for controllable classes.
    pub control_type: Option<DataType>,
}

impl ObjectEntry {
    pub fn controllable(&self) -> bool {
        self.control_type.is_some()
    }
}

/// Path lookup table for one model generation.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    attributes: BTreeMap<String, AttributeEntry>,
    objects: BTreeMap<String, ObjectEntry>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribute; returns false if the path was already present.
    pub fn insert_attribute(&mut self, path: String, entry: AttributeEntry) -> bool {
        match self.attributes.entry(path) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn insert_object(&mut self, path: String, entry: ObjectEntry) {
        self.objects.insert(path, entry);
    }

    pub fn resolve(&self, path: &str) -> Result<&AttributeEntry> {
        self.attributes
            .get(path)
            .ok_or_else(|| ModelError::PathNotFound(path.to_owned()))
    }

    pub fn object(&self, path: &str) -> Result<&ObjectEntry> {
        self.objects
            .get(path)
            .ok_or_else(|| ModelError::PathNotFound(path.to_owned()))
    }

    /// Every controllable data object, keyed by object path.
    pub fn controllable_objects(&self) -> impl Iterator<Item = (&str, &ObjectEntry)> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.controllable())
            .map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeEntry)> {
        self.attributes.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn objects(&self) -> impl Iterator<Item = (&str, &ObjectEntry)> {
        self.objects.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Fold another index into this one. Paths of `other` win on collision,
    /// which never happens for fragments built under a fresh device name.
    pub fn merge(&mut self, other: PathIndex) {
        self.attributes.extend(other.attributes);
        self.objects.extend(other.objects);
    }

    /// Drop every attribute and object under logical device `device`.
    pub fn remove_device(&mut self, device: &str) {
        let prefix = format!("{device}{SEPARATOR}");
        self.attributes.retain(|path, _| !path.starts_with(&prefix));
        self.objects.retain(|path, _| !path.starts_with(&prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(handle: u64, data_type: DataType) -> AttributeEntry {
        AttributeEntry {
            handle: AttributeHandle(handle),
            data_type,
            fc: FunctionalConstraint::Mx,
        }
    }

    #[test]
    fn dotted_attribute_names_stay_in_the_last_segment() {
        let path = join_path("SENSORS", "TTMP1", "TmpSv", "instMag.f");
        assert_eq!(path, "SENSORS.TTMP1.TmpSv.instMag.f");
        assert_eq!(
            split_path(&path),
            Some(("SENSORS", "TTMP1", "TmpSv", "instMag.f"))
        );
        assert_eq!(split_path("SENSORS.TTMP1.TmpSv"), None);
        assert_eq!(split_path("SENSORS..TmpSv.t"), None);
    }

    #[test]
    fn resolves_inserted_paths_and_reports_missing_ones() {
        let mut index = PathIndex::new();
        assert!(index.insert_attribute("A.B.C.d".into(), entry(1, DataType::Float)));
        assert!(!index.insert_attribute("A.B.C.d".into(), entry(2, DataType::Float)));
        assert_eq!(index.resolve("A.B.C.d").unwrap().handle, AttributeHandle(1));
        match index.resolve("A.B.C.e") {
            Err(ModelError::PathNotFound(path)) => assert_eq!(path, "A.B.C.e"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn enumerates_only_controllable_objects() {
        let mut index = PathIndex::new();
        index.insert_object(
            "LD.GGIO1.SPCSO1".into(),
            ObjectEntry {
                handle: NodeHandle(1),
                cdc: Cdc::Spc,
                control_type: Some(DataType::Boolean),
            },
        );
        index.insert_object(
            "LD.GGIO1.Ind1".into(),
            ObjectEntry {
                handle: NodeHandle(2),
                cdc: Cdc::Sps,
                control_type: None,
            },
        );
        let controllable: Vec<_> = index.controllable_objects().map(|(path, _)| path).collect();
        assert_eq!(controllable, vec!["LD.GGIO1.SPCSO1"]);
    }

    #[test]
    fn parses_mms_variables() {
        let variable = VariableRef::parse("TTMP1$MX$TmpSv$instMag$f", "SENSORS").unwrap();
        assert_eq!(variable.path(), "SENSORS.TTMP1.TmpSv.instMag.f");
        assert_eq!(variable.fc, FunctionalConstraint::Mx);

        let qualified = VariableRef::parse("OTHER/GGIO1$ST$Ind1$stVal", "SENSORS").unwrap();
        assert_eq!(qualified.object_path(), "OTHER.GGIO1.Ind1");

        assert!(VariableRef::parse("TTMP1$MX$TmpSv", "SENSORS").is_none());
        assert!(VariableRef::parse("TTMP1$ZZ$TmpSv$t", "SENSORS").is_none());
    }

    #[test]
    fn report_references_name_the_block_class() {
        assert_eq!(
            rcb_reference("ASG90001", "LLN0", false, "diurcb04"),
            "ASG90001/LLN0.RP.diurcb04"
        );
        assert_eq!(rcb_reference("LD0", "LLN0", true, "brcb01"), "LD0/LLN0.BR.brcb01");
    }

    #[test]
    fn removing_a_device_keeps_its_namesake_prefixes() {
        let mut index = PathIndex::new();
        index.insert_attribute("LD.GGIO1.Ind1.stVal".into(), entry(1, DataType::Boolean));
        index.insert_attribute("LD2.GGIO1.Ind1.stVal".into(), entry(2, DataType::Boolean));
        index.remove_device("LD");
        let paths: Vec<_> = index.paths().collect();
        assert_eq!(paths, vec!["LD2.GGIO1.Ind1.stVal"]);
    }
}
