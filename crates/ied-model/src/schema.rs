//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Declarative model schema as persisted in the configuration file."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::value::DataType;

/// Root of the persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    #[serde(default)]
    pub logical_devices: Vec<LogicalDeviceSchema>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logical_devices: Vec::new(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Malformed(err.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|err| ConfigError::Malformed(err.to_string()))
    }

    pub fn device(&self, name: &str) -> Option<&LogicalDeviceSchema> {
        self.logical_devices.iter().find(|device| device.name == name)
    }

    pub fn contains_device(&self, name: &str) -> bool {
        self.device(name).is_some()
    }

    /// Copy of this schema with the device list replaced.
    pub fn with_devices(&self, logical_devices: Vec<LogicalDeviceSchema>) -> Self {
        Self {
            name: self.name.clone(),
            logical_devices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalDeviceSchema {
    pub name: String,
    #[serde(default)]
    pub logical_nodes: Vec<LogicalNodeSchema>,
}

impl LogicalDeviceSchema {
    /// Build a device from its name and a JSON-encoded node list, the form used
    /// on the RPC surface.
    pub fn from_parts(name: impl Into<String>, logical_nodes: &str) -> Result<Self, ConfigError> {
        let name = name.into();
        let logical_nodes = serde_json::from_str(logical_nodes).map_err(|err| {
            ConfigError::Malformed(format!("logical nodes of device '{name}': {err}"))
        })?;
        Ok(Self {
            name,
            logical_nodes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalNodeSchema {
    pub name: String,
    #[serde(default)]
    pub data_objects: Vec<DataObjectSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_sets: Vec<DataSetSchema>,
}

/// One data object. Every class-specific argument is optional and defaults to
/// zero or false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObjectSchema {
    pub name: String,
    pub cdc: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(
        default,
        rename = "controlOptions",
        alias = "control_options",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub control_options: Vec<String>,
    #[serde(
        default,
        rename = "wpOptions",
        alias = "wp_options",
        skip_serializing_if = "is_zero"
    )]
    pub wp_options: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_pts: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_old_status: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_transient_indicator: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_cm_tm: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_cm_ct: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_his_rs: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_cha_man_rs: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_integer_not_float: bool,
    #[serde(default)]
    pub data_attributes: Vec<DataAttributeSchema>,
}

impl DataObjectSchema {
    pub fn new(name: impl Into<String>, cdc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cdc: cdc.into(),
            options: Vec::new(),
            control_options: Vec::new(),
            wp_options: 0,
            max_pts: 0,
            has_old_status: false,
            has_transient_indicator: false,
            has_cm_tm: false,
            has_cm_ct: false,
            has_his_rs: false,
            has_cha_man_rs: false,
            is_integer_not_float: false,
            data_attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.data_attributes.push(DataAttributeSchema {
            name: name.into(),
            data_type,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAttributeSchema {
    /// Dotted name relative to the data object, e.g. `instMag.f`.
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetSchema {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<DataSetEntrySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<ReportSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetEntrySchema {
    /// MMS variable form: `[LD/]LN$FC$DO$DA[$DA...]`.
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(default)]
    pub buffered: bool,
    /// Data set in the same logical node; the enclosing one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set: Option<String>,
    #[serde(default = "default_configuration_revision")]
    pub configuration_revision: u32,
    /// Milliseconds.
    #[serde(default)]
    pub buffer_time: u32,
    /// Milliseconds.
    #[serde(default)]
    pub integrity_period: u32,
    #[serde(default)]
    pub trigger_options: Vec<String>,
    #[serde(default)]
    pub report_options: Vec<String>,
}

fn default_configuration_revision() -> u32 {
    1
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_persisted_configuration_shape() {
        let raw = json!({
            "name": "proxy",
            "logical_devices": [{
                "name": "SENSORS",
                "logical_nodes": [{
                    "name": "TTMP1",
                    "data_objects": [{
                        "name": "TmpSv",
                        "cdc": "SAV",
                        "options": ["unit"],
                        "controlOptions": [],
                        "data_attributes": [
                            {"name": "instMag.f", "data_type": "float"},
                            {"name": "t", "data_type": "timestamp"}
                        ]
                    }],
                    "data_sets": [{
                        "name": "Temps",
                        "entries": [{"variable": "TTMP1$MX$TmpSv$instMag$f"}],
                        "reports": [{
                            "name": "urcb01",
                            "buffered": false,
                            "trigger_options": ["data_changed"],
                            "report_options": ["reason_code"]
                        }]
                    }]
                }]
            }]
        })
        .to_string();
        let schema = ModelSchema::from_json_str(&raw).unwrap();
        let node = &schema.logical_devices[0].logical_nodes[0];
        assert_eq!(node.data_objects[0].data_attributes.len(), 2);
        assert_eq!(node.data_objects[0].max_pts, 0);
        let report = &node.data_sets[0].reports[0];
        assert_eq!(report.configuration_revision, 1);
        assert_eq!(report.report_id, None);
        assert!(schema.contains_device("SENSORS"));
    }

    #[test]
    fn control_options_keep_their_wire_name() {
        let mut object = DataObjectSchema::new("Pos", "SPC");
        object.control_options = vec!["direct_normal".into()];
        object.wp_options = 3;
        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["controlOptions"], json!(["direct_normal"]));
        assert_eq!(value["wpOptions"], json!(3));
        assert!(value.get("has_old_status").is_none());

        let snake: DataObjectSchema = serde_json::from_value(json!({
            "name": "Pos",
            "cdc": "SPC",
            "control_options": ["direct_normal"]
        }))
        .unwrap();
        assert_eq!(snake.control_options, vec!["direct_normal".to_owned()]);
    }

    #[test]
    fn malformed_documents_are_config_errors() {
        let err = ModelSchema::from_json_str("{\"logical_devices\": 4}").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
        let err = LogicalDeviceSchema::from_parts("LD0", "not json").unwrap_err();
        assert!(err.to_string().contains("LD0"));
    }

    #[test]
    fn unknown_data_types_are_rejected() {
        let raw = r#"{"name":"x","logical_devices":[{"name":"A","logical_nodes":[{"name":"B",
            "data_objects":[{"name":"C","cdc":"SPS","data_attributes":[{"name":"stVal","data_type":"string"}]}]}]}]}"#;
        assert!(ModelSchema::from_json_str(raw).is_err());
    }
}
