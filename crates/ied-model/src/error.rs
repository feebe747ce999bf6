//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Error taxonomy for model construction, addressing and value coding."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use crate::cdc::OptionKind;
use crate::value::DataType;

/// Result alias used throughout the model crate.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Reasons a schema cannot be turned into a model. Always fatal to the build.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown common data class '{0}'")]
    UnknownCdc(String),
    #[error("data object '{object}' has no attribute '{attribute}'")]
    UnknownAttribute { object: String, attribute: String },
    #[error("unknown {kind} option '{name}'")]
    UnknownOption { kind: OptionKind, name: String },
    #[error("attribute '{path}' is declared as {declared} but the data class defines it as {actual}")]
    TypeMismatch {
        path: String,
        declared: DataType,
        actual: String,
    },
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },
    #[error("data set '{data_set}' references unknown variable '{variable}'")]
    UnknownDataSetEntry { data_set: String, variable: String },
    #[error("report '{report}' references unknown data set '{data_set}'")]
    UnknownDataSet { report: String, data_set: String },
    #[error("malformed schema: {0}")]
    Malformed(String),
}

/// Top-level error for every model operation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    #[error("value {value} cannot be encoded as {data_type}")]
    InvalidValue { data_type: DataType, value: String },
    #[error("protocol stack failed to start: {0}")]
    Startup(String),
    #[error("protocol stack error: {0}")]
    Stack(String),
}

impl ModelError {
    /// True for errors that only affect a single point and leave the batch intact.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ModelError::PathNotFound(_)
                | ModelError::UnsupportedType(_)
                | ModelError::InvalidValue { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_render_the_offending_name() {
        let err = ModelError::from(ConfigError::UnknownCdc("XYZ".into()));
        assert_eq!(err.to_string(), "unknown common data class 'XYZ'");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn per_point_errors_are_recoverable() {
        assert!(ModelError::PathNotFound("A.B.C.d".into()).is_recoverable());
        assert!(ModelError::UnsupportedType("bit-string".into()).is_recoverable());
        assert!(!ModelError::Startup("port in use".into()).is_recoverable());
    }
}
