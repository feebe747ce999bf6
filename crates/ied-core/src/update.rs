//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Path-addressed point writes and reads against the live model."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use ied_model::{decode, encode, ModelError};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::state::Generation;

/// Result of one batch of point writes.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub applied: usize,
    pub rejected: Vec<(String, ModelError)>,
}

impl UpdateOutcome {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Write every entry of `values` under one writer lock.
///
/// Entries are independent: an unknown path or an unencodable value is logged
/// and skipped without affecting the rest of the batch.
pub fn apply(generation: &Generation, values: &IndexMap<String, Value>) -> UpdateOutcome {
    let mut outcome = UpdateOutcome::default();
    let _guard = generation.lock();
    let model = generation.model();
    for (path, value) in values {
        let result = model.index().resolve(path).and_then(|entry| {
            let encoded = encode(entry.data_type, value)?;
            generation
                .stack()
                .update_attribute(generation.server(), entry.handle, &encoded)
        });
        match result {
            Ok(()) => {
                debug!(path = %path, value = %value, "point updated");
                outcome.applied += 1;
            }
            Err(err) => {
                warn!(path = %path, error = %err, "point update rejected");
                outcome.rejected.push((path.clone(), err));
            }
        }
    }
    outcome
}

/// Current value of a leaf attribute in its declared type.
pub fn read(generation: &Generation, path: &str) -> ied_model::Result<Value> {
    let _guard = generation.lock();
    let model = generation.model();
    let entry = model.index().resolve(path)?;
    let raw = generation
        .stack()
        .read_attribute(generation.server(), entry.handle)?;
    decode(Some(entry.data_type), &raw)
}
