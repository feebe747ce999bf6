//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Outbound backend seam used by the control path."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

/// Receiver of commanded values, keyed by data-object path.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn update_point_values(&self, values: IndexMap<String, Value>) -> Result<()>;
}

/// Backend that keeps every call in memory.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<IndexMap<String, Value>>>,
    fail: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail until cleared.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<IndexMap<String, Value>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn update_point_values(&self, values: IndexMap<String, Value>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("backend unavailable");
        }
        self.calls.lock().push(values);
        Ok(())
    }
}
