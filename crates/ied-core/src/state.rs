//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Live model generation and its single-writer lock."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use ied_model::stack::ServerHandle;
use ied_model::{IedModel, ProtocolStack};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// A built model bound to the server instance publishing it.
///
/// Every change to engine-held values goes through [`Generation::lock`], which
/// serialises writers and brackets them with the engine's data-model lock.
pub struct Generation {
    stack: Arc<dyn ProtocolStack>,
    model: RwLock<IedModel>,
    server: ServerHandle,
    writer: Mutex<()>,
}

impl Generation {
    pub(crate) fn new(stack: Arc<dyn ProtocolStack>, model: IedModel, server: ServerHandle) -> Self {
        Self {
            stack,
            model: RwLock::new(model),
            server,
            writer: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.model.read().id()
    }

    pub fn server(&self) -> ServerHandle {
        self.server
    }

    pub fn stack(&self) -> &dyn ProtocolStack {
        self.stack.as_ref()
    }

    pub fn model(&self) -> RwLockReadGuard<'_, IedModel> {
        self.model.read()
    }

    pub(crate) fn model_mut(&self) -> RwLockWriteGuard<'_, IedModel> {
        self.model.write()
    }

    /// Take the writer lock. The engine lock is released when the guard drops,
    /// which is also when reports queued during the write are delivered.
    pub fn lock(&self) -> ModelWriteGuard<'_> {
        let writer = self.writer.lock();
        self.stack.lock_data_model(self.server);
        ModelWriteGuard {
            generation: self,
            _writer: writer,
        }
    }

    /// Stop the server, then release the server and model.
    pub(crate) fn teardown(&self) {
        let model = self.model.read().handle();
        self.stack.stop_server(self.server);
        self.stack.destroy_server(self.server);
        self.stack.destroy_model(model);
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id())
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// Exclusive write access to a generation's engine values.
pub struct ModelWriteGuard<'a> {
    generation: &'a Generation,
    _writer: MutexGuard<'a, ()>,
}

impl Drop for ModelWriteGuard<'_> {
    fn drop(&mut self) {
        self.generation
            .stack
            .unlock_data_model(self.generation.server);
    }
}
