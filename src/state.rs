//! Shared application state.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::dump::DumpWriter;
use crate::supervisor::Supervisor;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub supervisor: Supervisor,
    /// Global request lock (§5): guarantees at-most-one in-flight inference,
    /// end-to-end including any streamed response body. Wrapped in its own
    /// `Arc` so handlers can take an owned guard (`lock_owned`) and move it
    /// into a streamed response body instead of dropping it when the
    /// handler function returns.
    pub request_lock: Arc<Mutex<()>>,
    pub dump_writer: Option<DumpWriter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let dump_writer = config
            .server
            .dumps_dir
            .as_ref()
            .map(|dir| DumpWriter::new(dir.clone(), config.server.purge_dumps_on_start));
        let supervisor = Supervisor::new(config.server.clone());
        Self {
            config,
            supervisor,
            request_lock: Arc::new(Mutex::new(())),
            dump_writer,
        }
    }
}

pub type SharedState = Arc<AppState>;
