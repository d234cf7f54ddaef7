use std::sync::Arc;

use chatsync_persist::RemoteStore;
use chatsync_types::{SessionId, SyncConfig};
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::streaming::{BroadcastTransport, LocalTransport};

pub struct SyncEngineBuilder {
    remote: Option<Arc<dyn RemoteStore>>,
    transport: Option<Arc<dyn BroadcastTransport>>,
    session_id: Option<SessionId>,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self {
            remote: None,
            transport: None,
            session_id: None,
            config: SyncConfig::default(),
        }
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Defaults to a private [`LocalTransport`], which reaches no other session
    pub fn transport(mut self, transport: Arc<dyn BroadcastTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to a freshly generated id
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let remote = self.remote.ok_or(SyncError::MissingComponent("remote store"))?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LocalTransport::default()));
        let session_id = self.session_id.unwrap_or_else(SessionId::generate);

        Ok(SyncEngine::with_session(remote, transport, self.config, session_id))
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
