//! Owned, shared agent state: the two registries, the idle supervisor, and
//! the pieces the dispatcher needs to make decisions. Passed by reference
//! (as an `Arc`) rather than scattered across mutable globals.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::extension_host::ExtensionHostFactory;
use crate::idle::IdleSupervisor;
use crate::registry::ConnectionRegistry;
use crate::signer::Signer;

pub struct AgentState {
    pub config: AgentConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub idle: Arc<IdleSupervisor>,
    pub signer: Option<Arc<dyn Signer>>,
    pub extension_host_factory: Arc<dyn ExtensionHostFactory>,
}

impl AgentState {
    pub fn new(
        config: AgentConfig,
        registry: Arc<ConnectionRegistry>,
        idle: Arc<IdleSupervisor>,
        signer: Option<Arc<dyn Signer>>,
        extension_host_factory: Arc<dyn ExtensionHostFactory>,
    ) -> Arc<Self> {
        Arc::new(Self { config, registry, idle, signer, extension_host_factory })
    }
}
