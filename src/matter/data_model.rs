//! Owner of the single node and the services it is wired to.
//!
//! Applications hold one `DataModel` (usually behind [`SharedDataModel`]) and
//! reach the node through it. Creating the node twice returns the existing
//! one; destroying it tears down every endpoint first.

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::config::DataModelConfig;
use crate::error::{DataModelError, Result};
use crate::matter::bridge::{AttributeProvider, ProtocolBridge};
use crate::matter::node::Node;
use crate::persistence::{KvStore, Persistence};
use crate::scheduler::DeferredScheduler;

pub type SharedDataModel = Arc<Mutex<DataModel>>;

pub struct DataModel {
    config: DataModelConfig,
    persistence: Persistence,
    bridge: Option<ProtocolBridge>,
    node: Option<Node>,
}

impl DataModel {
    pub fn new(
        config: DataModelConfig,
        store: Arc<dyn KvStore>,
        scheduler: Arc<dyn DeferredScheduler>,
    ) -> Self {
        let persistence =
            Persistence::new(store, scheduler, config.deferred_persistence_delay());
        Self {
            config,
            persistence,
            bridge: None,
            node: None,
        }
    }

    /// Route externally managed attributes through `provider`.
    pub fn with_provider(mut self, provider: Arc<dyn AttributeProvider>) -> Self {
        self.set_bridge(ProtocolBridge::new(provider, self.config.tlv_buffer_size));
        self
    }

    pub fn set_bridge(&mut self, bridge: ProtocolBridge) {
        if let Some(node) = &mut self.node {
            node.set_bridge(Some(bridge.clone()));
        }
        self.bridge = Some(bridge);
    }

    pub fn config(&self) -> &DataModelConfig {
        &self.config
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn is_created(&self) -> bool {
        self.node.is_some()
    }

    /// Create the node, or return the one that already exists.
    pub fn create_raw(&mut self) -> &mut Node {
        if self.node.is_some() {
            warn!("Node already exists");
        }
        let config = &self.config;
        let persistence = &self.persistence;
        let bridge = &self.bridge;
        self.node.get_or_insert_with(|| {
            info!("Creating node");
            Node::new(config.clone(), persistence.clone(), bridge.clone())
        })
    }

    pub fn node(&self) -> Result<&Node> {
        self.node
            .as_ref()
            .ok_or_else(|| DataModelError::InvalidState("node not created".to_string()))
    }

    pub fn node_mut(&mut self) -> Result<&mut Node> {
        self.node
            .as_mut()
            .ok_or_else(|| DataModelError::InvalidState("node not created".to_string()))
    }

    /// Destroy every endpoint, then the node.
    pub fn destroy(&mut self) -> Result<()> {
        self.node_mut()?.teardown();
        self.destroy_raw()
    }

    /// Drop the node without touching its endpoints' stored values.
    pub fn destroy_raw(&mut self) -> Result<()> {
        if self.node.take().is_none() {
            return Err(DataModelError::InvalidState(
                "node not created".to_string(),
            ));
        }
        self.persistence.cancel_all_deferred();
        info!("Node destroyed");
        Ok(())
    }

    pub fn into_shared(self) -> SharedDataModel {
        Arc::new(Mutex::new(self))
    }
}
