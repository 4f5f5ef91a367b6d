//! Node: the root of the data model tree.
//!
//! Every lookup descends from the node: endpoint by id, cluster by id within
//! the endpoint, attribute/command/event by id within the cluster. The node
//! also runs the attribute write pipeline, since a write touches state at
//! every level (the global callback, the endpoint's user data, the cluster's
//! functions and data version, and storage).
//!
//! ## Write pipeline
//!
//! 1. type check, bounds check, no-op check, capacity check
//! 2. global `PreUpdate` callback, then the cluster's pre-attribute-changed
//!    function; either may reject the write
//! 3. apply the value and bump the cluster data version
//! 4. global `PostUpdate` callback, then the cluster's attribute-changed
//!    function
//! 5. persistence, immediate or deferred
//!
//! ## Endpoint ids
//!
//! Ids come from a monotonic counter that is written to storage on every
//! create, so endpoints created at runtime can be resumed under the same id
//! after a restart.

use log::{debug, error, info, warn};

use crate::config::DataModelConfig;
use crate::error::{DataModelError, ErrorKind, Result};
use crate::matter::attribute::{
    Attribute, AttributeCallback, AttributeFlags, AttributeHandle, AttributePath,
    AttributeStorage, CallbackPhase, UserData, WritePlan, WriteStatus,
};
use crate::matter::bridge::ProtocolBridge;
use crate::matter::cluster::{Cluster, ClusterFlags};
use crate::matter::clusters::identify::{IdentificationCallback, IdentifyAction};
use crate::matter::command::{CommandCallback, CommandFlags, CommandPath};
use crate::matter::endpoint::{Endpoint, EndpointFlags, INVALID_ENDPOINT_ID};
use crate::matter::value::{AttrValue, ValueKind, ValueType};
use crate::persistence::{
    COUNTER_NAMESPACE, LEGACY_COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY, Persistence,
};

/// Matches every endpoint in [`Node::get_cluster_count`].
pub const WILDCARD_ENDPOINT_ID: u16 = 0xFFFF;
/// Matches every cluster in [`Node::get_cluster_count`].
pub const WILDCARD_CLUSTER_ID: u32 = 0xFFFF_FFFF;

fn endpoint_not_found(endpoint_id: u16) -> DataModelError {
    DataModelError::NotFound(format!("endpoint 0x{:04X}", endpoint_id))
}

pub struct Node {
    endpoints: Vec<Endpoint>,
    min_unused_endpoint_id: u16,
    started: bool,
    config: DataModelConfig,
    persistence: Persistence,
    bridge: Option<ProtocolBridge>,
    attribute_callback: Option<AttributeCallback>,
    identification_callback: Option<IdentificationCallback>,
    custom_command_callback: Option<CommandCallback>,
}

impl Node {
    pub(crate) fn new(
        config: DataModelConfig,
        persistence: Persistence,
        bridge: Option<ProtocolBridge>,
    ) -> Self {
        Self {
            endpoints: Vec::new(),
            min_unused_endpoint_id: 0,
            started: false,
            config,
            persistence,
            bridge,
            attribute_callback: None,
            identification_callback: None,
            custom_command_callback: None,
        }
    }

    pub fn config(&self) -> &DataModelConfig {
        &self.config
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn set_bridge(&mut self, bridge: Option<ProtocolBridge>) {
        self.bridge = bridge;
    }

    fn bridge(&self) -> Result<&ProtocolBridge> {
        self.bridge.as_ref().ok_or_else(|| {
            DataModelError::InvalidState("no protocol provider attached".to_string())
        })
    }

    // Callbacks

    pub fn set_callback(&mut self, callback: AttributeCallback) {
        self.attribute_callback = Some(callback);
    }

    pub fn clear_callback(&mut self) {
        self.attribute_callback = None;
    }

    pub fn set_identification_callback(&mut self, callback: IdentificationCallback) {
        self.identification_callback = Some(callback);
    }

    /// Handler for commands flagged `CUSTOM`.
    pub fn set_custom_command_callback(&mut self, callback: CommandCallback) {
        self.custom_command_callback = Some(callback);
    }

    // Endpoints

    /// Create an endpoint under the next free id. It starts enabled.
    pub fn create_endpoint(
        &mut self,
        flags: EndpointFlags,
        user_data: Option<UserData>,
    ) -> Result<&mut Endpoint> {
        self.ensure_capacity()?;
        let id = self.min_unused_endpoint_id;
        if id == INVALID_ENDPOINT_ID {
            return Err(DataModelError::NoMemory(
                "endpoint id space exhausted".to_string(),
            ));
        }
        self.min_unused_endpoint_id = id + 1;
        if let Err(e) = self.persist_counter() {
            warn!("Failed to store minimum unused endpoint id: {}", e);
        }

        self.endpoints.push(Endpoint::new(
            id,
            flags,
            user_data,
            true,
            self.persistence.clone(),
        ));
        info!("Created endpoint 0x{:04X}", id);
        Ok(self.last_endpoint())
    }

    /// Re-create an endpoint known from a previous run. The counter is left
    /// alone and the endpoint starts disabled.
    pub fn resume_endpoint(
        &mut self,
        flags: EndpointFlags,
        id: u16,
        user_data: Option<UserData>,
    ) -> Result<&mut Endpoint> {
        if id >= self.min_unused_endpoint_id {
            return Err(DataModelError::InvalidArgument(format!(
                "endpoint 0x{:04X} was never allocated (next free id is 0x{:04X})",
                id, self.min_unused_endpoint_id
            )));
        }
        if self.endpoints.iter().any(|e| e.id() == id) {
            return Err(DataModelError::InvalidState(format!(
                "endpoint 0x{:04X} already exists",
                id
            )));
        }
        self.ensure_capacity()?;

        self.endpoints.push(Endpoint::new(
            id,
            flags,
            user_data,
            false,
            self.persistence.clone(),
        ));
        info!("Resumed endpoint 0x{:04X}", id);
        Ok(self.last_endpoint())
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.endpoints.len() >= usize::from(self.config.max_dynamic_endpoints) {
            return Err(DataModelError::NoMemory(format!(
                "node already holds {} endpoints",
                self.endpoints.len()
            )));
        }
        Ok(())
    }

    fn last_endpoint(&mut self) -> &mut Endpoint {
        let last = self.endpoints.len() - 1;
        &mut self.endpoints[last]
    }

    /// Remove a `DESTROYABLE` endpoint together with its clusters.
    pub fn destroy_endpoint(&mut self, endpoint_id: u16) -> Result<()> {
        let index = self
            .endpoints
            .iter()
            .position(|e| e.id() == endpoint_id)
            .ok_or_else(|| endpoint_not_found(endpoint_id))?;
        if !self.endpoints[index].flags().contains(EndpointFlags::DESTROYABLE) {
            return Err(DataModelError::InvalidState(format!(
                "endpoint 0x{:04X} is not destroyable",
                endpoint_id
            )));
        }
        self.endpoints.remove(index).destroy();
        info!("Destroyed endpoint 0x{:04X}", endpoint_id);
        Ok(())
    }

    pub fn endpoint(&self, endpoint_id: u16) -> Result<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.id() == endpoint_id)
            .ok_or_else(|| endpoint_not_found(endpoint_id))
    }

    pub fn endpoint_mut(&mut self, endpoint_id: u16) -> Result<&mut Endpoint> {
        self.endpoints
            .iter_mut()
            .find(|e| e.id() == endpoint_id)
            .ok_or_else(|| endpoint_not_found(endpoint_id))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn enable_endpoint(&mut self, endpoint_id: u16) -> Result<()> {
        self.endpoint_mut(endpoint_id)?.enable();
        Ok(())
    }

    pub fn disable_endpoint(&mut self, endpoint_id: u16) -> Result<()> {
        self.endpoint_mut(endpoint_id)?.disable();
        Ok(())
    }

    pub fn enable_all(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.enable();
        }
    }

    pub fn set_parent_endpoint(&mut self, endpoint_id: u16, parent_id: u16) -> Result<()> {
        if endpoint_id == parent_id {
            return Err(DataModelError::InvalidArgument(format!(
                "endpoint 0x{:04X} cannot be its own parent",
                endpoint_id
            )));
        }
        self.endpoint(parent_id)?;
        self.endpoint_mut(endpoint_id)?
            .set_parent_endpoint_id(parent_id);
        Ok(())
    }

    // Endpoint id counter

    pub fn min_unused_endpoint_id(&self) -> u16 {
        self.min_unused_endpoint_id
    }

    pub fn store_min_unused_endpoint_id(&self) -> Result<()> {
        self.persistence.write_u16(
            COUNTER_NAMESPACE,
            MIN_UNUSED_ENDPOINT_ID_KEY,
            self.min_unused_endpoint_id,
        )
    }

    /// Until `start` has loaded the stored counter, the stored one may be
    /// ahead (endpoints created at runtime in an earlier boot) or still sit
    /// in the legacy namespace. Neither is overwritten.
    fn persist_counter(&self) -> Result<()> {
        if !self.started {
            if self
                .persistence
                .read_u16(LEGACY_COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY)?
                .is_some()
            {
                return Ok(());
            }
            if let Some(stored) = self
                .persistence
                .read_u16(COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY)?
                && stored >= self.min_unused_endpoint_id
            {
                return Ok(());
            }
        }
        self.store_min_unused_endpoint_id()
    }

    /// Load the stored counter, migrating it out of the legacy namespace on
    /// first use. `NotFound` when neither location holds it.
    pub fn read_min_unused_endpoint_id(&mut self) -> Result<()> {
        if let Some(stored) = self
            .persistence
            .read_u16(COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY)?
        {
            self.adopt_counter(stored);
            return Ok(());
        }

        debug!("Minimum unused endpoint id not found, trying legacy namespace");
        let Some(stored) = self
            .persistence
            .read_u16(LEGACY_COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY)?
        else {
            return Err(DataModelError::NotFound(
                "minimum unused endpoint id".to_string(),
            ));
        };
        self.adopt_counter(stored);
        if let Err(e) = self
            .persistence
            .erase_key(LEGACY_COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY)
        {
            error!("Failed to erase legacy minimum unused endpoint id: {}", e);
        }
        info!(
            "Migrated minimum unused endpoint id 0x{:04X} from namespace '{}'",
            stored, LEGACY_COUNTER_NAMESPACE
        );
        self.store_min_unused_endpoint_id()
    }

    fn adopt_counter(&mut self, stored: u16) {
        if stored < self.min_unused_endpoint_id {
            warn!(
                "Stored minimum unused endpoint id 0x{:04X} is below 0x{:04X}, keeping the latter",
                stored, self.min_unused_endpoint_id
            );
            return;
        }
        self.min_unused_endpoint_id = stored;
    }

    /// Load the endpoint id counter and run every cluster's plugin init,
    /// add-bounds and init hooks.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(DataModelError::InvalidState(
                "node already started".to_string(),
            ));
        }
        match self.read_min_unused_endpoint_id() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No stored endpoint id counter (first boot)");
            }
            Err(e) => return Err(e),
        }
        self.started = true;

        for endpoint in &mut self.endpoints {
            for cluster in endpoint.clusters_mut() {
                cluster.run_start_hooks();
            }
        }
        info!(
            "Node started with {} endpoints, next endpoint id 0x{:04X}",
            self.endpoints.len(),
            self.min_unused_endpoint_id
        );
        Ok(())
    }

    // Lookups

    pub fn cluster(&self, endpoint_id: u16, cluster_id: u32) -> Result<&Cluster> {
        self.endpoint(endpoint_id)?.cluster(cluster_id).ok_or_else(|| {
            DataModelError::NotFound(format!(
                "cluster 0x{:08X} on endpoint 0x{:04X}",
                cluster_id, endpoint_id
            ))
        })
    }

    pub fn cluster_mut(&mut self, endpoint_id: u16, cluster_id: u32) -> Result<&mut Cluster> {
        self.endpoint_mut(endpoint_id)?
            .cluster_mut(cluster_id)
            .ok_or_else(|| {
                DataModelError::NotFound(format!(
                    "cluster 0x{:08X} on endpoint 0x{:04X}",
                    cluster_id, endpoint_id
                ))
            })
    }

    pub fn attribute(&self, path: &AttributePath) -> Result<&Attribute> {
        self.cluster(path.endpoint_id, path.cluster_id)?
            .attribute(path.attribute_id)
            .ok_or_else(|| DataModelError::NotFound(format!("attribute {}", path)))
    }

    pub fn attribute_mut(&mut self, path: &AttributePath) -> Result<&mut Attribute> {
        self.cluster_mut(path.endpoint_id, path.cluster_id)?
            .attribute_mut(path.attribute_id)
            .ok_or_else(|| DataModelError::NotFound(format!("attribute {}", path)))
    }

    /// Attribute a handle refers to, unless it was destroyed since.
    pub fn resolve(&self, handle: &AttributeHandle) -> Result<&Attribute> {
        let attribute = self.attribute(&handle.path())?;
        if attribute.serial() != handle.serial() {
            return Err(DataModelError::NotFound(format!(
                "stale handle for attribute {}",
                handle.path()
            )));
        }
        Ok(attribute)
    }

    pub fn is_attribute_enabled(&self, path: &AttributePath) -> bool {
        self.endpoint(path.endpoint_id)
            .map(|e| e.is_enabled())
            .unwrap_or(false)
            && self.attribute(path).is_ok()
    }

    pub fn is_command_enabled(&self, path: &CommandPath, mask: CommandFlags) -> bool {
        let Ok(endpoint) = self.endpoint(path.endpoint_id) else {
            return false;
        };
        endpoint.is_enabled()
            && endpoint
                .cluster(path.cluster_id)
                .and_then(|c| c.command_with_flags(path.command_id, mask))
                .is_some()
    }

    /// Count clusters whose flags overlap `flag_mask` on enabled endpoints.
    /// `WILDCARD_ENDPOINT_ID` and `WILDCARD_CLUSTER_ID` match everything.
    pub fn get_cluster_count(
        &self,
        endpoint_id: u16,
        cluster_id: u32,
        flag_mask: ClusterFlags,
    ) -> u32 {
        let count = self
            .endpoints
            .iter()
            .filter(|e| e.is_enabled())
            .filter(|e| endpoint_id == WILDCARD_ENDPOINT_ID || e.id() == endpoint_id)
            .flat_map(|e| e.clusters())
            .filter(|c| cluster_id == WILDCARD_CLUSTER_ID || c.id() == cluster_id)
            .filter(|c| c.flags().intersects(flag_mask))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn server_cluster_endpoint_count(&self, cluster_id: u32) -> u32 {
        self.get_cluster_count(WILDCARD_ENDPOINT_ID, cluster_id, ClusterFlags::SERVER)
    }

    pub fn client_cluster_endpoint_count(&self, cluster_id: u32) -> u32 {
        self.get_cluster_count(WILDCARD_ENDPOINT_ID, cluster_id, ClusterFlags::CLIENT)
    }

    // Values

    /// Current value. Externally managed attributes are read through the
    /// protocol provider.
    pub fn get_value(&self, path: &AttributePath) -> Result<AttrValue> {
        let attribute = self.attribute(path)?;
        match attribute.storage() {
            AttributeStorage::Local(local) => Ok(local.value().clone()),
            AttributeStorage::External => self.bridge()?.read_value(path, attribute.value_type()),
        }
    }

    pub fn get_value_by_handle(&self, handle: &AttributeHandle) -> Result<AttrValue> {
        self.resolve(handle)?;
        self.get_value(&handle.path())
    }

    pub fn set_value_by_handle(
        &mut self,
        handle: &AttributeHandle,
        value: AttrValue,
        run_callbacks: bool,
    ) -> Result<WriteStatus> {
        self.resolve(handle)?;
        self.set_value(handle.path(), value, run_callbacks)
    }

    /// Write an attribute value. `run_callbacks` controls the global
    /// attribute callback; cluster functions always run.
    pub fn set_value(
        &mut self,
        path: AttributePath,
        value: AttrValue,
        run_callbacks: bool,
    ) -> Result<WriteStatus> {
        let attribute = self.attribute(&path)?;
        let flags = attribute.flags();
        let plan = match attribute.local() {
            Some(local) => local.plan_write(&value)?,
            None => {
                let value_type = attribute.value_type();
                return self.set_external_value(&path, flags, value_type, value);
            }
        };
        if plan == WritePlan::Unchanged {
            debug!("Attribute {} unchanged", path);
            return Ok(WriteStatus::Unchanged);
        }

        let user_data = self.endpoint(path.endpoint_id)?.user_data().cloned();
        let cluster = self.cluster(path.endpoint_id, path.cluster_id)?;
        let pre_changed = cluster.pre_attribute_changed_function();
        let changed = cluster.attribute_changed_function();
        let callback = self
            .attribute_callback
            .clone()
            .filter(|_| run_callbacks);

        if let Some(callback) = &callback {
            let mut scratch = value.clone();
            callback(CallbackPhase::PreUpdate, &path, &mut scratch, user_data.as_ref())
                .map_err(|e| rejected(&path, e))?;
        }
        if let Some(pre_changed) = &pre_changed {
            pre_changed(&path, &value).map_err(|e| rejected(&path, e))?;
        }

        let cluster = self.cluster_mut(path.endpoint_id, path.cluster_id)?;
        let attribute = cluster
            .attribute_mut(path.attribute_id)
            .ok_or_else(|| DataModelError::NotFound(format!("attribute {}", path)))?;
        let handle = attribute.handle_at(path.endpoint_id, path.cluster_id);
        let local = attribute.local_mut().ok_or_else(|| {
            DataModelError::InvalidState(format!("attribute {} lost its value", path))
        })?;
        let status = match plan {
            WritePlan::IgnoreEmpty => {
                debug!("Ignoring zero-length write to {}", path);
                WriteStatus::Ignored
            }
            _ => {
                local.apply(value.clone());
                WriteStatus::Updated
            }
        };
        let stored = local.value().clone();
        if status == WriteStatus::Updated {
            cluster.increase_data_version();
        }

        if let Some(callback) = &callback {
            let mut scratch = value.clone();
            if let Err(e) =
                callback(CallbackPhase::PostUpdate, &path, &mut scratch, user_data.as_ref())
            {
                warn!("Post-update callback for {} failed: {}", path, e);
            }
        }
        if let Some(changed) = &changed {
            changed(&path, &value);
        }

        if flags.contains(AttributeFlags::NONVOLATILE) {
            if flags.contains(AttributeFlags::DEFERRED) {
                self.persistence.store_deferred(handle, stored);
            } else {
                // the value is already applied and reported
                if let Err(e) = self.persistence.store_value(&path, &stored) {
                    warn!("Failed to store {}: {}", path, e);
                }
            }
        }
        Ok(status)
    }

    fn set_external_value(
        &self,
        path: &AttributePath,
        flags: AttributeFlags,
        value_type: ValueType,
        value: AttrValue,
    ) -> Result<WriteStatus> {
        if value.value_type() != value_type {
            return Err(DataModelError::TypeMismatch {
                expected: value_type,
                actual: value.value_type(),
            });
        }
        if value.kind() == ValueKind::Array {
            return Err(DataModelError::NotSupported(format!(
                "array write to external attribute {}",
                path
            )));
        }
        if !flags.contains(AttributeFlags::WRITABLE) {
            return Err(DataModelError::NotSupported(format!(
                "external attribute {} is not writable",
                path
            )));
        }
        self.bridge()?.write_value(path, &value)?;
        Ok(WriteStatus::Updated)
    }

    /// Provider read of a locally managed attribute: the override callback
    /// when set, else the global callback, else the stored value.
    pub fn serve_read(&self, path: &AttributePath) -> Result<AttrValue> {
        let attribute = self.attribute(path)?;
        let Some(local) = attribute.local() else {
            return Err(DataModelError::NotSupported(format!(
                "attribute {} is served by the provider",
                path
            )));
        };
        let callback = attribute
            .override_callback()
            .or(self.attribute_callback.as_ref());
        let Some(callback) = callback else {
            return Ok(local.value().clone());
        };

        let user_data = self.endpoint(path.endpoint_id)?.user_data();
        let mut value = local.value().clone();
        callback(CallbackPhase::Read, path, &mut value, user_data)?;
        if value.value_type() != attribute.value_type() {
            return Err(DataModelError::TypeMismatch {
                expected: attribute.value_type(),
                actual: value.value_type(),
            });
        }
        Ok(value)
    }

    /// Provider write of a locally managed attribute: handed to the override
    /// callback when set, otherwise applied with callbacks.
    pub fn serve_write(&mut self, path: AttributePath, value: AttrValue) -> Result<WriteStatus> {
        let attribute = self.attribute(&path)?;
        if let Some(callback) = attribute.override_callback().cloned() {
            if value.value_type() != attribute.value_type() {
                return Err(DataModelError::TypeMismatch {
                    expected: attribute.value_type(),
                    actual: value.value_type(),
                });
            }
            let user_data = self.endpoint(path.endpoint_id)?.user_data().cloned();
            let mut value = value;
            callback(CallbackPhase::Write, &path, &mut value, user_data.as_ref())?;
            return Ok(WriteStatus::Updated);
        }
        self.set_value(path, value, true)
    }

    // Commands and identify

    /// Dispatch an accepted command. Commands flagged `CUSTOM` go to the
    /// custom command handler.
    pub fn invoke_command(&self, path: &CommandPath, payload: &[u8]) -> Result<()> {
        info!("Received command {}", path);
        let endpoint = self.endpoint(path.endpoint_id)?;
        if !endpoint.is_enabled() {
            return Err(DataModelError::InvalidState(format!(
                "endpoint 0x{:04X} is disabled",
                path.endpoint_id
            )));
        }
        let command = self
            .cluster(path.endpoint_id, path.cluster_id)?
            .command_with_flags(path.command_id, CommandFlags::ACCEPTED)
            .ok_or_else(|| DataModelError::NotFound(format!("command {}", path)))?;

        if command.flags().contains(CommandFlags::CUSTOM) {
            return match &self.custom_command_callback {
                Some(callback) => callback(path, payload),
                None => Err(DataModelError::NotSupported(format!(
                    "no custom command handler for {}",
                    path
                ))),
            };
        }
        command.dispatch(path, payload)
    }

    pub fn identify(&mut self, endpoint_id: u16, action: IdentifyAction) -> Result<()> {
        let callback = self.identification_callback.clone();
        let identify = self.endpoint_mut(endpoint_id)?.identify_mut().ok_or_else(|| {
            DataModelError::InvalidState(format!(
                "endpoint 0x{:04X} has no identify state",
                endpoint_id
            ))
        })?;
        identify.apply(action);
        if let Some(callback) = callback {
            callback(action, endpoint_id, identify.identify_type());
        }
        Ok(())
    }

    /// Destroy every endpoint, destroyable or not, and drop the callbacks.
    pub(crate) fn teardown(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.mark_destroyable();
        }
        let ids: Vec<u16> = self.endpoints.iter().map(|e| e.id()).collect();
        for id in ids {
            if let Err(e) = self.destroy_endpoint(id) {
                error!("Failed to destroy endpoint 0x{:04X}: {}", id, e);
            }
        }
        self.attribute_callback = None;
        self.identification_callback = None;
        self.custom_command_callback = None;
    }
}

fn rejected(path: &AttributePath, cause: DataModelError) -> DataModelError {
    DataModelError::Failed(format!("update of {} rejected: {}", path, cause))
}
