//! Endpoint: a numbered container of clusters describing one logical device.

use bitflags::bitflags;
use log::{debug, warn};

use crate::error::{DataModelError, Result};
use crate::matter::attribute::UserData;
use crate::matter::cluster::{Cluster, ClusterFlags};
use crate::matter::clusters::identify::{self, Identify, IdentifyType};
use crate::matter::device_types::DeviceType;
use crate::persistence::Persistence;

pub const MAX_DEVICE_TYPE_COUNT: usize = 16;
pub const MAX_SEMANTIC_TAG_COUNT: usize = 3;

/// Parent id of an endpoint that has no parent.
pub const INVALID_ENDPOINT_ID: u16 = 0xFFFF;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EndpointFlags: u8 {
        /// May be removed at runtime.
        const DESTROYABLE = 0x01;
        /// Bridged device endpoint.
        const BRIDGE = 0x02;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionPattern {
    #[default]
    FullFamily,
    Tree,
}

/// Descriptor cluster semantic tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticTag {
    pub mfg_code: Option<u16>,
    pub namespace_id: u8,
    pub tag: u8,
    pub label: Option<String>,
}

pub struct Endpoint {
    id: u16,
    flags: EndpointFlags,
    enabled: bool,
    device_types: heapless::Vec<DeviceType, MAX_DEVICE_TYPE_COUNT>,
    semantic_tags: heapless::Vec<SemanticTag, MAX_SEMANTIC_TAG_COUNT>,
    parent_endpoint_id: u16,
    composition_pattern: CompositionPattern,
    user_data: Option<UserData>,
    identify: Option<Identify>,
    clusters: Vec<Cluster>,
    persistence: Persistence,
}

impl Endpoint {
    pub(crate) fn new(
        id: u16,
        flags: EndpointFlags,
        user_data: Option<UserData>,
        enabled: bool,
        persistence: Persistence,
    ) -> Self {
        Self {
            id,
            flags,
            enabled,
            device_types: heapless::Vec::new(),
            semantic_tags: heapless::Vec::new(),
            parent_endpoint_id: INVALID_ENDPOINT_ID,
            composition_pattern: CompositionPattern::default(),
            user_data,
            identify: None,
            clusters: Vec::new(),
            persistence,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn flags(&self) -> EndpointFlags {
        self.flags
    }

    pub(crate) fn mark_destroyable(&mut self) {
        self.flags |= EndpointFlags::DESTROYABLE;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable the endpoint. The Identify object is created on first enable
    /// from the Identify cluster's IdentifyType attribute, then every
    /// cluster's delegate init callback runs.
    pub fn enable(&mut self) {
        self.enabled = true;
        if self.identify.is_none() {
            self.identify = self.build_identify();
        }
        for cluster in &self.clusters {
            cluster.run_delegate_init();
        }
        debug!("Endpoint 0x{:04X} enabled", self.id);
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        debug!("Endpoint 0x{:04X} disabled", self.id);
    }

    fn build_identify(&self) -> Option<Identify> {
        let cluster = self.cluster(identify::CLUSTER_ID)?;
        let raw = cluster
            .attribute(identify::IdentifyAttribute::IdentifyType as u32)
            .and_then(|a| a.value())
            .and_then(|v| v.as_i64());
        let identify_type = match raw.and_then(|v| u8::try_from(v).ok()) {
            Some(raw) => IdentifyType::from_repr(raw).unwrap_or_else(|| {
                warn!(
                    "Endpoint 0x{:04X}: unknown identify type {}, using None",
                    self.id, raw
                );
                IdentifyType::None
            }),
            None => IdentifyType::None,
        };
        Some(Identify::new(self.id, identify_type))
    }

    pub fn identify(&self) -> Option<&Identify> {
        self.identify.as_ref()
    }

    pub(crate) fn identify_mut(&mut self) -> Option<&mut Identify> {
        self.identify.as_mut()
    }

    // Clusters

    /// Create a cluster, or merge `flags` into the existing one with the same
    /// id. At least one of SERVER and CLIENT is required.
    pub fn create_cluster(&mut self, id: u32, flags: ClusterFlags) -> Result<&mut Cluster> {
        if !flags.intersects(ClusterFlags::SERVER | ClusterFlags::CLIENT) {
            return Err(DataModelError::InvalidArgument(format!(
                "cluster 0x{:08X} needs the server or client flag",
                id
            )));
        }
        if let Some(index) = self.clusters.iter().position(|c| c.id() == id) {
            debug!(
                "Cluster 0x{:08X} already exists on endpoint 0x{:04X}, merging flags",
                id, self.id
            );
            let cluster = &mut self.clusters[index];
            cluster.add_flags(flags);
            return Ok(cluster);
        }
        self.clusters
            .push(Cluster::new(self.id, id, flags, self.persistence.clone()));
        let last = self.clusters.len() - 1;
        Ok(&mut self.clusters[last])
    }

    pub fn cluster(&self, id: u32) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id() == id)
    }

    pub fn cluster_mut(&mut self, id: u32) -> Option<&mut Cluster> {
        self.clusters.iter_mut().find(|c| c.id() == id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    pub(crate) fn clusters_mut(&mut self) -> impl Iterator<Item = &mut Cluster> {
        self.clusters.iter_mut()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    // Descriptor data

    pub fn add_device_type(&mut self, device_type: DeviceType) -> Result<()> {
        self.device_types.push(device_type).map_err(|_| {
            DataModelError::NoMemory(format!(
                "endpoint 0x{:04X} already lists {} device types",
                self.id, MAX_DEVICE_TYPE_COUNT
            ))
        })
    }

    pub fn device_types(&self) -> &[DeviceType] {
        &self.device_types
    }

    pub fn device_type_at(&self, index: usize) -> Result<DeviceType> {
        self.device_types.get(index).copied().ok_or_else(|| {
            DataModelError::NotFound(format!(
                "device type #{} on endpoint 0x{:04X}",
                index, self.id
            ))
        })
    }

    pub fn parent_endpoint_id(&self) -> u16 {
        self.parent_endpoint_id
    }

    pub(crate) fn set_parent_endpoint_id(&mut self, parent: u16) {
        self.parent_endpoint_id = parent;
    }

    pub fn composition_pattern(&self) -> CompositionPattern {
        self.composition_pattern
    }

    pub fn set_composition_pattern(&mut self, pattern: CompositionPattern) {
        self.composition_pattern = pattern;
    }

    /// Replace the semantic tag list.
    pub fn set_semantic_tags(&mut self, tags: &[SemanticTag]) -> Result<()> {
        if tags.len() > MAX_SEMANTIC_TAG_COUNT {
            return Err(DataModelError::InvalidArgument(format!(
                "{} semantic tags given, at most {} allowed",
                tags.len(),
                MAX_SEMANTIC_TAG_COUNT
            )));
        }
        self.semantic_tags.clear();
        for tag in tags {
            // Length checked above.
            let _ = self.semantic_tags.push(tag.clone());
        }
        Ok(())
    }

    pub fn semantic_tags(&self) -> &[SemanticTag] {
        &self.semantic_tags
    }

    pub fn semantic_tag_at(&self, index: usize) -> Result<&SemanticTag> {
        self.semantic_tags.get(index).ok_or_else(|| {
            DataModelError::NotFound(format!(
                "semantic tag #{} on endpoint 0x{:04X}",
                index, self.id
            ))
        })
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    pub fn set_user_data(&mut self, user_data: Option<UserData>) {
        self.user_data = user_data;
    }

    /// Disable, destroy every cluster in order, drop the Identify object.
    pub(crate) fn destroy(mut self) {
        self.disable();
        for cluster in self.clusters.drain(..) {
            cluster.destroy();
        }
        self.identify = None;
        debug!("Destroyed endpoint 0x{:04X}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matter::attribute::AttributeFlags;
    use crate::matter::device_types::DEV_TYPE_ON_OFF_LIGHT;
    use crate::matter::value::AttrValue;
    use crate::persistence::MemoryKvStore;
    use crate::scheduler::ManualScheduler;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn endpoint() -> Endpoint {
        let persistence = Persistence::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(ManualScheduler::new()),
            Duration::ZERO,
        );
        Endpoint::new(1, EndpointFlags::empty(), None, false, persistence)
    }

    fn tag(tag: u8) -> SemanticTag {
        SemanticTag {
            mfg_code: None,
            namespace_id: 0x07,
            tag,
            label: None,
        }
    }

    #[test]
    fn test_create_cluster_requires_role() {
        let mut endpoint = endpoint();
        let err = endpoint.create_cluster(0x0006, ClusterFlags::empty()).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        assert_eq!(endpoint.cluster_count(), 0);
    }

    #[test]
    fn test_create_cluster_merges_flags() {
        let mut endpoint = endpoint();
        endpoint.create_cluster(0x0006, ClusterFlags::SERVER).unwrap();
        let cluster = endpoint.create_cluster(0x0006, ClusterFlags::CLIENT).unwrap();
        assert!(cluster.flags().contains(ClusterFlags::SERVER | ClusterFlags::CLIENT));
        assert_eq!(endpoint.cluster_count(), 1);
    }

    #[test]
    fn test_device_type_limit() {
        let mut endpoint = endpoint();
        for _ in 0..MAX_DEVICE_TYPE_COUNT {
            endpoint.add_device_type(DEV_TYPE_ON_OFF_LIGHT).unwrap();
        }
        let err = endpoint.add_device_type(DEV_TYPE_ON_OFF_LIGHT).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoMemory);
        assert_eq!(endpoint.device_type_at(0).unwrap(), DEV_TYPE_ON_OFF_LIGHT);
        assert!(endpoint.device_type_at(MAX_DEVICE_TYPE_COUNT).is_err());
    }

    #[test]
    fn test_semantic_tags() {
        let mut endpoint = endpoint();
        assert!(endpoint.set_semantic_tags(&[tag(1), tag(2), tag(3), tag(4)]).is_err());
        endpoint.set_semantic_tags(&[tag(1), tag(2)]).unwrap();
        assert_eq!(endpoint.semantic_tags().len(), 2);
        assert_eq!(endpoint.semantic_tag_at(1).unwrap().tag, 2);
        assert_eq!(
            endpoint.semantic_tag_at(2).unwrap_err().kind(),
            crate::error::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_enable_builds_identify_from_cluster() {
        let mut endpoint = endpoint();
        let cluster = endpoint
            .create_cluster(identify::CLUSTER_ID, ClusterFlags::SERVER)
            .unwrap();
        cluster.create_attribute(
            identify::IdentifyAttribute::IdentifyType as u32,
            AttributeFlags::empty(),
            AttrValue::enum8(IdentifyType::AudibleBeep as u8),
            0,
        );

        assert!(endpoint.identify().is_none());
        endpoint.enable();
        assert!(endpoint.is_enabled());
        assert_eq!(
            endpoint.identify().map(|i| i.identify_type()),
            Some(IdentifyType::AudibleBeep)
        );
    }

    #[test]
    fn test_enable_runs_delegate_init() {
        let mut endpoint = endpoint();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        endpoint
            .create_cluster(0x0006, ClusterFlags::SERVER)
            .unwrap()
            .set_delegate_and_init_callback(
                Arc::new(move |_: &crate::matter::cluster::Delegate, endpoint_id: u16| {
                    assert_eq!(endpoint_id, 1);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Arc::new(()),
            );

        endpoint.enable();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(endpoint.identify().is_none());
    }
}
