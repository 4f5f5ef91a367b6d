//! Identify cluster (0x0003) and the per-endpoint identify state.

use std::sync::Arc;

use log::info;
use strum::FromRepr;

use crate::error::Result;
use crate::matter::attribute::AttributeFlags;
use crate::matter::cluster::{Cluster, ClusterFlags};
use crate::matter::command::CommandFlags;
use crate::matter::endpoint::Endpoint;
use crate::matter::value::AttrValue;

/// Matter Cluster ID for Identify
pub const CLUSTER_ID: u32 = 0x0003;

/// Cluster revision
pub const CLUSTER_REVISION: u16 = 4;

/// Attribute IDs for the Identify cluster
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum IdentifyAttribute {
    /// Remaining identify time in seconds
    IdentifyTime = 0x0000,
    /// How the device identifies itself
    IdentifyType = 0x0001,
}

/// Command IDs for the Identify cluster
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum IdentifyCommand {
    Identify = 0x00,
    TriggerEffect = 0x40,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u8)]
pub enum IdentifyType {
    None = 0x00,
    LightOutput = 0x01,
    VisibleIndicator = 0x02,
    AudibleBeep = 0x03,
    Display = 0x04,
    Actuator = 0x05,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdentifyAction {
    Start,
    Stop,
    Effect { effect: u8, variant: u8 },
}

/// Application hook that drives the physical identification (blink, beep).
pub type IdentificationCallback = Arc<dyn Fn(IdentifyAction, u16, IdentifyType) + Send + Sync>;

/// Identify state of one endpoint, created when the endpoint is enabled.
#[derive(Clone, Debug)]
pub struct Identify {
    endpoint_id: u16,
    identify_type: IdentifyType,
    active: bool,
}

impl Identify {
    pub(crate) fn new(endpoint_id: u16, identify_type: IdentifyType) -> Self {
        Self {
            endpoint_id,
            identify_type,
            active: false,
        }
    }

    pub fn endpoint_id(&self) -> u16 {
        self.endpoint_id
    }

    pub fn identify_type(&self) -> IdentifyType {
        self.identify_type
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn apply(&mut self, action: IdentifyAction) {
        match action {
            IdentifyAction::Start => self.active = true,
            IdentifyAction::Stop => self.active = false,
            IdentifyAction::Effect { effect, variant } => {
                info!(
                    "Endpoint 0x{:04X}: identify effect 0x{:02X} variant 0x{:02X}",
                    self.endpoint_id, effect, variant
                );
            }
        }
    }
}

/// Add the Identify cluster with its mandatory attributes and commands.
pub fn create(
    endpoint: &mut Endpoint,
    flags: ClusterFlags,
    identify_type: IdentifyType,
) -> Result<&mut Cluster> {
    let cluster = endpoint.create_cluster(CLUSTER_ID, flags)?;
    cluster.create_attribute(
        IdentifyAttribute::IdentifyTime as u32,
        AttributeFlags::WRITABLE,
        AttrValue::uint16(0),
        0,
    );
    cluster.create_attribute(
        IdentifyAttribute::IdentifyType as u32,
        AttributeFlags::empty(),
        AttrValue::enum8(identify_type as u8),
        0,
    );
    cluster.create_command(IdentifyCommand::Identify as u32, CommandFlags::ACCEPTED, None);
    cluster.create_command(
        IdentifyCommand::TriggerEffect as u32,
        CommandFlags::ACCEPTED,
        None,
    );
    Ok(cluster)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_type_from_repr() {
        assert_eq!(IdentifyType::from_repr(2), Some(IdentifyType::VisibleIndicator));
        assert_eq!(IdentifyType::from_repr(9), None);
    }

    #[test]
    fn test_apply_actions() {
        let mut identify = Identify::new(1, IdentifyType::LightOutput);
        assert!(!identify.is_active());
        identify.apply(IdentifyAction::Start);
        assert!(identify.is_active());
        identify.apply(IdentifyAction::Effect {
            effect: 0x00,
            variant: 0x00,
        });
        assert!(identify.is_active());
        identify.apply(IdentifyAction::Stop);
        assert!(!identify.is_active());
    }
}
