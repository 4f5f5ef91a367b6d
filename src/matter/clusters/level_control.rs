//! Level Control cluster (0x0008).
//!
//! CurrentLevel is nullable and bounded to `MIN_LEVEL..=MAX_LEVEL`; the
//! bounds are attached by the cluster's add-bounds callback when the node
//! starts, which also clamps a restored value that drifted out of range.

use std::sync::Arc;

use log::warn;
use strum::FromRepr;

use crate::error::Result;
use crate::matter::attribute::AttributeFlags;
use crate::matter::cluster::{Cluster, ClusterFlags};
use crate::matter::command::CommandFlags;
use crate::matter::endpoint::Endpoint;
use crate::matter::value::AttrValue;

/// Matter Cluster ID for LevelControl
pub const CLUSTER_ID: u32 = 0x0008;

/// Cluster revision
pub const CLUSTER_REVISION: u16 = 5;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 254;

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum LevelControlAttribute {
    CurrentLevel = 0x0000,
    MinLevel = 0x0002,
    MaxLevel = 0x0003,
    OnLevel = 0x0011,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum LevelControlCommand {
    MoveToLevel = 0x00,
    Move = 0x01,
    Step = 0x02,
    Stop = 0x03,
    MoveToLevelWithOnOff = 0x04,
}

fn add_bounds(cluster: &mut Cluster) {
    let Some(attribute) = cluster.attribute_mut(LevelControlAttribute::CurrentLevel as u32) else {
        return;
    };
    if let Err(e) = attribute.add_bounds(
        AttrValue::nullable_uint8(Some(MIN_LEVEL)),
        AttrValue::nullable_uint8(Some(MAX_LEVEL)),
    ) {
        warn!("Failed to bound CurrentLevel: {}", e);
    }
}

pub fn create(
    endpoint: &mut Endpoint,
    flags: ClusterFlags,
    current_level: Option<u8>,
) -> Result<&mut Cluster> {
    let cluster = endpoint.create_cluster(CLUSTER_ID, flags)?;
    cluster.create_attribute(
        LevelControlAttribute::CurrentLevel as u32,
        AttributeFlags::NONVOLATILE | AttributeFlags::WRITABLE,
        AttrValue::nullable_uint8(current_level),
        0,
    );
    cluster.create_attribute(
        LevelControlAttribute::MinLevel as u32,
        AttributeFlags::empty(),
        AttrValue::uint8(MIN_LEVEL),
        0,
    );
    cluster.create_attribute(
        LevelControlAttribute::MaxLevel as u32,
        AttributeFlags::empty(),
        AttrValue::uint8(MAX_LEVEL),
        0,
    );
    cluster.create_attribute(
        LevelControlAttribute::OnLevel as u32,
        AttributeFlags::WRITABLE,
        AttrValue::nullable_uint8(None),
        0,
    );
    for command in [
        LevelControlCommand::MoveToLevel,
        LevelControlCommand::Move,
        LevelControlCommand::Step,
        LevelControlCommand::Stop,
        LevelControlCommand::MoveToLevelWithOnOff,
    ] {
        cluster.create_command(command as u32, CommandFlags::ACCEPTED, None);
    }
    cluster.set_add_bounds_callback(Arc::new(add_bounds));
    Ok(cluster)
}
