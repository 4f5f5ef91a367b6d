//! On/Off cluster (0x0006).

use strum::FromRepr;

use crate::error::Result;
use crate::matter::attribute::AttributeFlags;
use crate::matter::cluster::{Cluster, ClusterFlags};
use crate::matter::command::{CommandCallback, CommandFlags};
use crate::matter::endpoint::Endpoint;
use crate::matter::value::AttrValue;

/// Matter Cluster ID for OnOff
pub const CLUSTER_ID: u32 = 0x0006;

/// Cluster revision
pub const CLUSTER_REVISION: u16 = 6;

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum OnOffAttribute {
    OnOff = 0x0000,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum OnOffCommand {
    Off = 0x00,
    On = 0x01,
    Toggle = 0x02,
}

/// Add the On/Off cluster. `handler` serves the Off, On and Toggle commands.
pub fn create(
    endpoint: &mut Endpoint,
    flags: ClusterFlags,
    on: bool,
    handler: Option<CommandCallback>,
) -> Result<&mut Cluster> {
    let cluster = endpoint.create_cluster(CLUSTER_ID, flags)?;
    cluster.create_attribute(
        OnOffAttribute::OnOff as u32,
        AttributeFlags::NONVOLATILE,
        AttrValue::boolean(on),
        0,
    );
    for command in [OnOffCommand::Off, OnOffCommand::On, OnOffCommand::Toggle] {
        cluster.create_command(command as u32, CommandFlags::ACCEPTED, handler.clone());
    }
    Ok(cluster)
}
