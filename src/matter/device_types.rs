//! Device type identifiers.
//!
//! An endpoint lists the device types it implements (id plus revision); the
//! constants below cover the devices the bundled cluster helpers build.

/// Device type id and revision as listed in an endpoint's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceType {
    pub id: u32,
    pub version: u8,
}

impl DeviceType {
    pub const fn new(id: u32, version: u8) -> Self {
        Self { id, version }
    }
}

/// Matter Root Node device type
///
/// Device Type ID: 0x0016 (22 decimal)
/// Device Type Revision: 3
///
/// Present exactly once, on endpoint 0.
pub const DEV_TYPE_ROOT_NODE: DeviceType = DeviceType::new(0x0016, 3);

/// Matter Aggregator device type (for bridge root)
///
/// Device Type ID: 0x000E (14 decimal)
/// Device Type Revision: 1
pub const DEV_TYPE_AGGREGATOR: DeviceType = DeviceType::new(0x000E, 1);

/// Matter Bridged Node device type
///
/// Device Type ID: 0x0013 (19 decimal)
/// Device Type Revision: 1
///
/// Added to bridged device endpoints alongside their functional device type.
pub const DEV_TYPE_BRIDGED_NODE: DeviceType = DeviceType::new(0x0013, 1);

/// Matter On/Off Light device type
///
/// Device Type ID: 0x0100 (256 decimal)
/// Device Type Revision: 2
///
/// Required clusters:
/// - Identify (0x0003)
/// - OnOff (0x0006)
pub const DEV_TYPE_ON_OFF_LIGHT: DeviceType = DeviceType::new(0x0100, 2);

/// Matter Dimmable Light device type
///
/// Device Type ID: 0x0101 (257 decimal)
/// Device Type Revision: 2
///
/// Required clusters:
/// - Identify (0x0003)
/// - OnOff (0x0006)
/// - LevelControl (0x0008)
pub const DEV_TYPE_DIMMABLE_LIGHT: DeviceType = DeviceType::new(0x0101, 2);

/// Matter On/Off Plug-in Unit device type
///
/// Device Type ID: 0x010A (266 decimal)
/// Device Type Revision: 2
pub const DEV_TYPE_ON_OFF_PLUG_IN_UNIT: DeviceType = DeviceType::new(0x010A, 2);
