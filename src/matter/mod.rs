//! The data model tree: node, endpoints, clusters, and their attributes,
//! commands and events.

pub mod attribute;
pub mod bridge;
pub mod cluster;
pub mod clusters;
pub mod command;
pub mod data_model;
pub mod device_types;
pub mod endpoint;
pub mod event;
pub mod node;
pub mod tlv;
pub mod value;

pub use attribute::{AttributeFlags, AttributeHandle, AttributePath, CallbackPhase, WriteStatus};
pub use cluster::{Cluster, ClusterFlags};
pub use command::{CommandFlags, CommandPath};
pub use data_model::{DataModel, SharedDataModel};
pub use endpoint::{Endpoint, EndpointFlags};
pub use node::{Node, WILDCARD_CLUSTER_ID, WILDCARD_ENDPOINT_ID};
pub use value::{AttrValue, ValueKind, ValueType};
