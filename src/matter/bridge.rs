//! Bridge to the protocol provider for externally managed attributes.
//!
//! Values of attributes flagged `MANAGED_INTERNALLY` live in the provider's
//! own storage. Reads go through the provider's read path and come back as a
//! TLV report container; writes are wrapped in a TLV write container and
//! submitted under the provider's stack lock, marked as internal so the
//! provider skips its access checks.

use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;

use crate::error::{DataModelError, Result};
use crate::matter::attribute::AttributePath;
use crate::matter::tlv;
use crate::matter::value::{AttrValue, ValueKind, ValueType};

/// The protocol stack's attribute access entry points.
pub trait AttributeProvider: Send + Sync {
    /// Encode the attribute at `path` as a read report container.
    fn read_attribute(&self, path: &AttributePath) -> Result<Vec<u8>>;

    /// Apply a write request container to the attribute at `path`.
    fn write_attribute(&self, path: &AttributePath, payload: &[u8], internal: bool) -> Result<()>;
}

#[derive(Clone)]
pub struct ProtocolBridge {
    provider: Arc<dyn AttributeProvider>,
    stack_lock: Arc<Mutex<()>>,
    buffer_size: usize,
}

impl ProtocolBridge {
    pub fn new(provider: Arc<dyn AttributeProvider>, buffer_size: usize) -> Self {
        Self {
            provider,
            stack_lock: Arc::new(Mutex::new(())),
            buffer_size,
        }
    }

    /// Share the lock the protocol stack itself holds while processing.
    pub fn with_stack_lock(mut self, stack_lock: Arc<Mutex<()>>) -> Self {
        self.stack_lock = stack_lock;
        self
    }

    pub fn stack_lock(&self) -> Arc<Mutex<()>> {
        self.stack_lock.clone()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn read_value(&self, path: &AttributePath, ty: ValueType) -> Result<AttrValue> {
        if ty.kind == ValueKind::Array {
            return Err(DataModelError::NotSupported(format!(
                "reading array attribute {} through the provider",
                path
            )));
        }
        let report = self.provider.read_attribute(path).map_err(|e| {
            error!("Provider read of {} failed: {}", path, e);
            DataModelError::Failed(format!("provider read of {}: {}", path, e))
        })?;
        let value = tlv::decode_attribute_report(&report, ty)?;
        debug!("Read {} from provider for {}", value, path);
        Ok(value)
    }

    pub fn write_value(&self, path: &AttributePath, value: &AttrValue) -> Result<()> {
        if value.kind() == ValueKind::Array {
            return Err(DataModelError::NotSupported(format!(
                "writing array attribute {} through the provider",
                path
            )));
        }
        let payload = tlv::encode_write_payload(value, self.buffer_size)?;
        let _guard = self.stack_lock.lock();
        self.provider
            .write_attribute(path, &payload, true)
            .map_err(|e| {
                error!("Provider write of {} failed: {}", path, e);
                DataModelError::Failed(format!("provider write of {}: {}", path, e))
            })
    }
}
