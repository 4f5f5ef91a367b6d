//! Attribute records.
//!
//! An attribute is either managed locally (the value lives here, with its
//! bounds and override callback) or managed by the protocol provider, in
//! which case only the header is kept and every value access has to go
//! through the [`ProtocolBridge`](crate::matter::bridge::ProtocolBridge).

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DataModelError, Result};
use crate::matter::value::{
    AttrValue, Bounds, BoundsCheck, ValueType, clamp_to_bounds, compare,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttributeFlags: u16 {
        const WRITABLE = 0x0001;
        const NONVOLATILE = 0x0002;
        const MIN_MAX = 0x0004;
        const MUST_USE_TIMED_WRITE = 0x0008;
        const EXTERNAL_STORAGE = 0x0010;
        const SINGLETON = 0x0020;
        const NULLABLE = 0x0040;
        const OVERRIDE = 0x0080;
        const DEFERRED = 0x0100;
        const MANAGED_INTERNALLY = 0x0200;
    }
}

/// Fully qualified attribute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePath {
    pub endpoint_id: u16,
    pub cluster_id: u32,
    pub attribute_id: u32,
}

impl AttributePath {
    pub const fn new(endpoint_id: u16, cluster_id: u32, attribute_id: u32) -> Self {
        Self {
            endpoint_id,
            cluster_id,
            attribute_id,
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X}/0x{:08X}/0x{:08X}",
            self.endpoint_id, self.cluster_id, self.attribute_id
        )
    }
}

/// Path plus the serial of the attribute it was issued for. A handle whose
/// serial no longer matches the attribute at its path is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeHandle {
    path: AttributePath,
    serial: u64,
}

impl AttributeHandle {
    pub fn path(&self) -> AttributePath {
        self.path
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    /// Before a new value is applied; an error vetoes the write.
    PreUpdate,
    /// After a new value has been applied.
    PostUpdate,
    /// Provider read of an overridden attribute; the callback fills the value.
    Read,
    /// Provider write of an overridden attribute.
    Write,
}

/// Write outcome when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Updated,
    /// The value equals the current one; nothing ran.
    Unchanged,
    /// Zero-length string or array; callbacks and persistence ran but the
    /// stored value was kept.
    Ignored,
}

/// Opaque application data attached to an endpoint.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Attribute callback. For `PreUpdate`/`PostUpdate` the value is a scratch
/// copy of the new value; for `Read` the callback writes the result into it.
pub type AttributeCallback = Arc<
    dyn Fn(CallbackPhase, &AttributePath, &mut AttrValue, Option<&UserData>) -> Result<()>
        + Send
        + Sync,
>;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

pub struct Attribute {
    id: u32,
    value_type: ValueType,
    flags: AttributeFlags,
    serial: u64,
    storage: AttributeStorage,
}

pub enum AttributeStorage {
    /// Value owned by the protocol provider.
    External,
    Local(LocalAttribute),
}

pub struct LocalAttribute {
    path: AttributePath,
    value: AttrValue,
    max_size: u16,
    bounds: Option<Bounds>,
    override_callback: Option<AttributeCallback>,
}

/// What a validated write has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WritePlan {
    Apply,
    Unchanged,
    IgnoreEmpty,
}

impl Attribute {
    /// `max_size` only matters for strings and arrays; it is raised to fit
    /// `initial` and capped at the encoding limit of the type.
    pub(crate) fn new(
        path: AttributePath,
        mut flags: AttributeFlags,
        initial: AttrValue,
        max_size: u16,
    ) -> Self {
        let value_type = initial.value_type();
        if value_type.nullable {
            flags |= AttributeFlags::NULLABLE;
        }
        let storage = if flags.contains(AttributeFlags::MANAGED_INTERNALLY) {
            AttributeStorage::External
        } else {
            let max_size = match value_type.kind.max_length() {
                Some(limit) => {
                    let wanted = usize::from(max_size).max(initial.len().unwrap_or(0));
                    u16::try_from(wanted.min(limit)).unwrap_or(u16::MAX)
                }
                None => 0,
            };
            AttributeStorage::Local(LocalAttribute {
                path,
                value: initial,
                max_size,
                bounds: None,
                override_callback: None,
            })
        };
        Self {
            id: path.attribute_id,
            value_type,
            flags,
            serial: next_serial(),
            storage,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn flags(&self) -> AttributeFlags {
        self.flags
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn storage(&self) -> &AttributeStorage {
        &self.storage
    }

    pub fn is_external(&self) -> bool {
        matches!(self.storage, AttributeStorage::External)
    }

    pub fn local(&self) -> Option<&LocalAttribute> {
        match &self.storage {
            AttributeStorage::Local(local) => Some(local),
            AttributeStorage::External => None,
        }
    }

    pub(crate) fn local_mut(&mut self) -> Option<&mut LocalAttribute> {
        match &mut self.storage {
            AttributeStorage::Local(local) => Some(local),
            AttributeStorage::External => None,
        }
    }

    pub(crate) fn handle_at(&self, endpoint_id: u16, cluster_id: u32) -> AttributeHandle {
        AttributeHandle {
            path: AttributePath::new(endpoint_id, cluster_id, self.id),
            serial: self.serial,
        }
    }

    fn local_or_unsupported(&mut self, what: &str) -> Result<&mut LocalAttribute> {
        let id = self.id;
        self.local_mut().ok_or_else(|| {
            DataModelError::NotSupported(format!(
                "{} on externally managed attribute 0x{:08X}",
                what, id
            ))
        })
    }

    /// Attach min/max bounds and clamp the current value into them.
    pub fn add_bounds(&mut self, min: AttrValue, max: AttrValue) -> Result<()> {
        let value_type = self.value_type;
        let bounds = Bounds::new(min, max)?;
        if bounds.min.kind() != value_type.kind {
            return Err(DataModelError::TypeMismatch {
                expected: value_type,
                actual: bounds.min.value_type(),
            });
        }
        let local = self.local_or_unsupported("bounds")?;
        clamp_to_bounds(&mut local.value, &bounds)?;
        local.bounds = Some(bounds);
        self.flags |= AttributeFlags::MIN_MAX;
        Ok(())
    }

    pub fn bounds(&self) -> Result<&Bounds> {
        self.local()
            .and_then(|local| local.bounds.as_ref())
            .ok_or_else(|| {
                DataModelError::InvalidArgument(format!(
                    "attribute 0x{:08X} has no bounds",
                    self.id
                ))
            })
    }

    pub fn set_override_callback(&mut self, callback: AttributeCallback) -> Result<()> {
        if self.value_type.kind.is_variable_length() {
            return Err(DataModelError::NotSupported(format!(
                "override callback for {} attribute 0x{:08X}",
                self.value_type.kind, self.id
            )));
        }
        let local = self.local_or_unsupported("override callback")?;
        local.override_callback = Some(callback);
        self.flags |= AttributeFlags::OVERRIDE;
        Ok(())
    }

    pub fn override_callback(&self) -> Option<&AttributeCallback> {
        self.local().and_then(|local| local.override_callback.as_ref())
    }

    /// Debounce persistence of this attribute. Only valid for nonvolatile
    /// attributes.
    pub fn set_deferred_persistence(&mut self) -> Result<()> {
        if !self.flags.contains(AttributeFlags::NONVOLATILE) {
            return Err(DataModelError::InvalidArgument(format!(
                "attribute 0x{:08X} is not nonvolatile",
                self.id
            )));
        }
        self.flags |= AttributeFlags::DEFERRED;
        Ok(())
    }

    /// Locally stored value; `None` for externally managed attributes.
    pub fn value(&self) -> Option<&AttrValue> {
        self.local().map(|local| &local.value)
    }
}

impl LocalAttribute {
    pub fn path(&self) -> AttributePath {
        self.path
    }

    pub fn value(&self) -> &AttrValue {
        &self.value
    }

    pub fn max_size(&self) -> u16 {
        self.max_size
    }

    pub fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }

    /// Validate a write: type, then bounds, then no-op, then capacity.
    pub(crate) fn plan_write(&self, value: &AttrValue) -> Result<WritePlan> {
        if value.value_type() != self.value.value_type() {
            return Err(DataModelError::TypeMismatch {
                expected: self.value.value_type(),
                actual: value.value_type(),
            });
        }
        if let Some(bounds) = &self.bounds {
            match compare(value, bounds) {
                BoundsCheck::Within => {}
                BoundsCheck::Below | BoundsCheck::Above => {
                    return Err(DataModelError::OutOfBounds(format!(
                        "{} outside [{}, {}] for {}",
                        value, bounds.min, bounds.max, self.path
                    )));
                }
                BoundsCheck::TypeMismatch => {
                    return Err(DataModelError::TypeMismatch {
                        expected: bounds.min.value_type(),
                        actual: value.value_type(),
                    });
                }
            }
        }
        if value.same_as(&self.value) {
            return Ok(WritePlan::Unchanged);
        }
        if value.kind().is_variable_length() && !value.is_null() {
            let len = value.len().unwrap_or(0);
            if len == 0 {
                return Ok(WritePlan::IgnoreEmpty);
            }
            if len > usize::from(self.max_size) {
                return Err(DataModelError::NoMemory(format!(
                    "{} bytes exceed max size {} of {}",
                    len, self.max_size, self.path
                )));
            }
        }
        Ok(WritePlan::Apply)
    }

    pub(crate) fn apply(&mut self, value: AttrValue) {
        debug!("Attribute {} updated: {} -> {}", self.path, self.value, value);
        self.value = value;
    }

    /// Replace the initial value with one loaded from storage, if it fits.
    pub(crate) fn restore(&mut self, stored: AttrValue) {
        if stored.value_type() != self.value.value_type() {
            warn!(
                "Ignoring stored value for {}: type {} does not match {}",
                self.path,
                stored.value_type(),
                self.value.value_type()
            );
            return;
        }
        if let Some(len) = stored.len()
            && len > usize::from(self.max_size)
        {
            warn!(
                "Ignoring stored value for {}: {} bytes exceed max size {}",
                self.path, len, self.max_size
            );
            return;
        }
        self.value = stored;
    }
}
