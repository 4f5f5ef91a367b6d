//! Attribute and counter persistence.
//!
//! The data model talks to non-volatile storage through the [`KvStore`]
//! trait (namespace + key → bytes). [`Persistence`] maps attribute paths onto
//! that key space and implements deferred (debounced) writes on top of a
//! [`DeferredScheduler`].
//!
//! ## Key layout
//!
//! - attribute values: namespace `ep_<endpoint hex>`, key
//!   `<cluster hex>:<attribute hex>`, serde_json encoded [`AttrValue`]
//! - minimum unused endpoint id: namespace `dm_kvs`, key `min_uu_ep_id`
//!   (older installations kept it in namespace `node`)
//!
//! ## Deferred writes
//!
//! A deferred write stores the latest value in a pending table and arms a
//! timer for the attribute if none is armed yet. When the timer fires it
//! takes whatever value is pending at that moment, so a burst of writes ends
//! up as a single store operation. Cancelling drops both the timer and the
//! pending value; the timer task never touches the node graph.

mod file;
mod memory;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{DataModelError, Result};
use crate::matter::attribute::{AttributeHandle, AttributePath};
use crate::matter::value::AttrValue;
use crate::scheduler::DeferredScheduler;

pub const COUNTER_NAMESPACE: &str = "dm_kvs";
pub const LEGACY_COUNTER_NAMESPACE: &str = "node";
pub const MIN_UNUSED_ENDPOINT_ID_KEY: &str = "min_uu_ep_id";

/// Non-volatile key-value storage. Implementations synchronize internally.
pub trait KvStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Returns whether the key existed.
    fn erase(&self, namespace: &str, key: &str) -> Result<bool>;
}

pub fn attribute_namespace(endpoint_id: u16) -> String {
    format!("ep_{:x}", endpoint_id)
}

pub fn attribute_key(cluster_id: u32, attribute_id: u32) -> String {
    format!("{:x}:{:x}", cluster_id, attribute_id)
}

fn write_value(store: &dyn KvStore, path: &AttributePath, value: &AttrValue) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(
        &attribute_namespace(path.endpoint_id),
        &attribute_key(path.cluster_id, path.attribute_id),
        &bytes,
    )
}

type PendingWrites = Arc<Mutex<HashMap<AttributeHandle, AttrValue>>>;

/// Storage services shared by every level of the node tree.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn KvStore>,
    scheduler: Arc<dyn DeferredScheduler>,
    pending: PendingWrites,
    deferred_delay: Duration,
}

impl Persistence {
    pub fn new(
        store: Arc<dyn KvStore>,
        scheduler: Arc<dyn DeferredScheduler>,
        deferred_delay: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            pending: Arc::new(Mutex::new(HashMap::new())),
            deferred_delay,
        }
    }

    pub fn kv_store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn deferred_delay(&self) -> Duration {
        self.deferred_delay
    }

    /// Persisted value of an attribute. Undecodable entries are reported and
    /// treated as missing.
    pub fn load_value(&self, path: &AttributePath) -> Result<Option<AttrValue>> {
        let bytes = self.store.get(
            &attribute_namespace(path.endpoint_id),
            &attribute_key(path.cluster_id, path.attribute_id),
        )?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match serde_json::from_slice::<AttrValue>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Failed to decode stored value for {}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn store_value(&self, path: &AttributePath, value: &AttrValue) -> Result<()> {
        debug!("Storing {} for {}", value, path);
        write_value(self.store.as_ref(), path, value)
    }

    pub fn erase_value(&self, path: &AttributePath) -> Result<()> {
        self.store.erase(
            &attribute_namespace(path.endpoint_id),
            &attribute_key(path.cluster_id, path.attribute_id),
        )?;
        Ok(())
    }

    /// Queue `value` for storage once the deferred delay elapses.
    pub fn store_deferred(&self, handle: AttributeHandle, value: AttrValue) {
        self.pending.lock().insert(handle, value);
        if self.scheduler.is_pending(&handle) {
            return;
        }

        let store = self.store.clone();
        let pending = self.pending.clone();
        self.scheduler.schedule_once(
            handle,
            self.deferred_delay,
            Box::new(move || {
                let path = handle.path();
                let Some(value) = pending.lock().remove(&handle) else {
                    debug!("Deferred write for {} was cancelled", path);
                    return;
                };
                if let Err(e) = write_value(store.as_ref(), &path, &value) {
                    error!("Deferred write for {} failed: {}", path, e);
                }
            }),
        );
    }

    pub fn has_pending(&self, handle: &AttributeHandle) -> bool {
        self.pending.lock().contains_key(handle)
    }

    pub fn cancel_deferred(&self, handle: &AttributeHandle) {
        self.scheduler.cancel(handle);
        self.pending.lock().remove(handle);
    }

    /// Cancel every pending deferred write.
    pub fn cancel_all_deferred(&self) {
        let handles: Vec<AttributeHandle> = self.pending.lock().drain().map(|(h, _)| h).collect();
        for handle in handles {
            self.scheduler.cancel(&handle);
        }
    }

    pub fn read_u16(&self, namespace: &str, key: &str) -> Result<Option<u16>> {
        match self.store.get(namespace, key)? {
            None => Ok(None),
            Some(bytes) => {
                let raw: [u8; 2] = bytes.as_slice().try_into().map_err(|_| {
                    DataModelError::Failed(format!(
                        "{}/{} holds {} bytes, expected 2",
                        namespace,
                        key,
                        bytes.len()
                    ))
                })?;
                Ok(Some(u16::from_le_bytes(raw)))
            }
        }
    }

    pub fn write_u16(&self, namespace: &str, key: &str, value: u16) -> Result<()> {
        self.store.set(namespace, key, &value.to_le_bytes())
    }

    pub fn erase_key(&self, namespace: &str, key: &str) -> Result<bool> {
        self.store.erase(namespace, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matter::attribute::{Attribute, AttributeFlags};
    use crate::scheduler::ManualScheduler;

    fn setup() -> (Persistence, Arc<MemoryKvStore>, Arc<ManualScheduler>) {
        let store = Arc::new(MemoryKvStore::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let persistence = Persistence::new(
            store.clone(),
            scheduler.clone(),
            Duration::from_millis(3000),
        );
        (persistence, store, scheduler)
    }

    fn handle(path: AttributePath) -> AttributeHandle {
        Attribute::new(path, AttributeFlags::NONVOLATILE, AttrValue::uint8(0), 0)
            .handle_at(path.endpoint_id, path.cluster_id)
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(attribute_namespace(0x1A), "ep_1a");
        assert_eq!(attribute_key(0x0006, 0x4003), "6:4003");
    }

    #[test]
    fn test_value_round_trip_through_store() {
        let (persistence, store, _) = setup();
        let path = AttributePath::new(1, 0x0008, 0x0000);

        persistence
            .store_value(&path, &AttrValue::nullable_uint8(Some(77)))
            .unwrap();
        assert!(store.contains("ep_1", "8:0"));
        assert_eq!(
            persistence.load_value(&path).unwrap(),
            Some(AttrValue::nullable_uint8(Some(77)))
        );

        persistence.erase_value(&path).unwrap();
        assert_eq!(persistence.load_value(&path).unwrap(), None);
    }

    #[test]
    fn test_undecodable_value_is_a_miss() {
        let (persistence, store, _) = setup();
        store.set("ep_1", "8:0", b"not json").unwrap();
        let path = AttributePath::new(1, 0x0008, 0x0000);
        assert_eq!(persistence.load_value(&path).unwrap(), None);
    }

    #[test]
    fn test_deferred_writes_coalesce() {
        let (persistence, store, scheduler) = setup();
        let path = AttributePath::new(1, 0x0008, 0x0000);
        let handle = handle(path);

        for level in 1..=5u8 {
            persistence.store_deferred(handle, AttrValue::uint8(level));
        }
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(store.write_count(), 0);

        scheduler.fire_all();
        assert_eq!(store.write_count(), 1);
        assert_eq!(persistence.load_value(&path).unwrap(), Some(AttrValue::uint8(5)));
        assert!(!persistence.has_pending(&handle));
    }

    #[test]
    fn test_cancelled_deferred_write_never_lands() {
        let (persistence, store, scheduler) = setup();
        let path = AttributePath::new(2, 0x0006, 0x0000);
        let handle = handle(path);

        persistence.store_deferred(handle, AttrValue::uint8(1));
        persistence.cancel_deferred(&handle);
        assert_eq!(scheduler.fire_all(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_u16_counter() {
        let (persistence, store, _) = setup();
        assert_eq!(
            persistence
                .read_u16(COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY)
                .unwrap(),
            None
        );
        persistence
            .write_u16(COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY, 0x0102)
            .unwrap();
        assert_eq!(
            store.get(COUNTER_NAMESPACE, MIN_UNUSED_ENDPOINT_ID_KEY).unwrap(),
            Some(vec![0x02, 0x01])
        );

        store.set(COUNTER_NAMESPACE, "bad", &[1, 2, 3]).unwrap();
        assert!(persistence.read_u16(COUNTER_NAMESPACE, "bad").is_err());
    }
}
