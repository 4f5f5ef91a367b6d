//! Cluster: the attributes, commands and events of one cluster instance on
//! one endpoint, plus the hooks the application registers for it.

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, error, warn};
use strum::{Display, EnumCount};

use crate::error::Result;
use crate::matter::attribute::{Attribute, AttributeFlags, AttributeHandle, AttributePath};
use crate::matter::command::{Command, CommandCallback, CommandFlags};
use crate::matter::event::Event;
use crate::matter::value::AttrValue;
use crate::persistence::Persistence;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClusterFlags: u8 {
        const INIT_FUNCTION = 0x01;
        const ATTRIBUTE_CHANGED_FUNCTION = 0x02;
        const SHUTDOWN_FUNCTION = 0x04;
        const PRE_ATTRIBUTE_CHANGED_FUNCTION = 0x08;
        const SERVER = 0x10;
        const CLIENT = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, Display)]
pub enum ClusterFunctionKind {
    Init,
    AttributeChanged,
    Shutdown,
    PreAttributeChanged,
}

impl ClusterFunctionKind {
    pub fn flag(self) -> ClusterFlags {
        match self {
            Self::Init => ClusterFlags::INIT_FUNCTION,
            Self::AttributeChanged => ClusterFlags::ATTRIBUTE_CHANGED_FUNCTION,
            Self::Shutdown => ClusterFlags::SHUTDOWN_FUNCTION,
            Self::PreAttributeChanged => ClusterFlags::PRE_ATTRIBUTE_CHANGED_FUNCTION,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Called with the endpoint id.
pub type InitFunction = Arc<dyn Fn(u16) + Send + Sync>;
pub type ShutdownFunction = Arc<dyn Fn(u16) + Send + Sync>;
pub type AttributeChangedFunction = Arc<dyn Fn(&AttributePath, &AttrValue) + Send + Sync>;
/// An error rejects the pending attribute change.
pub type PreAttributeChangedFunction =
    Arc<dyn Fn(&AttributePath, &AttrValue) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub enum ClusterFunction {
    Init(InitFunction),
    AttributeChanged(AttributeChangedFunction),
    Shutdown(ShutdownFunction),
    PreAttributeChanged(PreAttributeChangedFunction),
}

impl ClusterFunction {
    pub fn kind(&self) -> ClusterFunctionKind {
        match self {
            Self::Init(_) => ClusterFunctionKind::Init,
            Self::AttributeChanged(_) => ClusterFunctionKind::AttributeChanged,
            Self::Shutdown(_) => ClusterFunctionKind::Shutdown,
            Self::PreAttributeChanged(_) => ClusterFunctionKind::PreAttributeChanged,
        }
    }
}

/// Application object implementing a cluster's server logic.
pub type Delegate = Arc<dyn Any + Send + Sync>;
pub type DelegateInitCallback = Arc<dyn Fn(&Delegate, u16) + Send + Sync>;
pub type PluginServerInitCallback = Arc<dyn Fn() + Send + Sync>;
/// Called once at node start to attach bounds to the cluster's attributes.
pub type AddBoundsCallback = Arc<dyn Fn(&mut Cluster) + Send + Sync>;

pub struct Cluster {
    id: u32,
    endpoint_id: u16,
    flags: ClusterFlags,
    data_version: u32,
    functions: [Option<ClusterFunction>; ClusterFunctionKind::COUNT],
    delegate: Option<Delegate>,
    delegate_init_callback: Option<DelegateInitCallback>,
    plugin_server_init_callback: Option<PluginServerInitCallback>,
    add_bounds_callback: Option<AddBoundsCallback>,
    attributes: Vec<Attribute>,
    commands: Vec<Command>,
    events: Vec<Event>,
    persistence: Persistence,
}

impl Cluster {
    pub(crate) fn new(
        endpoint_id: u16,
        id: u32,
        flags: ClusterFlags,
        persistence: Persistence,
    ) -> Self {
        Self {
            id,
            endpoint_id,
            flags,
            data_version: rand::random(),
            functions: std::array::from_fn(|_| None),
            delegate: None,
            delegate_init_callback: None,
            plugin_server_init_callback: None,
            add_bounds_callback: None,
            attributes: Vec::new(),
            commands: Vec::new(),
            events: Vec::new(),
            persistence,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn endpoint_id(&self) -> u16 {
        self.endpoint_id
    }

    pub fn flags(&self) -> ClusterFlags {
        self.flags
    }

    pub(crate) fn add_flags(&mut self, flags: ClusterFlags) {
        self.flags |= flags;
    }

    pub fn data_version(&self) -> u32 {
        self.data_version
    }

    pub fn increase_data_version(&mut self) {
        self.data_version = self.data_version.wrapping_add(1);
    }

    // Attributes

    /// Create an attribute, or return the handle of the existing one with
    /// the same id. Nonvolatile attributes start from their stored value when
    /// one exists; otherwise the initial value is stored.
    pub fn create_attribute(
        &mut self,
        id: u32,
        flags: AttributeFlags,
        initial: AttrValue,
        max_size: u16,
    ) -> AttributeHandle {
        if let Some(existing) = self.attributes.iter().find(|a| a.id() == id) {
            warn!(
                "Attribute 0x{:08X} already exists on cluster 0x{:08X} of endpoint 0x{:04X}",
                id, self.id, self.endpoint_id
            );
            return existing.handle_at(self.endpoint_id, self.id);
        }

        let path = AttributePath::new(self.endpoint_id, self.id, id);
        let mut attribute = Attribute::new(path, flags, initial, max_size);
        if flags.contains(AttributeFlags::NONVOLATILE)
            && let Some(local) = attribute.local_mut()
        {
            match self.persistence.load_value(&path) {
                Ok(Some(stored)) => {
                    debug!("Restored {} for {}", stored, path);
                    local.restore(stored);
                }
                Ok(None) => {
                    if let Err(e) = self.persistence.store_value(&path, local.value()) {
                        warn!("Failed to store initial value for {}: {}", path, e);
                    }
                }
                Err(e) => warn!("Failed to load stored value for {}: {}", path, e),
            }
        }

        let handle = attribute.handle_at(self.endpoint_id, self.id);
        self.attributes.push(attribute);
        handle
    }

    pub fn attribute(&self, id: u32) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.id() == id)
    }

    pub fn attribute_mut(&mut self, id: u32) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.id() == id)
    }

    pub fn attribute_handle(&self, id: u32) -> Option<AttributeHandle> {
        self.attribute(id)
            .map(|a| a.handle_at(self.endpoint_id, self.id))
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    // Commands

    /// Create a command, or return the existing one with the same id whose
    /// flags overlap `flags`.
    pub fn create_command(
        &mut self,
        id: u32,
        flags: CommandFlags,
        callback: Option<CommandCallback>,
    ) -> &mut Command {
        if let Some(index) = self
            .commands
            .iter()
            .position(|c| c.id() == id && c.flags().intersects(flags))
        {
            warn!(
                "Command 0x{:08X} already exists on cluster 0x{:08X} of endpoint 0x{:04X}",
                id, self.id, self.endpoint_id
            );
            return &mut self.commands[index];
        }
        self.commands.push(Command::new(id, flags, callback));
        let last = self.commands.len() - 1;
        &mut self.commands[last]
    }

    pub fn command(&self, id: u32) -> Option<&Command> {
        self.commands.iter().find(|c| c.id() == id)
    }

    /// Command with `id` whose flags overlap `mask` (accepted vs generated).
    pub fn command_with_flags(&self, id: u32, mask: CommandFlags) -> Option<&Command> {
        self.commands
            .iter()
            .find(|c| c.id() == id && c.flags().intersects(mask))
    }

    pub fn command_with_flags_mut(&mut self, id: u32, mask: CommandFlags) -> Option<&mut Command> {
        self.commands
            .iter_mut()
            .find(|c| c.id() == id && c.flags().intersects(mask))
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    // Events

    pub fn create_event(&mut self, id: u32) -> Event {
        if let Some(existing) = self.event(id) {
            warn!(
                "Event 0x{:08X} already exists on cluster 0x{:08X} of endpoint 0x{:04X}",
                id, self.id, self.endpoint_id
            );
            return existing;
        }
        let event = Event::new(id);
        self.events.push(event);
        event
    }

    pub fn event(&self, id: u32) -> Option<Event> {
        self.events.iter().copied().find(|e| e.id() == id)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    // Hooks

    pub fn add_function(&mut self, function: ClusterFunction) {
        let kind = function.kind();
        self.functions[kind.slot()] = Some(function);
        self.flags |= kind.flag();
    }

    pub fn add_functions(&mut self, functions: impl IntoIterator<Item = ClusterFunction>) {
        for function in functions {
            self.add_function(function);
        }
    }

    /// Registered function of `kind`; `None` unless its flag bit is set.
    pub fn function(&self, kind: ClusterFunctionKind) -> Option<&ClusterFunction> {
        if !self.flags.contains(kind.flag()) {
            return None;
        }
        self.functions[kind.slot()].as_ref()
    }

    pub fn set_init_and_shutdown_callbacks(
        &mut self,
        init: Option<InitFunction>,
        shutdown: Option<ShutdownFunction>,
    ) {
        if let Some(init) = init {
            self.add_function(ClusterFunction::Init(init));
        }
        if let Some(shutdown) = shutdown {
            self.add_function(ClusterFunction::Shutdown(shutdown));
        }
    }

    pub(crate) fn pre_attribute_changed_function(&self) -> Option<PreAttributeChangedFunction> {
        match self.function(ClusterFunctionKind::PreAttributeChanged) {
            Some(ClusterFunction::PreAttributeChanged(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub(crate) fn attribute_changed_function(&self) -> Option<AttributeChangedFunction> {
        match self.function(ClusterFunctionKind::AttributeChanged) {
            Some(ClusterFunction::AttributeChanged(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn set_delegate_and_init_callback(
        &mut self,
        callback: DelegateInitCallback,
        delegate: Delegate,
    ) {
        self.delegate_init_callback = Some(callback);
        self.delegate = Some(delegate);
    }

    pub fn delegate(&self) -> Option<&Delegate> {
        self.delegate.as_ref()
    }

    pub fn delegate_init_callback(&self) -> Option<&DelegateInitCallback> {
        self.delegate_init_callback.as_ref()
    }

    pub fn set_plugin_server_init_callback(&mut self, callback: PluginServerInitCallback) {
        self.plugin_server_init_callback = Some(callback);
    }

    pub fn plugin_server_init_callback(&self) -> Option<&PluginServerInitCallback> {
        self.plugin_server_init_callback.as_ref()
    }

    pub fn set_add_bounds_callback(&mut self, callback: AddBoundsCallback) {
        self.add_bounds_callback = Some(callback);
    }

    pub fn add_bounds_callback(&self) -> Option<&AddBoundsCallback> {
        self.add_bounds_callback.as_ref()
    }

    /// Node start: plugin init, then bounds, then the init function.
    pub(crate) fn run_start_hooks(&mut self) {
        if let Some(plugin_init) = self.plugin_server_init_callback.clone() {
            plugin_init();
        }
        if let Some(add_bounds) = self.add_bounds_callback.clone() {
            add_bounds(self);
        }
        if let Some(ClusterFunction::Init(init)) = self.function(ClusterFunctionKind::Init) {
            init(self.endpoint_id);
        }
    }

    pub(crate) fn run_delegate_init(&self) {
        if let (Some(callback), Some(delegate)) = (&self.delegate_init_callback, &self.delegate) {
            callback(delegate, self.endpoint_id);
        }
    }

    /// Tear down: shutdown function, commands, attributes (stored copies and
    /// pending deferred writes included), events.
    pub(crate) fn destroy(mut self) {
        if let Some(ClusterFunction::Shutdown(shutdown)) =
            self.function(ClusterFunctionKind::Shutdown)
        {
            shutdown(self.endpoint_id);
        }
        self.commands.clear();
        for attribute in self.attributes.drain(..) {
            let handle = attribute.handle_at(self.endpoint_id, self.id);
            self.persistence.cancel_deferred(&handle);
            if attribute.flags().contains(AttributeFlags::NONVOLATILE)
                && !attribute.is_external()
                && let Err(e) = self.persistence.erase_value(&handle.path())
            {
                error!("Failed to erase stored value for {}: {}", handle.path(), e);
            }
        }
        self.events.clear();
        debug!(
            "Destroyed cluster 0x{:08X} on endpoint 0x{:04X}",
            self.id, self.endpoint_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryKvStore;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const LEVEL_CONTROL: u32 = 0x0008;

    fn persistence(store: Arc<MemoryKvStore>) -> Persistence {
        Persistence::new(store, Arc::new(ManualScheduler::new()), Duration::ZERO)
    }

    fn cluster() -> (Cluster, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        let cluster =
            Cluster::new(1, LEVEL_CONTROL, ClusterFlags::SERVER, persistence(store.clone()));
        (cluster, store)
    }

    #[test]
    fn test_create_attribute_is_idempotent() {
        let (mut cluster, _) = cluster();
        let first =
            cluster.create_attribute(0x0000, AttributeFlags::empty(), AttrValue::uint8(1), 0);
        let second =
            cluster.create_attribute(0x0000, AttributeFlags::WRITABLE, AttrValue::uint8(9), 0);
        assert_eq!(first, second);
        assert_eq!(cluster.attribute_count(), 1);
        assert_eq!(
            cluster.attribute(0x0000).unwrap().value(),
            Some(&AttrValue::uint8(1))
        );
    }

    #[test]
    fn test_nonvolatile_initial_value_is_stored() {
        let (mut cluster, store) = cluster();
        cluster.create_attribute(0x0000, AttributeFlags::NONVOLATILE, AttrValue::uint8(3), 0);
        cluster.create_attribute(0x0001, AttributeFlags::empty(), AttrValue::uint8(4), 0);

        assert_eq!(
            cluster
                .persistence
                .load_value(&AttributePath::new(1, LEVEL_CONTROL, 0x0000))
                .unwrap(),
            Some(AttrValue::uint8(3))
        );
        assert!(!store.contains("ep_1", "8:1"));
    }

    #[test]
    fn test_nonvolatile_attribute_restores_stored_value() {
        let store = Arc::new(MemoryKvStore::new());
        let persistence = persistence(store.clone());
        persistence
            .store_value(&AttributePath::new(1, LEVEL_CONTROL, 0x0000), &AttrValue::uint8(42))
            .unwrap();

        let mut cluster = Cluster::new(1, LEVEL_CONTROL, ClusterFlags::SERVER, persistence);
        cluster.create_attribute(0x0000, AttributeFlags::NONVOLATILE, AttrValue::uint8(0), 0);
        cluster.create_attribute(0x0001, AttributeFlags::NONVOLATILE, AttrValue::uint8(5), 0);
        assert_eq!(cluster.attribute(0x0000).unwrap().value(), Some(&AttrValue::uint8(42)));
        assert_eq!(cluster.attribute(0x0001).unwrap().value(), Some(&AttrValue::uint8(5)));
    }

    #[test]
    fn test_commands_keyed_by_id_and_flags() {
        let (mut cluster, _) = cluster();
        cluster.create_command(0x00, CommandFlags::ACCEPTED, None);
        cluster.create_command(0x00, CommandFlags::GENERATED, None);
        cluster.create_command(0x00, CommandFlags::ACCEPTED, None);
        assert_eq!(cluster.commands().count(), 2);
        assert!(cluster.command_with_flags(0x00, CommandFlags::GENERATED).is_some());
        assert!(cluster.command_with_flags(0x01, CommandFlags::ACCEPTED).is_none());
    }

    #[test]
    fn test_events_are_idempotent() {
        let (mut cluster, _) = cluster();
        cluster.create_event(0x00);
        cluster.create_event(0x00);
        cluster.create_event(0x01);
        assert_eq!(cluster.events().count(), 2);
        assert_eq!(cluster.event(0x01).map(|e| e.id()), Some(0x01));
    }

    #[test]
    fn test_function_table() {
        let (mut cluster, _) = cluster();
        assert!(cluster.function(ClusterFunctionKind::AttributeChanged).is_none());

        cluster.add_function(ClusterFunction::AttributeChanged(Arc::new(
            |_: &AttributePath, _: &AttrValue| {},
        )));
        assert!(cluster.flags().contains(ClusterFlags::ATTRIBUTE_CHANGED_FUNCTION));
        assert_eq!(
            cluster
                .function(ClusterFunctionKind::AttributeChanged)
                .map(|f| f.kind()),
            Some(ClusterFunctionKind::AttributeChanged)
        );
        assert!(cluster.function(ClusterFunctionKind::Shutdown).is_none());
        assert!(cluster.attribute_changed_function().is_some());
        assert!(cluster.pre_attribute_changed_function().is_none());
    }

    #[test]
    fn test_start_hooks_run_in_order() {
        let (mut cluster, _) = cluster();
        cluster.create_attribute(0x0000, AttributeFlags::empty(), AttrValue::uint8(0), 0);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o = order.clone();
        cluster.set_plugin_server_init_callback(Arc::new(move || o.lock().push("plugin")));
        let o = order.clone();
        cluster.set_add_bounds_callback(Arc::new(move |c: &mut Cluster| {
            o.lock().push("bounds");
            c.attribute_mut(0x0000)
                .unwrap()
                .add_bounds(AttrValue::uint8(1), AttrValue::uint8(254))
                .unwrap();
        }));
        let o = order.clone();
        cluster.set_init_and_shutdown_callbacks(
            Some(Arc::new(move |_: u16| o.lock().push("init"))),
            None,
        );

        cluster.run_start_hooks();
        assert_eq!(*order.lock(), vec!["plugin", "bounds", "init"]);
        assert_eq!(cluster.attribute(0x0000).unwrap().value(), Some(&AttrValue::uint8(1)));
    }

    #[test]
    fn test_destroy_erases_stored_values_and_runs_shutdown() {
        let (mut cluster, store) = cluster();
        cluster.create_attribute(0x0000, AttributeFlags::NONVOLATILE, AttrValue::uint8(3), 0);
        cluster
            .persistence
            .store_value(&AttributePath::new(1, LEVEL_CONTROL, 0x0000), &AttrValue::uint8(3))
            .unwrap();
        assert!(store.contains("ep_1", "8:0"));

        let shutdowns = Arc::new(AtomicUsize::new(0));
        let counter = shutdowns.clone();
        cluster.set_init_and_shutdown_callbacks(
            None,
            Some(Arc::new(move |_: u16| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        cluster.destroy();
        assert!(!store.contains("ep_1", "8:0"));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
