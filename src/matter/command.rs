//! Command table entries and dispatch.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;

use crate::error::{DataModelError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandFlags: u8 {
        /// Routed to the node-level custom command handler.
        const CUSTOM = 0x01;
        /// Client to server.
        const ACCEPTED = 0x02;
        /// Server to client (responses).
        const GENERATED = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandPath {
    pub endpoint_id: u16,
    pub cluster_id: u32,
    pub command_id: u32,
}

impl CommandPath {
    pub const fn new(endpoint_id: u16, cluster_id: u32, command_id: u32) -> Self {
        Self {
            endpoint_id,
            cluster_id,
            command_id,
        }
    }
}

impl fmt::Display for CommandPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X}/0x{:08X}/cmd 0x{:08X}",
            self.endpoint_id, self.cluster_id, self.command_id
        )
    }
}

/// Command handler, called with the TLV encoded command fields.
pub type CommandCallback = Arc<dyn Fn(&CommandPath, &[u8]) -> Result<()> + Send + Sync>;

pub struct Command {
    id: u32,
    flags: CommandFlags,
    callback: Option<CommandCallback>,
    user_callback: Option<CommandCallback>,
}

impl Command {
    pub(crate) fn new(id: u32, flags: CommandFlags, callback: Option<CommandCallback>) -> Self {
        Self {
            id,
            flags,
            callback,
            user_callback: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn callback(&self) -> Option<&CommandCallback> {
        self.callback.as_ref()
    }

    pub fn user_callback(&self) -> Option<&CommandCallback> {
        self.user_callback.as_ref()
    }

    pub fn set_user_callback(&mut self, callback: CommandCallback) {
        self.user_callback = Some(callback);
    }

    /// Run the user callback when one is set, else the internal callback.
    pub fn dispatch(&self, path: &CommandPath, payload: &[u8]) -> Result<()> {
        debug!("Dispatching command {}", path);
        match self.user_callback.as_ref().or(self.callback.as_ref()) {
            Some(callback) => callback(path, payload),
            None => Err(DataModelError::NotSupported(format!(
                "command {} has no handler",
                path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> CommandCallback {
        let counter = counter.clone();
        Arc::new(move |_: &CommandPath, _: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_user_callback_takes_precedence() {
        let internal = Arc::new(AtomicUsize::new(0));
        let user = Arc::new(AtomicUsize::new(0));
        let path = CommandPath::new(1, 0x0006, 0x02);

        let mut command = Command::new(0x02, CommandFlags::ACCEPTED, Some(counting(&internal)));
        command.dispatch(&path, &[]).unwrap();
        assert_eq!(internal.load(Ordering::SeqCst), 1);

        command.set_user_callback(counting(&user));
        command.dispatch(&path, &[]).unwrap();
        assert_eq!(internal.load(Ordering::SeqCst), 1);
        assert_eq!(user.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let command = Command::new(0x00, CommandFlags::GENERATED, None);
        let err = command
            .dispatch(&CommandPath::new(1, 0x0006, 0x00), &[])
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotSupported);
    }
}
