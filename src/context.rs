//! Process-wide registry and per-operation context.
//!
//! The singletons of a running editor process are bundled in a [`Registry`]
//! that is created once at startup and passed down explicitly; nothing in
//! this crate reaches for ambient global state. A [`Context`] is the view a
//! single operation gets: the registry plus, when one is acting, the
//! client on whose behalf it runs.

use std::rc::Rc;

use crate::client::{Client, ClientManager};
use crate::command::CommandManager;
use crate::event_loop::EventLoop;

/// The process-wide singleton bundle.
///
/// Cheap to clone; clones share the same singletons. Fields drop in
/// declaration order, so the last singleton created is the first torn
/// down.
#[derive(Clone)]
pub struct Registry {
    pub clients: Rc<ClientManager>,
    pub commands: Rc<CommandManager>,
    pub event_loop: Rc<EventLoop>,
}

impl Registry {
    pub fn new() -> Registry {
        let event_loop = Rc::new(EventLoop::new());
        let commands = Rc::new(CommandManager::new());
        let clients = Rc::new(ClientManager::new());
        Registry {
            clients,
            commands,
            event_loop,
        }
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

/// Execution context for a single operation.
pub struct Context {
    registry: Registry,
    client: Option<Rc<Client>>,
}

impl Context {
    /// A context with no acting client, as used for commands arriving
    /// through one-shot introductions.
    pub fn empty(registry: &Registry) -> Context {
        Context {
            registry: registry.clone(),
            client: None,
        }
    }

    pub fn with_client(registry: &Registry, client: &Rc<Client>) -> Context {
        Context {
            registry: registry.clone(),
            client: Some(client.clone()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client(&self) -> Option<&Rc<Client>> {
        self.client.as_ref()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }
}
