//! Server-side clients and their manager.
//!
//! A [`Client`] binds a [`UserInterface`] (local or remote) to the editor.
//! This crate's concern ends at the narrow contract the transport needs:
//! clients own their UI, keep the environment shipped in the introduction
//! for spawned subshells, and queue decoded keys for the editing layer to
//! drain.

use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use crate::context::{Context, Registry};
use crate::id_map::IdMap;
use crate::keys::Key;
use crate::ui::UserInterface;

/// A connected client.
pub struct Client {
    name: String,
    ui: RefCell<Box<dyn UserInterface>>,
    env_vars: IdMap<String>,
    pending_keys: RefCell<Vec<Key>>,
}

impl Client {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Environment of the client process, used for subshells spawned on its
    /// behalf.
    pub fn env_vars(&self) -> &IdMap<String> {
        &self.env_vars
    }

    pub fn ui_mut(&self) -> RefMut<'_, dyn UserInterface> {
        RefMut::map(self.ui.borrow_mut(), |ui| ui.as_mut())
    }

    /// Keys received since the last drain, in arrival order.
    pub fn take_pending_keys(&self) -> Vec<Key> {
        std::mem::take(&mut *self.pending_keys.borrow_mut())
    }
}

/// Registry of connected clients.
pub struct ClientManager {
    clients: RefCell<Vec<Rc<Client>>>,
    next_client_id: Cell<usize>,
}

impl ClientManager {
    pub fn new() -> ClientManager {
        ClientManager {
            clients: RefCell::new(Vec::new()),
            next_client_id: Cell::new(0),
        }
    }

    /// Bind a UI to a new client.
    ///
    /// Installs the key callback feeding the client's pending-key queue and
    /// runs `init_command` in the client's context, logging rather than
    /// propagating its errors.
    pub fn create_client(
        &self,
        ui: Box<dyn UserInterface>,
        env_vars: IdMap<String>,
        init_command: &str,
        registry: &Registry,
    ) -> Rc<Client> {
        let id = self.next_client_id.get();
        self.next_client_id.set(id + 1);
        let name = format!("client{id}");

        let client = Rc::new(Client {
            name: name.clone(),
            ui: RefCell::new(ui),
            env_vars,
            pending_keys: RefCell::new(Vec::new()),
        });

        let weak = Rc::downgrade(&client);
        client.ui.borrow_mut().set_on_key(Box::new(move |key| {
            if let Some(client) = weak.upgrade() {
                client.pending_keys.borrow_mut().push(key);
            }
        }));

        self.clients.borrow_mut().push(client.clone());
        log::info!("client {name} connected");

        if !init_command.is_empty() {
            let mut context = Context::with_client(registry, &client);
            if let Err(err) = registry.commands.execute(init_command, &mut context) {
                log::error!("error running command '{init_command}': {err}");
            }
        }

        client
    }

    /// Drop a client, closing its UI and socket. Returns false when no
    /// client of that name exists.
    pub fn remove_client(&self, name: &str, graceful: bool, reason: &str) -> bool {
        let removed = {
            let mut clients = self.clients.borrow_mut();
            let before = clients.len();
            clients.retain(|client| client.name() != name);
            clients.len() != before
        };
        if removed {
            if graceful {
                log::info!("client {name} removed: {reason}");
            } else {
                log::warn!("client {name} removed ungracefully: {reason}");
            }
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Rc<Client>> {
        self.clients
            .borrow()
            .iter()
            .find(|client| client.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.borrow().len()
    }

    /// True once every client is gone; the natural exit condition for a
    /// server main loop.
    pub fn is_empty(&self) -> bool {
        self.clients.borrow().is_empty()
    }
}

impl Default for ClientManager {
    fn default() -> ClientManager {
        ClientManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayCoord;
    use crate::ui::DummyUi;

    #[test]
    fn clients_get_sequential_names() {
        let registry = Registry::new();
        let first = registry.clients.create_client(
            Box::new(DummyUi::new()),
            IdMap::new(),
            "",
            &registry,
        );
        let second = registry.clients.create_client(
            Box::new(DummyUi::new()),
            IdMap::new(),
            "",
            &registry,
        );
        assert_eq!(first.name(), "client0");
        assert_eq!(second.name(), "client1");
        assert_eq!(registry.clients.len(), 2);
    }

    #[test]
    fn remove_client_drops_by_name() {
        let registry = Registry::new();
        registry
            .clients
            .create_client(Box::new(DummyUi::new()), IdMap::new(), "", &registry);
        assert!(registry.clients.remove_client("client0", true, "quit"));
        assert!(!registry.clients.remove_client("client0", true, "quit"));
        assert!(registry.clients.is_empty());
    }

    #[test]
    fn init_command_failures_are_swallowed() {
        let registry = Registry::new();
        // "write" is not registered; creation must still succeed.
        let client = registry.clients.create_client(
            Box::new(DummyUi::with_dimensions(DisplayCoord::new(10, 10))),
            IdMap::new(),
            "write",
            &registry,
        );
        assert_eq!(client.name(), "client0");
    }

    #[test]
    fn env_vars_are_retained() {
        let registry = Registry::new();
        let mut env_vars = IdMap::new();
        env_vars.insert("USER", "kak".to_string());
        let client =
            registry
                .clients
                .create_client(Box::new(DummyUi::new()), env_vars, "", &registry);
        assert_eq!(client.env_vars().get("USER"), Some(&"kak".to_string()));
    }
}
