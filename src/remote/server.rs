//! Session server: the listening socket and connection acceptance.
//!
//! ```text
//! Server process                          Client process
//! ┌─────────────────────────┐            ┌──────────────────┐
//! │ Server                  │            │ RemoteClient     │
//! │  listening socket ──────┼───────────▶│  Connect/Command │
//! │  Accepter (per pending) │  introduc- │  introduction    │
//! │  RemoteUi (per client)  │◀──frames──▶│  local terminal  │
//! └─────────────────────────┘            └──────────────────┘
//! ```
//!
//! Each accepted connection is owned by an [`Accepter`] until exactly one
//! introduction frame has been consumed. A `Connect` promotes the socket to
//! a full client driven through a [`RemoteUi`]; a `Command` executes the
//! carried string in an empty context and closes the socket. The command
//! path runs whatever it is sent; the socket's file permissions are the
//! sole access control on a session.

use std::cell::RefCell;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use crate::context::{Context, Registry};
use crate::display::DisplayCoord;
use crate::error::{RemoteError, Result};
use crate::event_loop::{fd_readable, set_cloexec, set_nonblocking, EventMode, EventSet, FdWatcher};
use crate::id_map::IdMap;
use crate::remote::codec::{MessageType, MsgReader};
use crate::remote::remote_ui::RemoteUi;
use crate::remote::session::{make_session_directory, session_path, socket_address};

/// The server side of a session.
///
/// Owns the listening socket for the session's lifetime; dropping the
/// server closes the session and unlinks the socket file.
pub struct Server {
    inner: Rc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

struct ServerInner {
    registry: Registry,
    session: RefCell<String>,
    listener: RefCell<Option<Rc<FdWatcher>>>,
    accepters: RefCell<Vec<Rc<Accepter>>>,
}

impl Server {
    /// Create the session: build the runtime directory tree, bind the
    /// socket under umask 0077 so it lands with mode 0600, listen, and
    /// start accepting.
    pub fn new(registry: &Registry, session_name: &str) -> Result<Server> {
        let path = make_session_directory(session_name)?;
        let fd = bind_listener(&path)?;

        let inner = Rc::new(ServerInner {
            registry: registry.clone(),
            session: RefCell::new(session_name.to_string()),
            listener: RefCell::new(None),
            accepters: RefCell::new(Vec::new()),
        });

        let weak = Rc::downgrade(&inner);
        let listener = FdWatcher::new(
            &registry.event_loop,
            fd,
            EventSet::READ,
            move |watcher, _events, _mode| {
                if let Some(server) = weak.upgrade() {
                    ServerInner::accept_pending(&server, watcher);
                }
            },
        );
        *inner.listener.borrow_mut() = Some(listener);

        log::info!("session '{session_name}' listening on {}", path.display());
        Ok(Server { inner })
    }

    pub fn session(&self) -> String {
        self.inner.session.borrow().clone()
    }

    /// Move the socket file to a new session name. Returns false on
    /// failure, leaving the session unchanged.
    pub fn rename_session(&self, new_name: &str) -> bool {
        let old_path = match session_path(&self.inner.session.borrow()) {
            Ok(path) => path,
            Err(_) => return false,
        };
        let new_path = match session_path(new_name) {
            Ok(path) => path,
            Err(_) => return false,
        };
        if std::fs::rename(&old_path, &new_path).is_err() {
            return false;
        }
        *self.inner.session.borrow_mut() = new_name.to_string();
        true
    }

    /// Stop accepting; unlink the socket file when `do_unlink`.
    pub fn close_session(&self, do_unlink: bool) {
        self.inner.close_session(do_unlink);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.inner.listener.borrow().is_some() {
            self.inner.close_session(true);
        }
    }
}

impl ServerInner {
    fn accept_pending(server: &Rc<ServerInner>, watcher: &FdWatcher) {
        loop {
            let fd = unsafe { libc::accept(watcher.fd(), std::ptr::null_mut(), std::ptr::null_mut()) };
            if fd < 0 {
                let err = std::io::Error::last_os_error();
                match err.kind() {
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {}
                    _ => log::error!("accept failed: {err}"),
                }
                return;
            }
            if let Err(err) = set_cloexec(fd).and_then(|()| set_nonblocking(fd)) {
                log::error!("cannot configure accepted socket: {err}");
                unsafe { libc::close(fd) };
                continue;
            }
            let accepter = Accepter::new(&server.registry, fd, Rc::downgrade(server));
            server.accepters.borrow_mut().push(accepter);
        }
    }

    fn close_session(&self, do_unlink: bool) {
        if do_unlink {
            if let Ok(path) = session_path(&self.session.borrow()) {
                let _ = std::fs::remove_file(path);
            }
        }
        if let Some(listener) = self.listener.borrow_mut().take() {
            listener.close_fd();
        }
    }
}

fn bind_listener(path: &std::path::Path) -> Result<RawFd> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(RemoteError::runtime(format!(
            "cannot create socket: {}",
            std::io::Error::last_os_error()
        )));
    }
    let close_on_error = |fd: RawFd, err: RemoteError| {
        unsafe { libc::close(fd) };
        Err(err)
    };

    if let Err(err) = set_cloexec(fd) {
        return close_on_error(
            fd,
            RemoteError::runtime(format!("cannot configure socket: {err}")),
        );
    }

    let address = match socket_address(path) {
        Ok(address) => address,
        Err(err) => return close_on_error(fd, err),
    };

    // The socket file must come up 0600 no matter the process umask.
    let old_umask = unsafe { libc::umask(0o077) };
    let bound = unsafe {
        libc::bind(
            fd,
            &address as *const libc::sockaddr_un as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    unsafe { libc::umask(old_umask) };
    if bound != 0 {
        return close_on_error(
            fd,
            RemoteError::runtime(format!(
                "unable to bind listen socket '{}': {}",
                path.display(),
                std::io::Error::last_os_error()
            )),
        );
    }

    // umask keeps the window between bind and chmod owner-only; the chmod
    // settles the file at 0600.
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        return close_on_error(
            fd,
            RemoteError::runtime(format!(
                "cannot set permissions on '{}': {err}",
                path.display()
            )),
        );
    }

    if unsafe { libc::listen(fd, 4) } != 0 {
        return close_on_error(
            fd,
            RemoteError::runtime(format!(
                "unable to listen on socket '{}': {}",
                path.display(),
                std::io::Error::last_os_error()
            )),
        );
    }

    if let Err(err) = set_nonblocking(fd) {
        return close_on_error(
            fd,
            RemoteError::runtime(format!("cannot configure socket: {err}")),
        );
    }

    Ok(fd)
}

/// Ephemeral owner of a freshly accepted socket.
///
/// Lives exactly until its introduction frame is processed: a `Connect`
/// hands the socket to a new [`RemoteUi`], everything else closes it. An
/// accepter only reacts to `Normal` dispatches so it never recurses out of
/// an urgent pulse.
struct Accepter {
    registry: Registry,
    server: Weak<ServerInner>,
    watcher: Rc<FdWatcher>,
    reader: RefCell<MsgReader>,
}

impl Accepter {
    fn new(registry: &Registry, fd: RawFd, server: Weak<ServerInner>) -> Rc<Accepter> {
        Rc::new_cyclic(|weak: &Weak<Accepter>| {
            let weak = weak.clone();
            let watcher = FdWatcher::new(
                &registry.event_loop,
                fd,
                EventSet::READ,
                move |watcher, _events, mode| {
                    if mode != EventMode::Normal {
                        return;
                    }
                    if let Some(accepter) = weak.upgrade() {
                        accepter.handle_available_input(watcher);
                    }
                },
            );
            Accepter {
                registry: registry.clone(),
                server,
                watcher,
                reader: RefCell::new(MsgReader::new()),
            }
        })
    }

    fn handle_available_input(&self, watcher: &FdWatcher) {
        match self.read_introduction(watcher) {
            Ok(true) => self.remove_from_server(),
            Ok(false) => {} // introduction incomplete, wait for more bytes
            Err(err) => {
                log::warn!("error while waiting for introduction: {err}");
                self.watcher.close_fd();
                self.remove_from_server();
            }
        }
    }

    /// Returns true once the introduction has been fully processed.
    fn read_introduction(&self, watcher: &FdWatcher) -> Result<bool> {
        let fd = watcher.fd();
        let mut reader = self.reader.borrow_mut();
        while !reader.ready() {
            if !fd_readable(fd) {
                return Ok(false);
            }
            reader.read_available(fd)?;
        }

        match reader.message_type()? {
            MessageType::Connect => {
                let init_command: String = reader.read()?;
                let dimensions: DisplayCoord = reader.read()?;
                let env_vars: IdMap<String> = reader.read()?;
                drop(reader);

                let fd = self.watcher.release_fd();
                let ui = RemoteUi::new(&self.registry.event_loop, fd, dimensions);
                let ui_handle = ui.clone();
                let client = self.registry.clients.create_client(
                    Box::new(ui),
                    env_vars,
                    &init_command,
                    &self.registry,
                );

                let clients = Rc::downgrade(&self.registry.clients);
                let name = client.name().to_string();
                ui_handle.set_on_disconnect(Box::new(move |reason, graceful| {
                    if let Some(clients) = clients.upgrade() {
                        clients.remove_client(&name, graceful, reason);
                    }
                }));
                Ok(true)
            }
            MessageType::Command => {
                let command: String = reader.read()?;
                drop(reader);

                if !command.is_empty() {
                    let mut context = Context::empty(&self.registry);
                    if let Err(err) = self.registry.commands.execute(&command, &mut context) {
                        log::error!("error running command '{command}': {err}");
                    }
                }
                self.watcher.close_fd();
                Ok(true)
            }
            _ => {
                log::warn!("Invalid introduction message received");
                self.watcher.close_fd();
                Ok(true)
            }
        }
    }

    fn remove_from_server(&self) {
        if let Some(server) = self.server.upgrade() {
            server
                .accepters
                .borrow_mut()
                .retain(|accepter| !std::ptr::eq(accepter.as_ref(), self));
        }
    }
}
