//! Server-side proxy over a client's terminal.
//!
//! A [`RemoteUi`] implements the full [`UserInterface`] capability set by
//! serialising every call into an outbound frame, and drains inbound frames
//! into [`Key`] events for the attached client. In steady state the only
//! valid inbound tag is `Key`; anything else evicts the client.
//!
//! The WRITE bit of the watcher mask is bus-driven: set whenever a frame is
//! enqueued, cleared when the outbound buffer fully drains, so the loop
//! never spins on a writable socket with nothing queued.

use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use crate::display::{DisplayBuffer, DisplayCoord, DisplayLine, Face};
use crate::error::{RemoteError, Result};
use crate::event_loop::{fd_readable, EventLoop, EventSet, FdWatcher};
use crate::keys::Key;
use crate::remote::codec::{MessageType, MsgReader, MsgWriter, SendBuffer};
use crate::ui::{InfoStyle, MenuStyle, OnKey, UiOptions, UserInterface};

/// Hook invoked once when the connection dies; receives the reason and
/// whether the peer closed gracefully.
pub type OnDisconnect = Box<dyn FnOnce(&str, bool)>;

/// The server-side end of a client connection.
///
/// Cheap to clone; clones share the connection. The instance boxed into the
/// client owns the socket for its lifetime.
#[derive(Clone)]
pub struct RemoteUi {
    inner: Rc<RemoteUiInner>,
}

struct RemoteUiInner {
    watcher: Rc<FdWatcher>,
    send_buffer: RefCell<SendBuffer>,
    reader: RefCell<MsgReader>,
    dimensions: Cell<DisplayCoord>,
    on_key: RefCell<Option<OnKey>>,
    on_disconnect: RefCell<Option<OnDisconnect>>,
}

impl RemoteUi {
    /// Take ownership of a connected, nonblocking socket.
    ///
    /// `dimensions` is the client-reported size from its introduction; it
    /// is updated by every Resize key received afterwards.
    pub fn new(event_loop: &EventLoop, fd: RawFd, dimensions: DisplayCoord) -> RemoteUi {
        let inner = Rc::new_cyclic(|weak: &Weak<RemoteUiInner>| {
            let weak = weak.clone();
            let watcher = FdWatcher::new(event_loop, fd, EventSet::READ, move |watcher, events, _mode| {
                if let Some(inner) = weak.upgrade() {
                    RemoteUiInner::on_events(&inner, watcher, events);
                }
            });
            RemoteUiInner {
                watcher,
                send_buffer: RefCell::new(SendBuffer::new()),
                reader: RefCell::new(MsgReader::new()),
                dimensions: Cell::new(dimensions),
                on_key: RefCell::new(None),
                on_disconnect: RefCell::new(None),
            }
        });
        log::debug!("remote client connected: fd {fd}");
        RemoteUi { inner }
    }

    /// Install the eviction hook. Called at most once, after which the
    /// socket is closed.
    pub fn set_on_disconnect(&self, on_disconnect: OnDisconnect) {
        *self.inner.on_disconnect.borrow_mut() = Some(on_disconnect);
    }
}

impl RemoteUiInner {
    fn on_events(inner: &Rc<RemoteUiInner>, watcher: &FdWatcher, events: EventSet) {
        if let Err(err) = inner.handle_events(watcher, events) {
            if !err.is_graceful() {
                log::warn!("ungraceful disconnection detected: {err}");
            }
            inner.disconnect(&err);
        }
    }

    fn handle_events(&self, watcher: &FdWatcher, events: EventSet) -> Result<()> {
        let fd = watcher.fd();
        if events.contains(EventSet::WRITE) {
            if self.send_buffer.borrow_mut().write_to_fd(fd)? {
                watcher.set_events(EventSet::READ);
            }
        }
        if events.contains(EventSet::READ) {
            while fd_readable(fd) {
                let key = {
                    let mut reader = self.reader.borrow_mut();
                    reader.read_available(fd)?;
                    if !reader.ready() {
                        continue;
                    }
                    if reader.message_type()? != MessageType::Key {
                        return Err(RemoteError::protocol("unexpected message"));
                    }
                    let key: Key = reader.read()?;
                    reader.reset();
                    key
                };
                if let Some(dimensions) = key.resize_coord() {
                    self.dimensions.set(dimensions);
                }
                if let Some(on_key) = self.on_key.borrow_mut().as_mut() {
                    on_key(key);
                }
            }
        }
        Ok(())
    }

    fn send(&self, msg_type: MessageType, build: impl FnOnce(&mut MsgWriter<'_>)) {
        {
            let mut send_buffer = self.send_buffer.borrow_mut();
            let mut msg = send_buffer.start_message(msg_type);
            build(&mut msg);
        }
        self.watcher.set_events(EventSet::READ | EventSet::WRITE);
    }

    fn disconnect(&self, err: &RemoteError) {
        if let Some(on_disconnect) = self.on_disconnect.borrow_mut().take() {
            on_disconnect(&err.to_string(), err.is_graceful());
        }
        self.watcher.close_fd();
    }
}

impl Drop for RemoteUiInner {
    fn drop(&mut self) {
        log::debug!("remote client disconnected: fd {}", self.watcher.fd());
        self.watcher.close_fd();
    }
}

impl UserInterface for RemoteUi {
    fn menu_show(
        &mut self,
        choices: &[DisplayLine],
        anchor: DisplayCoord,
        fg: Face,
        bg: Face,
        style: MenuStyle,
    ) {
        self.inner.send(MessageType::MenuShow, |msg| {
            msg.write(choices);
            msg.write(&anchor);
            msg.write(&fg);
            msg.write(&bg);
            msg.write(&style);
        });
    }

    fn menu_select(&mut self, selected: i32) {
        self.inner.send(MessageType::MenuSelect, |msg| {
            msg.write(&selected);
        });
    }

    fn menu_hide(&mut self) {
        self.inner.send(MessageType::MenuHide, |_| {});
    }

    fn info_show(
        &mut self,
        title: &str,
        content: &str,
        anchor: DisplayCoord,
        face: Face,
        style: InfoStyle,
    ) {
        self.inner.send(MessageType::InfoShow, |msg| {
            msg.write(title);
            msg.write(content);
            msg.write(&anchor);
            msg.write(&face);
            msg.write(&style);
        });
    }

    fn info_hide(&mut self) {
        self.inner.send(MessageType::InfoHide, |_| {});
    }

    fn draw(&mut self, display_buffer: &DisplayBuffer, default_face: Face, padding_face: Face) {
        self.inner.send(MessageType::Draw, |msg| {
            msg.write(display_buffer);
            msg.write(&default_face);
            msg.write(&padding_face);
        });
    }

    fn draw_status(
        &mut self,
        status_line: &DisplayLine,
        mode_line: &DisplayLine,
        default_face: Face,
    ) {
        self.inner.send(MessageType::DrawStatus, |msg| {
            msg.write(status_line);
            msg.write(mode_line);
            msg.write(&default_face);
        });
    }

    fn refresh(&mut self, force: bool) {
        self.inner.send(MessageType::Refresh, |msg| {
            msg.write(&force);
        });
    }

    fn dimensions(&self) -> DisplayCoord {
        self.inner.dimensions.get()
    }

    fn set_on_key(&mut self, on_key: OnKey) {
        *self.inner.on_key.borrow_mut() = Some(on_key);
    }

    fn set_ui_options(&mut self, options: &UiOptions) {
        self.inner.send(MessageType::SetOptions, |msg| {
            msg.write(options);
        });
    }
}
