//! Client-side end of a session connection.
//!
//! A [`RemoteClient`] joins a session, introduces itself with a `Connect`
//! frame, then acts as a thin relay: local key events become outbound `Key`
//! frames, and every inbound frame is replayed onto the local
//! [`UserInterface`]. [`send_command`] is the one-shot variant that ships a
//! single command string and never reads.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::rc::{Rc, Weak};

use crate::display::{Color, DisplayAtom, DisplayBuffer, DisplayCoord, DisplayLine, Face};
use crate::error::{RemoteError, Result};
use crate::event_loop::{fd_readable, set_nonblocking, EventLoop, EventSet, FdWatcher};
use crate::id_map::IdMap;
use crate::keys::Key;
use crate::remote::codec::{MessageType, MsgReader, MsgWriter, SendBuffer};
use crate::remote::session::connect_to;
use crate::ui::{InfoStyle, MenuStyle, UiOptions, UserInterface};

/// A fully decoded server-to-client message, ready to replay on a UI.
///
/// Decoding into a value first keeps the reader borrow short and guarantees
/// the reader is reset before any UI method runs.
enum UiMessage {
    MenuShow {
        choices: Vec<DisplayLine>,
        anchor: DisplayCoord,
        fg: Face,
        bg: Face,
        style: MenuStyle,
    },
    MenuSelect(i32),
    MenuHide,
    InfoShow {
        title: String,
        content: String,
        anchor: DisplayCoord,
        face: Face,
        style: InfoStyle,
    },
    InfoHide,
    Draw {
        display_buffer: DisplayBuffer,
        default_face: Face,
        padding_face: Face,
    },
    DrawStatus {
        status_line: DisplayLine,
        mode_line: DisplayLine,
        default_face: Face,
    },
    Refresh(bool),
    SetOptions(UiOptions),
}

impl UiMessage {
    fn decode(reader: &mut MsgReader) -> Result<UiMessage> {
        match reader.message_type()? {
            MessageType::MenuShow => Ok(UiMessage::MenuShow {
                choices: reader.read()?,
                anchor: reader.read()?,
                fg: reader.read()?,
                bg: reader.read()?,
                style: reader.read()?,
            }),
            MessageType::MenuSelect => Ok(UiMessage::MenuSelect(reader.read()?)),
            MessageType::MenuHide => Ok(UiMessage::MenuHide),
            MessageType::InfoShow => Ok(UiMessage::InfoShow {
                title: reader.read()?,
                content: reader.read()?,
                anchor: reader.read()?,
                face: reader.read()?,
                style: reader.read()?,
            }),
            MessageType::InfoHide => Ok(UiMessage::InfoHide),
            MessageType::Draw => Ok(UiMessage::Draw {
                display_buffer: reader.read()?,
                default_face: reader.read()?,
                padding_face: reader.read()?,
            }),
            MessageType::DrawStatus => Ok(UiMessage::DrawStatus {
                status_line: reader.read()?,
                mode_line: reader.read()?,
                default_face: reader.read()?,
            }),
            MessageType::Refresh => Ok(UiMessage::Refresh(reader.read()?)),
            MessageType::SetOptions => Ok(UiMessage::SetOptions(reader.read()?)),
            // Key is client-to-server only; introductions are not valid in
            // steady state.
            _ => Err(RemoteError::protocol("unexpected message")),
        }
    }
}

/// A connected editor client.
pub struct RemoteClient {
    inner: Rc<RemoteClientInner>,
}

struct RemoteClientInner {
    watcher: Rc<FdWatcher>,
    send_buffer: RefCell<SendBuffer>,
    reader: RefCell<MsgReader>,
    ui: RefCell<Box<dyn UserInterface>>,
    connected: Cell<bool>,
}

impl RemoteClient {
    /// Join `session`: connect, send the `Connect` introduction carrying
    /// `init_command`, the UI dimensions and `env_vars`, then start relaying
    /// in both directions.
    pub fn new(
        event_loop: &EventLoop,
        session: &str,
        ui: Box<dyn UserInterface>,
        env_vars: &IdMap<String>,
        init_command: &str,
    ) -> Result<RemoteClient> {
        let mut stream = connect_to(session)?;

        // The introduction goes out on the still-blocking socket; steady
        // state is nonblocking under the watcher.
        let mut introduction = Vec::new();
        {
            let mut msg = MsgWriter::new(&mut introduction, MessageType::Connect);
            msg.write(init_command);
            msg.write(&ui.dimensions());
            msg.write(env_vars);
        }
        stream.write_all(&introduction).map_err(|err| RemoteError::Disconnected {
            reason: err.to_string(),
            graceful: false,
        })?;
        set_nonblocking(stream.as_raw_fd()).map_err(|err| {
            RemoteError::runtime(format!("cannot make socket nonblocking: {err}"))
        })?;
        let fd = stream.into_raw_fd();

        let inner = Rc::new_cyclic(|weak: &Weak<RemoteClientInner>| {
            let weak = weak.clone();
            let watcher = FdWatcher::new(event_loop, fd, EventSet::READ, move |watcher, events, _mode| {
                if let Some(inner) = weak.upgrade() {
                    RemoteClientInner::on_events(&inner, watcher, events);
                }
            });
            RemoteClientInner {
                watcher,
                send_buffer: RefCell::new(SendBuffer::new()),
                reader: RefCell::new(MsgReader::new()),
                ui: RefCell::new(ui),
                connected: Cell::new(true),
            }
        });

        let weak = Rc::downgrade(&inner);
        inner.ui.borrow_mut().set_on_key(Box::new(move |key| {
            if let Some(inner) = weak.upgrade() {
                inner.send_key(key);
            }
        }));

        log::info!("connected to session '{session}'");
        Ok(RemoteClient { inner })
    }

    /// False once the connection is gone, however it died.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }
}

impl RemoteClientInner {
    fn on_events(inner: &Rc<RemoteClientInner>, watcher: &FdWatcher, events: EventSet) {
        if let Err(err) = inner.handle_events(watcher, events) {
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
                let decoded = {
                    let mut reader = self.reader.borrow_mut();
                    reader.read_available(fd)?;
                    if !reader.ready() {
                        continue;
                    }
                    let decoded = UiMessage::decode(&mut reader);
                    reader.reset();
                    decoded
                };
                self.apply(decoded?);
            }
        }
        Ok(())
    }

    fn apply(&self, message: UiMessage) {
        let mut ui = self.ui.borrow_mut();
        match message {
            UiMessage::MenuShow {
                choices,
                anchor,
                fg,
                bg,
                style,
            } => ui.menu_show(&choices, anchor, fg, bg, style),
            UiMessage::MenuSelect(selected) => ui.menu_select(selected),
            UiMessage::MenuHide => ui.menu_hide(),
            UiMessage::InfoShow {
                title,
                content,
                anchor,
                face,
                style,
            } => ui.info_show(&title, &content, anchor, face, style),
            UiMessage::InfoHide => ui.info_hide(),
            UiMessage::Draw {
                display_buffer,
                default_face,
                padding_face,
            } => ui.draw(&display_buffer, default_face, padding_face),
            UiMessage::DrawStatus {
                status_line,
                mode_line,
                default_face,
            } => ui.draw_status(&status_line, &mode_line, default_face),
            UiMessage::Refresh(force) => ui.refresh(force),
            UiMessage::SetOptions(options) => ui.set_ui_options(&options),
        }
    }

    fn send_key(&self, key: Key) {
        if !self.connected.get() {
            return;
        }
        {
            let mut send_buffer = self.send_buffer.borrow_mut();
            let mut msg = send_buffer.start_message(MessageType::Key);
            msg.write(&key);
        }
        self.watcher.set_events(EventSet::READ | EventSet::WRITE);
    }

    fn disconnect(&self, err: &RemoteError) {
        if !self.connected.replace(false) {
            return;
        }
        log::error!("remote session lost: {err}");

        // Best effort: surface the reason on the local status line.
        let mut ui = self.ui.borrow_mut();
        let face = Face::new(Color::Red, Color::Default, Default::default());
        let status = DisplayLine::from_atom(DisplayAtom::new(format!("disconnected: {err}"), face));
        ui.draw_status(&status, &DisplayLine::default(), Face::default());
        ui.refresh(true);
        drop(ui);

        self.watcher.close_fd();
    }
}

/// One-shot client: connect, ship a single `Command` frame, close. Never
/// reads. The command runs server-side in an empty context.
pub fn send_command(session: &str, command: &str) -> Result<()> {
    let mut stream = connect_to(session)?;
    let mut buffer = Vec::new();
    {
        let mut msg = MsgWriter::new(&mut buffer, MessageType::Command);
        msg.write(command);
    }
    stream.write_all(&buffer).map_err(|err| RemoteError::Disconnected {
        reason: err.to_string(),
        graceful: false,
    })
}
