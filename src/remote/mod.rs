//! Client/server transport over local sockets.
//!
//! A long-lived server process owns the editing state; lightweight client
//! processes own terminals and connect to it through a named session. The
//! wire carries length-framed binary messages in both directions:
//!
//! ```text
//! Server process                             Client process
//! ┌────────────────────┐                    ┌────────────────────┐
//! │ Server / Accepter  │   introduction     │ RemoteClient       │
//! │ RemoteUi per client│◀───────────────────│  local terminal UI │
//! │                    │── draw/menu/info ─▶│                    │
//! │                    │◀──── Key frames ───│                    │
//! └────────────────────┘                    └────────────────────┘
//! ```
//!
//! Keystrokes travel client→server as `Key` frames; rendering primitives
//! and menu/info/options state travel server→client. A terminal resize is a
//! distinguished `Key` carrying the new dimensions, so it stays ordered
//! with the keystrokes around it.
//!
//! See [`codec`] for the frame format, [`session`] for the on-disk socket
//! layout, and [`server`]/[`client`] for the two ends of a connection.

pub mod client;
pub mod codec;
pub mod remote_ui;
pub mod server;
pub mod session;

pub use client::{send_command, RemoteClient};
pub use codec::{Decode, Encode, MessageType, MsgReader, MsgWriter, HEADER_SIZE};
pub use remote_ui::RemoteUi;
pub use server::Server;
pub use session::{check_session, make_session_directory, session_path};
