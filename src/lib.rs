//! Client/server core of the Kakoune modal text editor.
//!
//! A session is served by one long-lived process; any number of lightweight
//! clients attach to it over a local socket and hand their terminal to the
//! server, which drives it as if it were local. This crate implements that
//! split: the framed binary protocol, the nonblocking connection state
//! machines on both peers, session addressing on the filesystem, and the
//! thin remote [`UserInterface`](ui::UserInterface) proxy.
//!
//! # Architecture
//!
//! - [`remote`]: the transport: codec, session sockets, server, client
//! - [`event_loop`]: the single-threaded poll loop everything runs on
//! - [`ui`]: the capability set a terminal frontend implements
//! - [`display`] / [`keys`]: the payload vocabulary of the protocol
//! - [`client`] / [`command`] / [`context`]: the narrow collaborator
//!   surface the transport drives (client registry, command execution,
//!   explicitly-passed process singletons)
//!
//! The editing engine proper (buffers, selections, undo) lives above this
//! crate and only ever sees opaque payloads plus the `UserInterface` and
//! `Context` interfaces.

pub mod client;
pub mod command;
pub mod context;
pub mod display;
pub mod error;
pub mod event_loop;
pub mod id_map;
pub mod keys;
pub mod remote;
pub mod ui;

pub use client::{Client, ClientManager};
pub use command::CommandManager;
pub use context::{Context, Registry};
pub use error::{RemoteError, Result};
pub use event_loop::{EventLoop, EventMode, EventSet, FdWatcher};
pub use id_map::IdMap;
pub use remote::{check_session, send_command, RemoteClient, RemoteUi, Server};
pub use ui::{DummyUi, UserInterface};
