//! Wire codec for the client/server protocol.
//!
//! Every transmission is a self-delimiting frame:
//!
//! ```text
//! [u8 type] [u32 LE length] [payload: length - 5 bytes]
//! ```
//!
//! The length covers the whole frame (tag + length field + payload), so a
//! reader can always tell where the next frame starts without decoding the
//! payload. Payload values use fixed-width little-endian integers, length
//! prefixed strings and sequences, with no varints, no self-description.
//!
//! Messages are collected in memory before transmission: [`MsgWriter`]
//! reserves the header up front and back-patches the length when it goes
//! out of scope, so the encoder never needs a second pass and partial
//! frames are never observable by the transmission layer.
//!
//! [`MsgReader`] is the receiving half: a resumable parser fed by
//! nonblocking reads that becomes [`ready`](MsgReader::ready) exactly when
//! the last byte of a frame has arrived.

use std::os::unix::io::RawFd;

use crate::display::{Attributes, Color, DisplayAtom, DisplayBuffer, DisplayCoord, DisplayLine, Face};
use crate::error::{RemoteError, Result};
use crate::id_map::IdMap;
use crate::keys::{self, Key, KeyCode, Modifiers, NamedKey};
use crate::ui::{InfoStyle, MenuStyle};

/// Tag byte plus the 4-byte length field.
pub const HEADER_SIZE: usize = 5;

/// Sanity cap on declared frame lengths; anything larger is treated as a
/// corrupt stream rather than an allocation request.
const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Frame tags. `Unknown` is reserved and never emitted; receiving it is a
/// protocol violation in every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Unknown = 0,
    Connect,
    Command,
    MenuShow,
    MenuSelect,
    MenuHide,
    InfoShow,
    InfoHide,
    Draw,
    DrawStatus,
    Refresh,
    SetOptions,
    Key,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<MessageType> {
        match value {
            0 => Some(MessageType::Unknown),
            1 => Some(MessageType::Connect),
            2 => Some(MessageType::Command),
            3 => Some(MessageType::MenuShow),
            4 => Some(MessageType::MenuSelect),
            5 => Some(MessageType::MenuHide),
            6 => Some(MessageType::InfoShow),
            7 => Some(MessageType::InfoHide),
            8 => Some(MessageType::Draw),
            9 => Some(MessageType::DrawStatus),
            10 => Some(MessageType::Refresh),
            11 => Some(MessageType::SetOptions),
            12 => Some(MessageType::Key),
            _ => None,
        }
    }
}

/// Append a value's wire encoding to a buffer. Encoding is total.
pub trait Encode {
    fn encode(&self, buffer: &mut Vec<u8>);
}

/// Consume a value from a reader's payload cursor.
pub trait Decode: Sized {
    fn decode(reader: &mut MsgReader) -> Result<Self>;
}

/// In-flight frame being written into an outbound buffer.
///
/// Reserves the 5-byte header on construction; the final length is patched
/// into the buffer when the writer is dropped. A frame is therefore
/// complete as soon as its writer goes out of scope.
pub struct MsgWriter<'a> {
    buffer: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MsgWriter<'a> {
    pub fn new(buffer: &'a mut Vec<u8>, msg_type: MessageType) -> MsgWriter<'a> {
        let start = buffer.len();
        buffer.push(msg_type as u8);
        buffer.extend_from_slice(&[0; 4]);
        MsgWriter { buffer, start }
    }

    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) {
        value.encode(self.buffer);
    }
}

impl Drop for MsgWriter<'_> {
    fn drop(&mut self) {
        let size = (self.buffer.len() - self.start) as u32;
        self.buffer[self.start + 1..self.start + HEADER_SIZE]
            .copy_from_slice(&size.to_le_bytes());
    }
}

/// Outbound byte queue for one connection.
///
/// Frames are appended via [`start_message`](SendBuffer::start_message) and
/// drained to the socket from the owner's watcher callback. `sent` tracks
/// partial writes so a frame interrupted by `EAGAIN` resumes where it
/// stopped.
#[derive(Default)]
pub(crate) struct SendBuffer {
    bytes: Vec<u8>,
    sent: usize,
}

impl SendBuffer {
    pub fn new() -> SendBuffer {
        SendBuffer::default()
    }

    pub fn start_message(&mut self, msg_type: MessageType) -> MsgWriter<'_> {
        MsgWriter::new(&mut self.bytes, msg_type)
    }

    pub fn is_empty(&self) -> bool {
        self.sent == self.bytes.len()
    }

    /// Write pending bytes with repeated `write(2)` until drained or the fd
    /// stops accepting. Returns true on full drain.
    pub fn write_to_fd(&mut self, fd: RawFd) -> Result<bool> {
        while self.sent < self.bytes.len() {
            let pending = &self.bytes[self.sent..];
            let written = unsafe {
                libc::write(fd, pending.as_ptr() as *const libc::c_void, pending.len())
            };
            if written == 0 {
                return Err(RemoteError::peer_disconnected());
            }
            if written < 0 {
                let err = std::io::Error::last_os_error();
                return match err.kind() {
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(false),
                    _ => Err(RemoteError::Disconnected {
                        reason: err.to_string(),
                        graceful: false,
                    }),
                };
            }
            self.sent += written as usize;
        }
        self.bytes.clear();
        self.sent = 0;
        Ok(true)
    }
}

/// Resumable frame parser.
///
/// Feed it with [`read_available`](MsgReader::read_available) until
/// [`ready`](MsgReader::ready); then [`message_type`](MsgReader::message_type)
/// and typed [`read`](MsgReader::read) calls expose the payload, and
/// [`reset`](MsgReader::reset) rearms it for the next frame. Bytes read so
/// far are retained across calls, so any partition of a frame into reads
/// yields the same result.
pub struct MsgReader {
    stream: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
}

impl MsgReader {
    pub fn new() -> MsgReader {
        MsgReader {
            stream: Vec::new(),
            write_pos: 0,
            read_pos: HEADER_SIZE,
        }
    }

    /// Perform at most one nonblocking `read(2)`.
    ///
    /// Until the header is complete the read targets the missing header
    /// bytes; once the declared length is known, storage is resized and
    /// reads target the remaining payload. A read of zero means the peer
    /// disconnected (graceful); `EAGAIN`/`EINTR` make no progress and
    /// return without error; anything else is a non-graceful disconnect.
    pub fn read_available(&mut self, fd: RawFd) -> Result<()> {
        if self.write_pos < HEADER_SIZE {
            if self.stream.len() < HEADER_SIZE {
                self.stream.resize(HEADER_SIZE, 0);
            }
            self.read_from(fd, HEADER_SIZE)?;
            if self.write_pos == HEADER_SIZE {
                let size = self.size();
                if size < HEADER_SIZE as u32 || size > MAX_MESSAGE_SIZE {
                    return Err(RemoteError::protocol("invalid message length"));
                }
                self.stream.resize(size as usize, 0);
            }
        } else {
            let target = self.stream.len();
            self.read_from(fd, target)?;
        }
        Ok(())
    }

    fn read_from(&mut self, fd: RawFd, target: usize) -> Result<()> {
        if self.write_pos == target {
            return Ok(());
        }
        let wanted = target - self.write_pos;
        let read = unsafe {
            libc::read(
                fd,
                self.stream[self.write_pos..].as_mut_ptr() as *mut libc::c_void,
                wanted,
            )
        };
        if read == 0 {
            return Err(RemoteError::peer_disconnected());
        }
        if read < 0 {
            let err = std::io::Error::last_os_error();
            return match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(()),
                _ => Err(RemoteError::Disconnected {
                    reason: err.to_string(),
                    graceful: false,
                }),
            };
        }
        self.write_pos += read as usize;
        Ok(())
    }

    /// True once the whole frame has arrived.
    pub fn ready(&self) -> bool {
        self.write_pos >= HEADER_SIZE && self.write_pos == self.stream.len()
    }

    /// Tag of the current frame. Only meaningful once the header is in.
    pub fn message_type(&self) -> Result<MessageType> {
        debug_assert!(self.write_pos >= 1);
        MessageType::from_u8(self.stream[0])
            .ok_or_else(|| RemoteError::protocol("invalid message type"))
    }

    /// Declared total frame length. Only meaningful once the header is in.
    pub fn size(&self) -> u32 {
        debug_assert!(self.write_pos >= HEADER_SIZE);
        u32::from_le_bytes([
            self.stream[1],
            self.stream[2],
            self.stream[3],
            self.stream[4],
        ])
    }

    /// Decode the next payload value.
    pub fn read<T: Decode>(&mut self) -> Result<T> {
        T::decode(self)
    }

    /// Rearm for the next frame: storage is cleared and the payload cursor
    /// returns to just past the header.
    pub fn reset(&mut self) {
        self.stream.clear();
        self.write_pos = 0;
        self.read_pos = HEADER_SIZE;
    }

    fn take(&mut self, count: usize) -> Result<&[u8]> {
        if count > self.write_pos || self.read_pos > self.write_pos - count {
            return Err(RemoteError::protocol("tried to read after message end"));
        }
        let bytes = &self.stream[self.read_pos..self.read_pos + count];
        self.read_pos += count;
        Ok(bytes)
    }

    fn remaining(&self) -> usize {
        self.write_pos.saturating_sub(self.read_pos)
    }
}

impl Default for MsgReader {
    fn default() -> MsgReader {
        MsgReader::new()
    }
}

impl Encode for bool {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(reader: &mut MsgReader) -> Result<bool> {
        Ok(reader.take(1)?[0] != 0)
    }
}

impl Encode for u8 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(*self);
    }
}

impl Decode for u8 {
    fn decode(reader: &mut MsgReader) -> Result<u8> {
        Ok(reader.take(1)?[0])
    }
}

impl Encode for i32 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decode for i32 {
    fn decode(reader: &mut MsgReader) -> Result<i32> {
        let bytes = reader.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl Encode for u32 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decode for u32 {
    fn decode(reader: &mut MsgReader) -> Result<u32> {
        let bytes = reader.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl Encode for str {
    fn encode(&self, buffer: &mut Vec<u8>) {
        (self.len() as i32).encode(buffer);
        buffer.extend_from_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.as_str().encode(buffer);
    }
}

impl Decode for String {
    fn decode(reader: &mut MsgReader) -> Result<String> {
        let length = i32::decode(reader)?;
        if length < 0 {
            return Err(RemoteError::protocol("negative string length"));
        }
        let bytes = reader.take(length as usize)?.to_vec();
        String::from_utf8(bytes).map_err(|_| RemoteError::protocol("string is not valid utf-8"))
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, buffer: &mut Vec<u8>) {
        (self.len() as u32).encode(buffer);
        for value in self {
            value.encode(buffer);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.as_slice().encode(buffer);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut MsgReader) -> Result<Vec<T>> {
        let count = u32::decode(reader)? as usize;
        // Every element takes at least one byte, so a valid count cannot
        // exceed what is left in the frame.
        let mut values = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            values.push(T::decode(reader)?);
        }
        Ok(values)
    }
}

impl<V: Encode> Encode for IdMap<V> {
    fn encode(&self, buffer: &mut Vec<u8>) {
        (self.len() as u32).encode(buffer);
        for (key, value) in self.iter() {
            key.encode(buffer);
            value.encode(buffer);
        }
    }
}

impl<V: Decode> Decode for IdMap<V> {
    fn decode(reader: &mut MsgReader) -> Result<IdMap<V>> {
        let count = u32::decode(reader)?;
        let mut map = IdMap::new();
        for _ in 0..count {
            let key = String::decode(reader)?;
            let value = V::decode(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl Encode for Color {
    fn encode(&self, buffer: &mut Vec<u8>) {
        match self {
            Color::Default => buffer.push(0),
            Color::Black => buffer.push(1),
            Color::Red => buffer.push(2),
            Color::Green => buffer.push(3),
            Color::Yellow => buffer.push(4),
            Color::Blue => buffer.push(5),
            Color::Magenta => buffer.push(6),
            Color::Cyan => buffer.push(7),
            Color::White => buffer.push(8),
            Color::Rgb { r, g, b } => {
                buffer.push(9);
                buffer.push(*r);
                buffer.push(*g);
                buffer.push(*b);
            }
        }
    }
}

impl Decode for Color {
    fn decode(reader: &mut MsgReader) -> Result<Color> {
        match u8::decode(reader)? {
            0 => Ok(Color::Default),
            1 => Ok(Color::Black),
            2 => Ok(Color::Red),
            3 => Ok(Color::Green),
            4 => Ok(Color::Yellow),
            5 => Ok(Color::Blue),
            6 => Ok(Color::Magenta),
            7 => Ok(Color::Cyan),
            8 => Ok(Color::White),
            9 => {
                let r = u8::decode(reader)?;
                let g = u8::decode(reader)?;
                let b = u8::decode(reader)?;
                Ok(Color::Rgb { r, g, b })
            }
            _ => Err(RemoteError::protocol("invalid color")),
        }
    }
}

impl Encode for Attributes {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.bits());
    }
}

impl Decode for Attributes {
    fn decode(reader: &mut MsgReader) -> Result<Attributes> {
        Attributes::from_bits(u8::decode(reader)?)
            .ok_or_else(|| RemoteError::protocol("invalid attributes"))
    }
}

impl Encode for Face {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.fg.encode(buffer);
        self.bg.encode(buffer);
        self.attributes.encode(buffer);
    }
}

impl Decode for Face {
    fn decode(reader: &mut MsgReader) -> Result<Face> {
        Ok(Face {
            fg: Color::decode(reader)?,
            bg: Color::decode(reader)?,
            attributes: Attributes::decode(reader)?,
        })
    }
}

impl Encode for DisplayCoord {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.line.encode(buffer);
        self.column.encode(buffer);
    }
}

impl Decode for DisplayCoord {
    fn decode(reader: &mut MsgReader) -> Result<DisplayCoord> {
        Ok(DisplayCoord {
            line: i32::decode(reader)?,
            column: i32::decode(reader)?,
        })
    }
}

impl Encode for DisplayAtom {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.content.encode(buffer);
        self.face.encode(buffer);
    }
}

impl Decode for DisplayAtom {
    fn decode(reader: &mut MsgReader) -> Result<DisplayAtom> {
        Ok(DisplayAtom {
            content: String::decode(reader)?,
            face: Face::decode(reader)?,
        })
    }
}

impl Encode for DisplayLine {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.atoms.encode(buffer);
    }
}

impl Decode for DisplayLine {
    fn decode(reader: &mut MsgReader) -> Result<DisplayLine> {
        Ok(DisplayLine {
            atoms: Vec::decode(reader)?,
        })
    }
}

impl Encode for DisplayBuffer {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.lines.encode(buffer);
    }
}

impl Decode for DisplayBuffer {
    fn decode(reader: &mut MsgReader) -> Result<DisplayBuffer> {
        Ok(DisplayBuffer {
            lines: Vec::decode(reader)?,
        })
    }
}

impl Encode for MenuStyle {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(match self {
            MenuStyle::Prompt => 0,
            MenuStyle::Inline => 1,
        });
    }
}

impl Decode for MenuStyle {
    fn decode(reader: &mut MsgReader) -> Result<MenuStyle> {
        match u8::decode(reader)? {
            0 => Ok(MenuStyle::Prompt),
            1 => Ok(MenuStyle::Inline),
            _ => Err(RemoteError::protocol("invalid menu style")),
        }
    }
}

impl Encode for InfoStyle {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(match self {
            InfoStyle::Prompt => 0,
            InfoStyle::Inline => 1,
            InfoStyle::InlineAbove => 2,
            InfoStyle::InlineBelow => 3,
            InfoStyle::MenuDoc => 4,
        });
    }
}

impl Decode for InfoStyle {
    fn decode(reader: &mut MsgReader) -> Result<InfoStyle> {
        match u8::decode(reader)? {
            0 => Ok(InfoStyle::Prompt),
            1 => Ok(InfoStyle::Inline),
            2 => Ok(InfoStyle::InlineAbove),
            3 => Ok(InfoStyle::InlineBelow),
            4 => Ok(InfoStyle::MenuDoc),
            _ => Err(RemoteError::protocol("invalid info style")),
        }
    }
}

impl Encode for Key {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.modifiers.bits());
        let code = match self.code {
            KeyCode::Char(c) => c as u32,
            KeyCode::Named(named) => named.to_code(),
            KeyCode::Resize(coord) => keys::encode_coord(coord),
        };
        code.encode(buffer);
    }
}

impl Decode for Key {
    fn decode(reader: &mut MsgReader) -> Result<Key> {
        let modifiers = Modifiers::from_bits(u8::decode(reader)?)
            .ok_or_else(|| RemoteError::protocol("invalid key modifiers"))?;
        let code = u32::decode(reader)?;
        let code = if modifiers.contains(Modifiers::RESIZE) {
            KeyCode::Resize(keys::decode_coord(code))
        } else if let Some(named) = NamedKey::from_code(code) {
            KeyCode::Named(named)
        } else if let Some(c) = char::from_u32(code) {
            KeyCode::Char(c)
        } else {
            return Err(RemoteError::protocol("invalid key code"));
        };
        Ok(Key { modifiers, code })
    }
}
