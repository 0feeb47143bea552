/// Debug wire protocol packets
///
/// Header: length (u32, header included), id (u32), flags (u8), then either
/// command set + command (commands) or an error code (replies, flag 0x80).
use crate::bytecode::cursor::{Cursor, Truncated};
use crate::config::types::{Result, SandboxError};

pub const HEADER_LEN: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;
pub const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";

/// Error code for a target runtime that is shutting down
pub const ERROR_VM_DEAD: u16 = 112;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub set: u8,
    pub code: u8,
}

impl Command {
    pub const fn new(set: u8, code: u8) -> Self {
        Self { set, code }
    }
}

pub mod commands {
    use super::Command;

    pub const VM_ALL_THREADS: Command = Command::new(1, 4);
    pub const VM_DISPOSE: Command = Command::new(1, 6);
    pub const VM_ID_SIZES: Command = Command::new(1, 7);
    pub const VM_SUSPEND: Command = Command::new(1, 8);
    pub const VM_RESUME: Command = Command::new(1, 9);
    pub const REFERENCE_TYPE_SIGNATURE: Command = Command::new(2, 1);
    pub const REFERENCE_TYPE_FIELDS: Command = Command::new(2, 4);
    pub const REFERENCE_TYPE_METHODS: Command = Command::new(2, 5);
    pub const CLASS_TYPE_SUPERCLASS: Command = Command::new(3, 1);
    pub const OBJECT_REFERENCE_TYPE: Command = Command::new(9, 1);
    pub const OBJECT_GET_VALUES: Command = Command::new(9, 2);
    pub const OBJECT_SET_VALUES: Command = Command::new(9, 3);
    pub const THREAD_FRAMES: Command = Command::new(11, 6);
    pub const THREAD_STOP: Command = Command::new(11, 10);
    pub const FRAME_THIS_OBJECT: Command = Command::new(16, 3);
}

/// Sizes of the variably sized identifiers, as reported by the target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdSizes {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self {
            field_id: 8,
            method_id: 8,
            object_id: 8,
            reference_type_id: 8,
            frame_id: 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Command {
        id: u32,
        command: Command,
        data: Vec<u8>,
    },
    Reply {
        id: u32,
        error_code: u16,
        data: Vec<u8>,
    },
}

impl Packet {
    pub fn encode_command(id: u32, command: Command, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
        buf.extend_from_slice(&((HEADER_LEN + data.len()) as u32).to_be_bytes());
        buf.extend_from_slice(&id.to_be_bytes());
        buf.push(0);
        buf.push(command.set);
        buf.push(command.code);
        buf.extend_from_slice(data);
        buf
    }

    /// Decode a packet from its 11-byte header and payload
    pub fn decode(header: &[u8; HEADER_LEN], data: Vec<u8>) -> Self {
        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let flags = header[8];
        if flags & REPLY_FLAG != 0 {
            Packet::Reply {
                id,
                error_code: u16::from_be_bytes([header[9], header[10]]),
                data,
            }
        } else {
            Packet::Command {
                id,
                command: Command::new(header[9], header[10]),
                data,
            }
        }
    }

    /// Payload length announced by a header
    pub fn payload_len(header: &[u8; HEADER_LEN]) -> Result<usize> {
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        len.checked_sub(HEADER_LEN)
            .ok_or_else(|| SandboxError::Protocol(format!("packet length {len} below header size")))
    }
}

/// Builder for command payloads
pub struct PacketWriter {
    sizes: IdSizes,
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(sizes: IdSizes) -> Self {
        Self {
            sizes,
            buf: Vec::new(),
        }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub fn i32(mut self, value: i32) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn sized(mut self, value: u64, size: usize) -> Self {
        let bytes = value.to_be_bytes();
        self.buf.extend_from_slice(&bytes[8 - size.min(8)..]);
        self
    }

    pub fn object_id(self, value: u64) -> Self {
        let size = self.sizes.object_id;
        self.sized(value, size)
    }

    pub fn reference_type_id(self, value: u64) -> Self {
        let size = self.sizes.reference_type_id;
        self.sized(value, size)
    }

    pub fn field_id(self, value: u64) -> Self {
        let size = self.sizes.field_id;
        self.sized(value, size)
    }

    pub fn frame_id(self, value: u64) -> Self {
        let size = self.sizes.frame_id;
        self.sized(value, size)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reader over a reply payload
pub struct PacketReader<'a> {
    sizes: IdSizes,
    cursor: Cursor<'a>,
}

fn truncated(err: Truncated) -> SandboxError {
    SandboxError::Protocol(format!(
        "reply truncated at offset {} (wanted {} bytes)",
        err.offset, err.wanted
    ))
}

impl<'a> PacketReader<'a> {
    pub fn new(sizes: IdSizes, data: &'a [u8]) -> Self {
        Self {
            sizes,
            cursor: Cursor::new(data),
        }
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(truncated)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.cursor.read_i32().map_err(truncated)
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.cursor.read_u64().map_err(truncated)
    }

    /// Non-negative count prefix
    pub fn count(&mut self) -> Result<usize> {
        let count = self.i32()?;
        usize::try_from(count)
            .map_err(|_| SandboxError::Protocol(format!("negative count {count} in reply")))
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.count()?;
        let bytes = self.cursor.take(len).map_err(truncated)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn object_id(&mut self) -> Result<u64> {
        self.cursor.read_sized(self.sizes.object_id).map_err(truncated)
    }

    pub fn reference_type_id(&mut self) -> Result<u64> {
        self.cursor
            .read_sized(self.sizes.reference_type_id)
            .map_err(truncated)
    }

    pub fn method_id(&mut self) -> Result<u64> {
        self.cursor.read_sized(self.sizes.method_id).map_err(truncated)
    }

    pub fn field_id(&mut self) -> Result<u64> {
        self.cursor.read_sized(self.sizes.field_id).map_err(truncated)
    }

    pub fn frame_id(&mut self) -> Result<u64> {
        self.cursor.read_sized(self.sizes.frame_id).map_err(truncated)
    }

    /// Tagged value: tag byte followed by a value whose size the tag implies
    pub fn tagged_value(&mut self) -> Result<TaggedValue> {
        let tag = self.u8()?;
        let size = value_size(tag, &self.sizes)
            .ok_or_else(|| SandboxError::Protocol(format!("unknown value tag {:?}", tag as char)))?;
        let raw = self.cursor.read_sized(size).map_err(truncated)?;
        Ok(TaggedValue { tag, raw })
    }
}

/// A decoded tagged value, kept raw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaggedValue {
    pub tag: u8,
    pub raw: u64,
}

impl TaggedValue {
    pub fn is_object(&self) -> bool {
        matches!(self.tag, b'L' | b's' | b't' | b'g' | b'l' | b'c' | b'[')
    }

    pub fn as_bool(&self) -> Option<bool> {
        (self.tag == b'Z').then_some(self.raw != 0)
    }

    /// Object id, `None` for null or non-object values
    pub fn as_object(&self) -> Option<u64> {
        (self.is_object() && self.raw != 0).then_some(self.raw)
    }
}

fn value_size(tag: u8, sizes: &IdSizes) -> Option<usize> {
    let size = match tag {
        b'B' | b'Z' => 1,
        b'C' | b'S' => 2,
        b'F' | b'I' => 4,
        b'D' | b'J' => 8,
        b'V' => 0,
        b'L' | b's' | b't' | b'g' | b'l' | b'c' | b'[' => sizes.object_id,
        _ => return None,
    };
    Some(size)
}

/// `Ljava/lang/Thread;` -> `java.lang.Thread`
pub fn signature_to_class_name(signature: &str) -> String {
    match signature
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
    {
        Some(inner) => inner.replace('/', "."),
        None => signature.to_string(),
    }
}
