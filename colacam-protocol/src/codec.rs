//! Typed parameter encoding for CoLa commands.
//!
//! Parameters use the CoLa-B binary representation: big-endian integers,
//! IEEE-754 floats, one byte booleans and flex strings prefixed by a 16-bit
//! length.

use crate::command::{Command, CommandType};
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};

/// Builds a command with typed parameters.
pub struct ParameterWriter {
    kind: CommandType,
    name: String,
    params: BytesMut,
}

impl ParameterWriter {
    pub fn new(kind: CommandType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            params: BytesMut::with_capacity(64),
        }
    }

    pub fn s8(mut self, value: i8) -> Self {
        self.params.put_i8(value);
        self
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.params.put_u8(value);
        self
    }

    pub fn s16(mut self, value: i16) -> Self {
        self.params.put_i16(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.params.put_u16(value);
        self
    }

    pub fn s32(mut self, value: i32) -> Self {
        self.params.put_i32(value);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.params.put_u32(value);
        self
    }

    pub fn f32(mut self, value: f32) -> Self {
        self.params.put_f32(value);
        self
    }

    pub fn bool(mut self, value: bool) -> Self {
        self.params.put_u8(value as u8);
        self
    }

    /// Appends a flex string (16-bit length followed by the bytes).
    pub fn flex_string(mut self, value: &str) -> Result<Self, ProtocolError> {
        let len = u16::try_from(value.len()).map_err(|_| ProtocolError::StringTooLong(value.len()))?;
        self.params.put_u16(len);
        self.params.put_slice(value.as_bytes());
        Ok(self)
    }

    /// Appends pre-encoded bytes.
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.params.put_slice(value);
        self
    }

    pub fn build(self) -> Command {
        Command::new(self.kind, &self.name, &self.params)
    }
}

/// Reads typed parameters from a command reply.
#[derive(Debug, Clone)]
pub struct ParameterReader<'a> {
    buf: &'a [u8],
}

impl<'a> ParameterReader<'a> {
    /// Creates a reader over a command's parameters.
    ///
    /// Fails when the command carries a device or network error.
    pub fn new(command: &'a Command) -> Result<Self, ProtocolError> {
        Ok(Self {
            buf: command.parameters()?,
        })
    }

    pub fn from_bytes(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.len() < needed {
            return Err(ProtocolError::BufferUnderflow {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_s8(&mut self) -> Result<i8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_s16(&mut self) -> Result<i16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_s32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a flex string (16-bit length followed by the bytes).
    pub fn read_flex_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u16()? as usize;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Returns everything not read yet.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }
}
