//! # Message Parcel
//!
//! Request and reply payloads. Plain values are marshalled little-endian into
//! a byte stream; shared memories, remote objects and surfaces travel in a
//! separate object table, the way file descriptors ride alongside the bytes
//! of a real binder transaction. Every object written leaves its table index
//! in the byte stream so reads can detect a mismatched layout.

use super::binder::RemoteObject;
use crate::av::{BufferFlag, BufferInfo, Format, FormatValue, FormatValueType, Surface};
use crate::error::{AvcsError, ErrorCode, Result};
use crate::memory::SharedMemory;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum ParcelObject {
    Memory(SharedMemory),
    Remote(Arc<dyn RemoteObject>),
    Surface(Surface),
}

impl fmt::Debug for ParcelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParcelObject::Memory(memory) => write!(f, "Memory({})", memory.name()),
            ParcelObject::Remote(remote) => write!(f, "Remote({})", remote.descriptor()),
            ParcelObject::Surface(surface) => write!(f, "Surface({})", surface.id()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MessageParcel {
    data: BytesMut,
    read_pos: usize,
    objects: Vec<ParcelObject>,
    object_pos: usize,
}

impl MessageParcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves both read cursors back to the start.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
        self.object_pos = 0;
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn readable(&mut self, len: usize) -> Result<&[u8]> {
        let remaining = self.data.len() - self.read_pos;
        if remaining < len {
            return Err(AvcsError::InvalidVal(format!(
                "parcel underflow: need {} bytes, {} left",
                len, remaining
            )));
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..start + len])
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.readable(1)?.get_u8())
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.put_u8(value as u8);
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.readable(4)?.get_u32_le())
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.readable(4)?.get_i32_le())
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.readable(8)?.get_i64_le())
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.readable(4)?.get_f32_le())
    }

    pub fn write_f64(&mut self, value: f64) {
        self.data.put_f64_le(value);
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(self.readable(8)?.get_f64_le())
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_u32(value.len() as u32);
        self.data.put_slice(value);
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.readable(len)?.to_vec())
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| AvcsError::InvalidVal(format!("parcel string is not utf-8: {}", e)))
    }

    pub fn write_interface_token(&mut self, descriptor: &str) {
        self.write_string(descriptor);
    }

    /// Reads the interface token and rejects it unless it is `descriptor`.
    pub fn check_interface_token(&mut self, descriptor: &str) -> Result<()> {
        let token = self.read_string()?;
        if token != descriptor {
            log::warn!("interface token mismatch: got {:?}, want {}", token, descriptor);
            return Err(AvcsError::InvalidOperation(format!(
                "interface token {:?} does not match {}",
                token, descriptor
            )));
        }
        Ok(())
    }

    /// Writes a result code, followed by the message on failure.
    pub fn write_result<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.write_i32(ErrorCode::Ok.as_i32()),
            Err(err) => {
                self.write_i32(err.code().as_i32());
                self.write_string(&err.to_string());
            }
        }
    }

    pub fn read_result(&mut self) -> Result<()> {
        let code = ErrorCode::from_i32(self.read_i32()?);
        if code == ErrorCode::Ok {
            return Ok(());
        }
        let msg = self.read_string()?;
        Err(AvcsError::from_code(code, msg))
    }

    pub fn write_format(&mut self, format: &Format) {
        self.write_u32(format.len() as u32);
        for (key, value) in format.iter() {
            self.write_string(key);
            self.write_u8(value.value_type() as u8);
            match value {
                FormatValue::Int32(v) => self.write_i32(*v),
                FormatValue::Int64(v) => self.write_i64(*v),
                FormatValue::Float(v) => self.write_f32(*v),
                FormatValue::Double(v) => self.write_f64(*v),
                FormatValue::String(v) => self.write_string(v),
                FormatValue::Buffer(v) => self.write_bytes(v),
            }
        }
    }

    pub fn read_format(&mut self) -> Result<Format> {
        let count = self.read_u32()?;
        let mut format = Format::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let tag = self.read_u8()?;
            let value = match FormatValueType::from_u8(tag) {
                Some(FormatValueType::Int32) => FormatValue::Int32(self.read_i32()?),
                Some(FormatValueType::Int64) => FormatValue::Int64(self.read_i64()?),
                Some(FormatValueType::Float) => FormatValue::Float(self.read_f32()?),
                Some(FormatValueType::Double) => FormatValue::Double(self.read_f64()?),
                Some(FormatValueType::String) => FormatValue::String(self.read_string()?),
                Some(FormatValueType::Buffer) => FormatValue::Buffer(BytesMut::from(&self.read_bytes()?[..])),
                None => return Err(AvcsError::InvalidVal(format!("unknown format value tag {}", tag))),
            };
            if !format.put_value(&key, value) {
                return Err(AvcsError::InvalidVal("format key is empty".into()));
            }
        }
        Ok(format)
    }

    pub fn write_buffer_info(&mut self, info: &BufferInfo) {
        self.write_i64(info.presentation_time_us);
        self.write_u32(info.size);
        self.write_u32(info.offset);
    }

    pub fn read_buffer_info(&mut self) -> Result<BufferInfo> {
        Ok(BufferInfo {
            presentation_time_us: self.read_i64()?,
            size: self.read_u32()?,
            offset: self.read_u32()?,
        })
    }

    pub fn write_flag(&mut self, flag: BufferFlag) {
        self.write_u32(flag.bits());
    }

    pub fn read_flag(&mut self) -> Result<BufferFlag> {
        let bits = self.read_u32()?;
        BufferFlag::from_bits(bits).ok_or_else(|| AvcsError::InvalidVal(format!("unknown buffer flag bits {:#x}", bits)))
    }

    fn write_object(&mut self, object: ParcelObject) {
        self.write_u32(self.objects.len() as u32);
        self.objects.push(object);
    }

    fn read_object(&mut self) -> Result<ParcelObject> {
        let index = self.read_u32()? as usize;
        if index != self.object_pos || index >= self.objects.len() {
            return Err(AvcsError::InvalidVal(format!(
                "object slot {} does not match table position {}",
                index, self.object_pos
            )));
        }
        self.object_pos += 1;
        Ok(self.objects[index].clone())
    }

    pub fn write_memory(&mut self, memory: &SharedMemory) {
        self.write_object(ParcelObject::Memory(memory.clone()));
    }

    pub fn read_memory(&mut self) -> Result<SharedMemory> {
        match self.read_object()? {
            ParcelObject::Memory(memory) => Ok(memory),
            other => Err(AvcsError::InvalidVal(format!("expected shared memory, found {:?}", other))),
        }
    }

    pub fn write_remote(&mut self, remote: Arc<dyn RemoteObject>) {
        self.write_object(ParcelObject::Remote(remote));
    }

    pub fn read_remote(&mut self) -> Result<Arc<dyn RemoteObject>> {
        match self.read_object()? {
            ParcelObject::Remote(remote) => Ok(remote),
            other => Err(AvcsError::InvalidVal(format!("expected remote object, found {:?}", other))),
        }
    }

    pub fn write_surface(&mut self, surface: &Surface) {
        self.write_object(ParcelObject::Surface(surface.clone()));
    }

    pub fn read_surface(&mut self) -> Result<Surface> {
        match self.read_object()? {
            ParcelObject::Surface(surface) => Ok(surface),
            other => Err(AvcsError::InvalidVal(format!("expected surface, found {:?}", other))),
        }
    }
}
