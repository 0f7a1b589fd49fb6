//! # Format
//!
//! An open key → typed-value map used for codec configuration, output formats
//! and track descriptors.
//!
//! A key holds exactly one type at a time. Putting a value of another type under
//! an existing key replaces both the value and its type, and every typed getter
//! refuses to coerce between types:
//!
//! ```rust
//! use avcs::av::{keys, Format};
//!
//! let mut format = Format::new();
//! format.put_int_value(keys::SAMPLE_RATE, 44100);
//! assert_eq!(format.get_int_value(keys::SAMPLE_RATE), Some(44100));
//! assert_eq!(format.get_long_value(keys::SAMPLE_RATE), None);
//! ```
//!
//! Cloning is deep: buffer values are copied, never aliased, so a `Format`
//! handed to another owner cannot observe later mutation of the original.

use bytes::BytesMut;
use std::collections::BTreeMap;
use std::fmt;

/// Well-known keys.
pub mod keys {
    pub const CODEC_MIME: &str = "codec_mime";
    pub const CHANNEL_COUNT: &str = "channel-count";
    pub const SAMPLE_RATE: &str = "sample-rate";
    pub const BITRATE: &str = "bitrate";
    pub const AUDIO_SAMPLE_FORMAT: &str = "audio-sample-format";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const PIXEL_FORMAT: &str = "pixel-format";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    pub const CODEC_CONFIG: &str = "codec-config";
    pub const TRACK_COUNT: &str = "track-count";
    pub const TRACK_TYPE: &str = "track-type";
    pub const DURATION: &str = "duration";
    pub const TITLE: &str = "title";
    pub const ROTATION: &str = "rotation";
}

/// Type tag of a [`FormatValue`]; also the wire tag used when marshalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatValueType {
    Int32 = 1,
    Int64 = 2,
    Float = 3,
    Double = 4,
    String = 5,
    Buffer = 6,
}

impl FormatValueType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FormatValueType::Int32),
            2 => Some(FormatValueType::Int64),
            3 => Some(FormatValueType::Float),
            4 => Some(FormatValueType::Double),
            5 => Some(FormatValueType::String),
            6 => Some(FormatValueType::Buffer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Buffer(BytesMut),
}

impl FormatValue {
    pub fn value_type(&self) -> FormatValueType {
        match self {
            FormatValue::Int32(_) => FormatValueType::Int32,
            FormatValue::Int64(_) => FormatValueType::Int64,
            FormatValue::Float(_) => FormatValueType::Float,
            FormatValue::Double(_) => FormatValueType::Double,
            FormatValue::String(_) => FormatValueType::String,
            FormatValue::Buffer(_) => FormatValueType::Buffer,
        }
    }
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int32(v) => write!(f, "{}", v),
            FormatValue::Int64(v) => write!(f, "{}", v),
            FormatValue::Float(v) => write!(f, "{}", v),
            FormatValue::Double(v) => write!(f, "{}", v),
            FormatValue::String(v) => write!(f, "{}", v),
            FormatValue::Buffer(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Format {
    items: BTreeMap<String, FormatValue>,
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value and type.
    /// Empty keys are rejected.
    pub fn put_value(&mut self, key: &str, value: FormatValue) -> bool {
        if key.is_empty() {
            return false;
        }
        self.items.insert(key.to_string(), value);
        true
    }

    pub fn put_int_value(&mut self, key: &str, value: i32) -> bool {
        self.put_value(key, FormatValue::Int32(value))
    }

    pub fn put_long_value(&mut self, key: &str, value: i64) -> bool {
        self.put_value(key, FormatValue::Int64(value))
    }

    pub fn put_float_value(&mut self, key: &str, value: f32) -> bool {
        self.put_value(key, FormatValue::Float(value))
    }

    pub fn put_double_value(&mut self, key: &str, value: f64) -> bool {
        self.put_value(key, FormatValue::Double(value))
    }

    pub fn put_string_value(&mut self, key: &str, value: &str) -> bool {
        self.put_value(key, FormatValue::String(value.to_string()))
    }

    /// Copies `data` into the format.
    pub fn put_buffer(&mut self, key: &str, data: &[u8]) -> bool {
        self.put_value(key, FormatValue::Buffer(BytesMut::from(data)))
    }

    pub fn get_value(&self, key: &str) -> Option<&FormatValue> {
        self.items.get(key)
    }

    pub fn get_int_value(&self, key: &str) -> Option<i32> {
        match self.items.get(key) {
            Some(FormatValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_long_value(&self, key: &str) -> Option<i64> {
        match self.items.get(key) {
            Some(FormatValue::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float_value(&self, key: &str) -> Option<f32> {
        match self.items.get(key) {
            Some(FormatValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double_value(&self, key: &str) -> Option<f64> {
        match self.items.get(key) {
            Some(FormatValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string_value(&self, key: &str) -> Option<&str> {
        match self.items.get(key) {
            Some(FormatValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_buffer(&self, key: &str) -> Option<&[u8]> {
        match self.items.get(key) {
            Some(FormatValue::Buffer(v)) => Some(&v[..]),
            _ => None,
        }
    }

    /// Mutable access to a buffer value owned by this format only.
    pub fn get_buffer_mut(&mut self, key: &str) -> Option<&mut [u8]> {
        match self.items.get_mut(key) {
            Some(FormatValue::Buffer(v)) => Some(&mut v[..]),
            _ => None,
        }
    }

    pub fn get_value_type(&self, key: &str) -> Option<FormatValueType> {
        self.items.get(key).map(FormatValue::value_type)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn remove_key(&mut self, key: &str) -> Option<FormatValue> {
        self.items.remove(key)
    }

    /// Overlays every entry of `other` on top of `self`.
    pub fn merge(&mut self, other: &Format) {
        for (key, value) in &other.items {
            self.items.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .items
            .iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect();
        f.write_str(&entries.join(" | "))
    }
}
