use thiserror::Error;

/// Integer result codes carried across the service boundary.
///
/// The numeric values are part of the wire contract between proxies and stubs
/// and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Allocation failure, pool exhaustion or session limit reached
    NoMemory = 1,
    /// Operation not permitted on this object
    InvalidOperation = 2,
    /// Malformed argument
    InvalidVal = 3,
    /// Catch-all
    Unknown = 4,
    /// The remote process died
    ServiceDied = 5,
    /// Operation invalid for the current state
    InvalidState = 6,
    /// Capability not supported
    Unsupport = 7,
    /// Unsupported audio decoder type
    UnsupportAudDecType = 8,
    /// Unsupported audio encoder type
    UnsupportAudEncType = 9,
    /// Unsupported video decoder type
    UnsupportVidDecType = 10,
    /// Unsupported video encoder type
    UnsupportVidEncType = 11,
    /// Unsupported container type
    UnsupportFileType = 12,
    /// Unsupported stream parameters
    UnsupportStream = 13,
    /// Start failed
    StartFailed = 14,
    /// Stop failed
    StopFailed = 15,
    /// Seek failed
    SeekFailed = 16,
    /// Muxer failure
    MuxerFailed = 17,
    /// Demuxer failure
    DemuxerFailed = 18,
    /// I/O failure
    Io = 19,
    /// Nothing available within the requested timeout
    TryAgain = 20,
    /// A guarded call exceeded its watchdog bound
    Timeout = 21,
}

impl ErrorCode {
    /// Decodes a wire value. Unknown values collapse to [`ErrorCode::Unknown`].
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ErrorCode::Ok,
            1 => ErrorCode::NoMemory,
            2 => ErrorCode::InvalidOperation,
            3 => ErrorCode::InvalidVal,
            5 => ErrorCode::ServiceDied,
            6 => ErrorCode::InvalidState,
            7 => ErrorCode::Unsupport,
            8 => ErrorCode::UnsupportAudDecType,
            9 => ErrorCode::UnsupportAudEncType,
            10 => ErrorCode::UnsupportVidDecType,
            11 => ErrorCode::UnsupportVidEncType,
            12 => ErrorCode::UnsupportFileType,
            13 => ErrorCode::UnsupportStream,
            14 => ErrorCode::StartFailed,
            15 => ErrorCode::StopFailed,
            16 => ErrorCode::SeekFailed,
            17 => ErrorCode::MuxerFailed,
            18 => ErrorCode::DemuxerFailed,
            19 => ErrorCode::Io,
            20 => ErrorCode::TryAgain,
            21 => ErrorCode::Timeout,
            _ => ErrorCode::Unknown,
        }
    }

    /// Returns the wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Narrow, stable error space exposed to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExtErrorCode {
    /// Success
    Ok = 0,
    /// Resource exhaustion
    NoMemory = 1,
    /// Invalid argument
    InvalidVal = 3,
    /// I/O failure
    Io = 4,
    /// Timed out
    Timeout = 5,
    /// Anything else
    Unknown = 6,
    /// The service died
    ServiceDied = 7,
    /// Invalid state
    InvalidState = 8,
    /// Not supported
    Unsupport = 9,
}

impl From<ErrorCode> for ExtErrorCode {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Ok => ExtErrorCode::Ok,
            ErrorCode::NoMemory => ExtErrorCode::NoMemory,
            ErrorCode::InvalidVal => ExtErrorCode::InvalidVal,
            ErrorCode::InvalidState | ErrorCode::InvalidOperation => ExtErrorCode::InvalidState,
            ErrorCode::ServiceDied => ExtErrorCode::ServiceDied,
            ErrorCode::Unsupport
            | ErrorCode::UnsupportAudDecType
            | ErrorCode::UnsupportAudEncType
            | ErrorCode::UnsupportVidDecType
            | ErrorCode::UnsupportVidEncType
            | ErrorCode::UnsupportFileType
            | ErrorCode::UnsupportStream => ExtErrorCode::Unsupport,
            ErrorCode::Io => ExtErrorCode::Io,
            ErrorCode::TryAgain | ErrorCode::Timeout => ExtErrorCode::Timeout,
            ErrorCode::Unknown
            | ErrorCode::StartFailed
            | ErrorCode::StopFailed
            | ErrorCode::SeekFailed
            | ErrorCode::MuxerFailed
            | ErrorCode::DemuxerFailed => ExtErrorCode::Unknown,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvcsError {
    #[error("no memory: {0}")]
    NoMemory(String),

    #[error("invalid value: {0}")]
    InvalidVal(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unsupported ({code:?}): {msg}")]
    Unsupported { code: ErrorCode, msg: String },

    #[error("service died")]
    ServiceDied,

    #[error("try again: {0}")]
    TryAgain(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("operation failed ({code:?}): {msg}")]
    Failed { code: ErrorCode, msg: String },

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AvcsError {
    /// Internal code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AvcsError::NoMemory(_) => ErrorCode::NoMemory,
            AvcsError::InvalidVal(_) => ErrorCode::InvalidVal,
            AvcsError::InvalidState(_) => ErrorCode::InvalidState,
            AvcsError::InvalidOperation(_) => ErrorCode::InvalidOperation,
            AvcsError::Unsupported { code, .. } => *code,
            AvcsError::ServiceDied => ErrorCode::ServiceDied,
            AvcsError::TryAgain(_) => ErrorCode::TryAgain,
            AvcsError::Timeout(_) => ErrorCode::Timeout,
            AvcsError::Io(_) => ErrorCode::Io,
            AvcsError::Failed { code, .. } => *code,
            AvcsError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Public code for this error.
    pub fn ext_code(&self) -> ExtErrorCode {
        self.code().into()
    }

    /// Rebuilds an error from its wire representation.
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match code {
            ErrorCode::NoMemory => AvcsError::NoMemory(msg),
            ErrorCode::InvalidVal => AvcsError::InvalidVal(msg),
            ErrorCode::InvalidState => AvcsError::InvalidState(msg),
            ErrorCode::InvalidOperation => AvcsError::InvalidOperation(msg),
            ErrorCode::ServiceDied => AvcsError::ServiceDied,
            ErrorCode::TryAgain => AvcsError::TryAgain(msg),
            ErrorCode::Timeout => AvcsError::Timeout(msg),
            ErrorCode::Io => AvcsError::Io(msg),
            ErrorCode::Unsupport
            | ErrorCode::UnsupportAudDecType
            | ErrorCode::UnsupportAudEncType
            | ErrorCode::UnsupportVidDecType
            | ErrorCode::UnsupportVidEncType
            | ErrorCode::UnsupportFileType
            | ErrorCode::UnsupportStream => AvcsError::Unsupported { code, msg },
            ErrorCode::StartFailed
            | ErrorCode::StopFailed
            | ErrorCode::SeekFailed
            | ErrorCode::MuxerFailed
            | ErrorCode::DemuxerFailed => AvcsError::Failed { code, msg },
            ErrorCode::Ok | ErrorCode::Unknown => AvcsError::Unknown(msg),
        }
    }

    /// Liveness errors mean the handle is stale and every later call will fail.
    pub fn is_liveness(&self) -> bool {
        matches!(self, AvcsError::ServiceDied)
    }

    /// Whether the caller may simply retry later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AvcsError::TryAgain(_) | AvcsError::NoMemory(_))
    }
}

impl From<std::io::Error> for AvcsError {
    fn from(err: std::io::Error) -> Self {
        AvcsError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AvcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        let errors = [
            AvcsError::NoMemory("pool".into()),
            AvcsError::InvalidVal("index".into()),
            AvcsError::InvalidState("start".into()),
            AvcsError::InvalidOperation("token".into()),
            AvcsError::ServiceDied,
            AvcsError::TryAgain("dequeue".into()),
            AvcsError::Failed { code: ErrorCode::MuxerFailed, msg: "write".into() },
        ];
        for err in errors {
            let wire = err.code().as_i32();
            let rebuilt = AvcsError::from_code(ErrorCode::from_i32(wire), "x");
            assert_eq!(rebuilt.code(), err.code());
        }
    }

    #[test]
    fn test_unknown_wire_value() {
        assert_eq!(ErrorCode::from_i32(9999), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_i32(-1), ErrorCode::Unknown);
    }

    #[test]
    fn test_ext_mapping_is_narrow() {
        assert_eq!(ExtErrorCode::from(ErrorCode::InvalidOperation), ExtErrorCode::InvalidState);
        assert_eq!(ExtErrorCode::from(ErrorCode::UnsupportVidDecType), ExtErrorCode::Unsupport);
        assert_eq!(ExtErrorCode::from(ErrorCode::SeekFailed), ExtErrorCode::Unknown);
        assert_eq!(ExtErrorCode::from(ErrorCode::TryAgain), ExtErrorCode::Timeout);
        assert_eq!(AvcsError::ServiceDied.ext_code(), ExtErrorCode::ServiceDied);
    }

    #[test]
    fn test_io_conversion() {
        let err: AvcsError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.ext_code(), ExtErrorCode::Io);
    }
}
