use crate::error::{AvcsError, Result};
use std::fmt;

/// Lifecycle position of a codec session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Configured,
    Running,
    Flushed,
    EndOfStream,
    Error,
    /// Terminal
    Released,
}

impl SessionState {
    pub fn as_i32(self) -> i32 {
        match self {
            SessionState::Uninitialized => 0,
            SessionState::Initialized => 1,
            SessionState::Configured => 2,
            SessionState::Running => 3,
            SessionState::Flushed => 4,
            SessionState::EndOfStream => 5,
            SessionState::Error => 6,
            SessionState::Released => 7,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(SessionState::Uninitialized),
            1 => Some(SessionState::Initialized),
            2 => Some(SessionState::Configured),
            3 => Some(SessionState::Running),
            4 => Some(SessionState::Flushed),
            5 => Some(SessionState::EndOfStream),
            6 => Some(SessionState::Error),
            7 => Some(SessionState::Released),
            _ => None,
        }
    }

    /// Fails with a state error unless `self` is one of `allowed`.
    pub(crate) fn expect(self, op: &str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self) {
            return Ok(());
        }
        log::warn!("{} rejected in state {}", op, self);
        Err(AvcsError::InvalidState(format!("{} not allowed in {}", op, self)))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "UNINITIALIZED",
            SessionState::Initialized => "INITIALIZED",
            SessionState::Configured => "CONFIGURED",
            SessionState::Running => "RUNNING",
            SessionState::Flushed => "FLUSHED",
            SessionState::EndOfStream => "END_OF_STREAM",
            SessionState::Error => "ERROR",
            SessionState::Released => "RELEASED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect() {
        assert!(SessionState::Running.expect("queue", &[SessionState::Running]).is_ok());
        let err = SessionState::Released
            .expect("start", &[SessionState::Configured, SessionState::Flushed])
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid state: start not allowed in RELEASED");
    }

    #[test]
    fn test_wire_value() {
        for value in 0..8 {
            assert_eq!(SessionState::from_i32(value).unwrap().as_i32(), value);
        }
        assert!(SessionState::from_i32(8).is_none());
    }
}
