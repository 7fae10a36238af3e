//! Error taxonomy shared by the engine and the C ABI.
//!
//! No variant owns heap data, so the realtime path can construct and return
//! any of them without allocating.

/// Engine-level error. [`EngineError::status`] gives the C status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("allocation failed")]
    AllocationFailure,

    #[error("invalid or destroyed instance handle")]
    InvalidHandle,

    #[error("malformed audio buffer: {0}")]
    MalformedBuffer(&'static str),

    #[error("incompatible state: {0}")]
    IncompatibleState(&'static str),

    #[error("engine has not been prepared")]
    NotPrepared,

    #[error("unknown parameter id {0}")]
    UnknownParameter(u32),

    #[error("parameter value is not finite")]
    NonFiniteValue,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("note index {0} outside 0..=127")]
    InvalidNote(i32),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// C status codes. `Ok` is zero, every failure is negative.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    InvalidHandle = -1,
    MalformedBuffer = -2,
    IncompatibleState = -3,
    NotPrepared = -4,
    UnknownParameter = -5,
    NonFiniteValue = -6,
    AllocationFailure = -7,
    InvalidConfig = -8,
    InvalidNote = -9,
}

impl EngineError {
    pub fn status(self) -> Status {
        match self {
            Self::AllocationFailure => Status::AllocationFailure,
            Self::InvalidHandle => Status::InvalidHandle,
            Self::MalformedBuffer(_) => Status::MalformedBuffer,
            Self::IncompatibleState(_) => Status::IncompatibleState,
            Self::NotPrepared => Status::NotPrepared,
            Self::UnknownParameter(_) => Status::UnknownParameter,
            Self::NonFiniteValue => Status::NonFiniteValue,
            Self::InvalidConfig(_) => Status::InvalidConfig,
            Self::InvalidNote(_) => Status::InvalidNote,
        }
    }
}

impl Status {
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[inline]
    pub fn from_result<T>(r: EngineResult<T>) -> Self {
        match r {
            Ok(_) => Self::Ok,
            Err(e) => e.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(EngineError::InvalidHandle.status().code(), -1);
        assert_eq!(EngineError::MalformedBuffer("x").status().code(), -2);
        assert_eq!(EngineError::IncompatibleState("x").status().code(), -3);
        assert_eq!(EngineError::NotPrepared.status().code(), -4);
        assert_eq!(EngineError::UnknownParameter(99).status().code(), -5);
        assert_eq!(EngineError::NonFiniteValue.status().code(), -6);
        assert_eq!(EngineError::AllocationFailure.status().code(), -7);
        assert_eq!(EngineError::InvalidConfig("x").status().code(), -8);
        assert_eq!(EngineError::InvalidNote(128).status().code(), -9);
    }

    #[test]
    fn display_names_the_reason() {
        let e = EngineError::IncompatibleState("version mismatch");
        assert_eq!(e.to_string(), "incompatible state: version mismatch");
    }
}
