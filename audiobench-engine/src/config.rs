//! Per-instance configuration fixed at `prepare` time.

use crate::error::EngineError;

/// What happens to host channels beyond the engine's native channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPolicy {
    /// Channel `c` copies native channel `c % native` (mono → stereo).
    #[default]
    Duplicate,
    /// Extra channels are silenced.
    Clear,
}

/// How much of the engine a saved state captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateCapture {
    /// Parameter values only. Reload restarts oscillator and filter memory.
    #[default]
    ParametersOnly,
    /// Parameters plus oscillator phase, filter memory, envelope and
    /// smoother positions, for bit-exact resume.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub channel_policy: ChannelPolicy,
    pub state_capture: StateCapture,
}

impl TryFrom<i32> for ChannelPolicy {
    type Error = EngineError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Duplicate),
            1 => Ok(Self::Clear),
            _ => Err(EngineError::InvalidConfig("unknown channel policy")),
        }
    }
}

impl TryFrom<i32> for StateCapture {
    type Error = EngineError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::ParametersOnly),
            1 => Ok(Self::Full),
            _ => Err(EngineError::InvalidConfig("unknown state capture mode")),
        }
    }
}
