//! AudioBench Engine: a realtime-safe audio block engine.
//!
//! Crate layout:
//! - [`params`]     : parameter table and the lock-free `ParameterStore`
//! - [`block`]      : `AudioBlockView`, a non-owning view of host buffers
//! - [`engine`]     : `Engine`, the block processor
//! - [`state`]      : per-instance DSP state (smoothers, voice, filters)
//! - [`serializer`] : versioned save/load of parameters and transient state
//! - [`nodes`]      : the synth voice oscillator
//! - [`config`]     : channel policy and state-capture options
//! - [`error`]      : `EngineError` and the C status codes
//!
//! `Engine::process` never allocates, locks or logs. Everything that can
//! fail in a way worth reporting happens on the control thread.

pub mod block;
pub mod config;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod params;
pub mod serializer;
pub mod state;

// Re-export some commonly used items to make downstream imports ergonomic.
pub use block::AudioBlockView;
pub use config::{ChannelPolicy, EngineConfig, StateCapture};
pub use engine::{Engine, Mode, MAX_BLOCK_FRAMES, OUTPUT_CEILING};
pub use error::{EngineError, EngineResult, Status};
pub use params::{HeldNote, ParamId, ParamSpec, ParameterStore, PARAMS, PARAM_COUNT};
pub use serializer::{SavedState, STATE_VERSION};
