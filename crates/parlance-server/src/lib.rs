//! Parlance server: WebSocket transport plus the per-session orchestrator.
//!
//! The transport owns exactly one WebSocket per client and moves two kinds
//! of frames in each direction: JSON control messages and raw PCM. The
//! orchestrator ([`session::Session`]) is the state machine binding the
//! ASR, LLM, and TTS adapters, the tool registry, and the identity store
//! into turns; all state transitions happen there, and the adapters are
//! strictly reactive.

pub mod bargein;
pub mod clock;
pub mod session;
pub mod transport;

pub use transport::{router, AppState};
