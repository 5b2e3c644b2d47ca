//! fishlink - Client library for FISH scripting engines
//!
//! - `protocol`: tagged values and their wire encoding
//! - `network`: handshaked channels, the engine listener and the peer link
//! - `engine`: command/eval requests and the engine process
//! - `proxy`: remote entity handles, intrinsic access and list traversal
//! - `fish`: FISH binary files
//! - `config`: TOML configuration

pub mod config;
pub mod engine;
pub mod fish;
pub mod network;
pub mod protocol;
pub mod proxy;

pub use engine::{Engine, EngineError, EngineResult};
pub use protocol::Value;
pub use proxy::{Decoded, HandleKind, Proxy};
