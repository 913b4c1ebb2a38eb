//! # tagwire-connection
//!
//! Connection handling for tagwire peers.
//!
//! This crate provides:
//! - A typed handler registry keyed by payload type
//! - Dispatch of every populated payload slot with reply correlation
//! - Async frame reading and writing over any `AsyncRead`/`AsyncWrite`
//! - A connection read loop with serialized concurrent writes
//! - YAML and environment configuration

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod stream;

pub use config::{Config, ConfigError, ConnectionConfig, HeartbeatConfig, NetworkConfig};
pub use connection::{Connection, ConnectionStats};
pub use dispatch::{dispatch, Dispatch};
pub use error::{ConnectionError, DispatchError, HandlerError};
pub use handler::{Arity, HandlerResult, HandlerSet, Registration};
pub use stream::{FrameReader, FrameWriter};
