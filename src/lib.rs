//! A real-time media transport engine running over a QUIC-like transport.
//!
//! This crate is the protocol core only: message codec, fragment cache,
//! reassembly, ack/horizon tracking, the control-stream state machine, the
//! warp/rush unidirectional substream engine, and the connection/
//! subscription manager that wires them together. It never touches a
//! socket — callers hand it bytes through the [`Transport`] trait and poll
//! it from their own event loop via [`scheduler::Scheduler::time_check`].
//! There is no internal threading: every entry point is a plain
//! synchronous method, and the whole engine is meant to live behind a
//! single connection's worth of `&mut self` calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use moq_transport::{Config, GlobalContext};
//!
//! let global = GlobalContext::new(Config::default());
//! let (media_id, _registration) = global.publish_object_source("live/cam0".into(), true, 0, 0);
//! ```

mod cache;
mod callback;
mod coding;
mod config;
mod connection;
mod error;
mod horizon;
mod model;
mod reassembly;
mod scheduler;
mod stream;
mod unistream;

pub use cache::*;
pub use callback::*;
pub use coding::{DatagramHeader, Decode, DecodeError, Encode, EncodeError, VarInt};
pub use config::*;
pub use connection::*;
pub use error::*;
pub use horizon::*;
pub use model::*;
pub use reassembly::*;
pub use scheduler::*;
pub use stream::*;
pub use unistream::*;

/// The wire-level message types and their `Encode`/`Decode` impls (§4.1).
/// Kept under its own path rather than flattened, since its names
/// (`Request`, `Accept`, `Post`, ...) are generic enough to collide with
/// whatever the embedding application calls its own types.
pub mod message {
    pub use crate::coding::{
        Accept, CachePolicyMsg, FinDatagramMsg, FragmentMsg, Message, NotifyMsg, ObjectHeaderMsg, Post, Request,
        StartPointMsg, SubscribeMsg, WarpHeaderMsg,
    };
}
