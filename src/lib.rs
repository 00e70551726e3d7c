//! Corelink client library.
//!
//! Connects to a Corelink relay server and exchanges named data streams
//! with other clients. A session speaks JSON over one TCP control
//! connection for commands and server events, and moves stream payloads
//! over per-stream UDP or TCP data channels with a compact binary frame
//! layout.
//!
//! # Architecture
//!
//! - [`client::Client`] owns a session: control channel, stream
//!   registry, and data transports, all torn down on drop.
//! - [`control`] runs the command/response and server-event plumbing on
//!   dedicated threads.
//! - [`data`] implements the UDP/TCP sender and receiver channels;
//!   receivers invoke a user callback per frame on their own thread.
//! - [`wire`] and [`recv_buffer`] handle frame encoding and TCP
//!   reassembly.
//!
//! All blocking I/O uses one-second socket timeouts so shutdown always
//! completes in bounded time.
//!
//! # Example
//!
//! ```no_run
//! use corelink::{Client, ClientConfig, EventHandlers};
//!
//! let config = ClientConfig::local_defaults();
//! let client = Client::connect(&config, EventHandlers::default())?;
//! let stream = client.create_sender("ws", "audio", "", false, false, corelink::state::SEND_UDP)?;
//! client.send(stream, b"hello")?;
//! # Ok::<(), corelink::Error>(())
//! ```

pub mod client;
pub mod config;
pub mod control;
mod counter;
pub mod data;
pub mod error;
mod mailbox;
pub mod meta;
pub mod protocol;
pub mod recv_buffer;
pub mod registry;
pub mod state;
mod stream_map;
pub mod wire;

pub use client::Client;
pub use config::ClientConfig;
pub use control::{EventHandlers, PairEventHandler, StreamEventHandler};
pub use data::RecvCallback;
pub use error::{Error, Result};
pub use meta::StreamMeta;
pub use protocol::FunctionInfo;
