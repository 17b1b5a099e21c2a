//! Command-framed TCP evaluation protocol.
//!
//! The broker [`Consumer`] is the server side: it trades queued work
//! items for evaluated results over per-connection sessions. The
//! [`WorkerClient`] is the remote side: it connects, requests work,
//! evaluates, and responds, with keep-alive pings and idle backoff.
//!
//! # Wire format
//!
//! Fixed-width ASCII command fields of [`COMMAND_LENGTH`] bytes,
//! optionally followed by an opaque payload whose length (and, for
//! `compute`, serialization mode) is declared in the preceding fields.
//! Payload encodings are text (JSON), XML, and binary.

mod client;
mod protocol;
mod server;

pub use client::{ClientConfig, WorkerClient};
pub use protocol::{
    decode_work_item, encode_work_item, SerializationMode, COMMAND_LENGTH,
};
pub use server::{Consumer, ConsumerConfig, ConsumerHandle};
