//! HTTP implementation of the upload session API.
//!
//! [`ApiClient`] speaks JSON over HTTPS to the MediaDrop backend and
//! implements the engine's `SessionApi` seam, so the transfer loop and
//! queue never see the HTTP stack.

pub mod client;

pub use client::ApiClient;
