#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # avcs - Audio/Video Codec Service
//!
//! `avcs` is a multimedia codec service layer. Codec, demuxer and muxer
//! sessions live in a service process; clients drive them across an IPC
//! boundary and exchange payloads through shared-memory buffers addressed
//! by index.
//!
//! ## Features
//!
//! ### Codec sessions
//! - Strict state machine (init, configure, start, flush, stop, reset, release)
//! - Buffer-index protocol with exclusive slot ownership
//! - Ordered asynchronous callbacks decoupled from the session lock
//! - Blocking dequeue with timeouts that lifecycle calls always wake
//!
//! ### Transport
//! - Parcels with an out-of-band object table for memories, remote objects and surfaces
//! - Shared-buffer cache that skips re-sending unchanged handles
//! - Per-call watchdog with optional process recovery
//! - Death notification in both directions: clients learn of a dead
//!   service exactly once, the service reclaims the sessions of a dead client
//!
//! ### Media
//! - Built-in audio and video engines looked up by name or MIME type
//! - In-memory demuxer and muxer over `memory://` URIs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use avcs::av::{keys, BufferFlag, BufferInfo, CodecKind, Format};
//! use avcs::client::MediaClient;
//! use avcs::config::ServiceConfig;
//! use avcs::ipc::IpcProcess;
//! use avcs::service::ServiceContext;
//!
//! #[tokio::main]
//! async fn main() -> avcs::Result<()> {
//!     let service = ServiceContext::start(ServiceConfig::load())?;
//!     let app = IpcProcess::spawn("app");
//!     let client = MediaClient::connect(&app, service.service_object())?;
//!
//!     let decoder = client.create_codec_by_mime("audio/mpeg", CodecKind::Decoder).await?;
//!     let mut format = Format::new();
//!     format.put_int_value(keys::CHANNEL_COUNT, 2);
//!     format.put_int_value(keys::SAMPLE_RATE, 44100);
//!     decoder.configure(&format).await?;
//!     decoder.start().await?;
//!
//!     let index = decoder.dequeue_input_buffer(10_000).await?;
//!     let buffer = decoder.get_input_buffer(index).await?;
//!     buffer.write(0, &[0xFF, 0xFB, 0x90, 0x64])?;
//!     decoder
//!         .queue_input_buffer(index, BufferInfo::new(0, 4, 0), BufferFlag::NONE)
//!         .await?;
//!
//!     let (index, info, _) = decoder.dequeue_output_buffer(10_000).await?;
//!     let output = decoder.get_output_buffer(index).await?;
//!     println!("decoded {:?}", output.read(0, info.size as usize)?);
//!     decoder.release_output_buffer(index, false).await?;
//!     decoder.release().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: formats, buffer flags and info, samples and surfaces
//! - `codec`: codec engines and the registry that resolves them
//! - `session`: the server-side codec session, its pools and callbacks
//! - `format`: media store, demuxer and muxer sessions
//! - `ipc`: transport, parcels, buffer cache, watchdog, stubs and proxies
//! - `service`: service startup and the session manager
//! - `client`: the client-side entry point
//! - `memory`: shared memory regions
//! - `config`: service configuration
//! - `error`: error types and result codes

/// Audio/Video base types
pub mod av;

/// Client entry point
pub mod client;

/// Codec engines and registry
pub mod codec;

/// Configuration module
pub mod config;

/// Error types and result codes
pub mod error;

/// Media store, demuxing and muxing
pub mod format;

/// Cross-process transport
pub mod ipc;

/// Shared memory
pub mod memory;

/// Service startup and session management
pub mod service;

/// Server-side codec sessions
pub mod session;

pub use error::{AvcsError, ErrorCode, ExtErrorCode, Result};
