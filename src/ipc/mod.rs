//! # IPC
//!
//! Everything that crosses the process boundary: the simulated binder
//! transport, parcels, the shared-buffer cache protocol, the watchdog and
//! the stub/proxy pair of every interface the service exposes.

pub mod binder;
pub mod cache;
pub mod codec_proxy;
pub mod codec_stub;
pub mod demuxer;
pub mod listener;
pub mod muxer;
pub mod parcel;
pub mod service;
pub mod watchdog;

pub use binder::{CallContext, DeathRecipient, IpcProcess, IpcStub, LocalBinder, Pid, RemoteObject};
pub use cache::{CacheFlag, CacheStats, ClientBufferCache, ServerBufferCache};
pub use codec_proxy::CodecProxy;
pub use codec_stub::{CodecServiceStub, CODEC_DESCRIPTOR};
pub use demuxer::{DemuxerProxy, DemuxerServiceStub, DEMUXER_DESCRIPTOR};
pub use listener::{AvCodecCallback, CallbackSlot, CodecListenerProxy, CodecListenerStub};
pub use muxer::{MuxerProxy, MuxerServiceStub, MUXER_DESCRIPTOR};
pub use parcel::MessageParcel;
pub use service::{AvCodecServiceStub, SERVICE_DESCRIPTOR};
pub use watchdog::{RecoveryHook, Watchdog, WatchdogScope};
