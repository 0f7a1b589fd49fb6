//! # Codec Session
//!
//! Server-side owner of one codec engine, its input and output buffer pools
//! and the state machine that governs them:
//!
//! ```text
//! UNINITIALIZED -init-> INITIALIZED -configure-> CONFIGURED -start-> RUNNING
//!                                                   ^  stop          |  ^
//!                                                   +----------------+  | start
//!                                        RUNNING/EOS -flush-> FLUSHED --+
//!                        RUNNING -(EOS output)-> END_OF_STREAM
//!            any -reset-> UNINITIALIZED        any -release-> RELEASED
//! ```
//!
//! Processing is synchronous: queueing an input buffer or releasing an output
//! buffer runs the engine and moves every output that fits into free output
//! slots before the call returns. Events reach the client through a
//! [`CallbackChannel`], never by calling into the client under the session
//! lock. `dequeue_*` calls park on a [`Notify`] until a slot becomes ready,
//! the timeout passes, or a lifecycle call wakes them to observe a new state.

use crate::av::surface::SurfaceConsumer;
use crate::av::{BufferFlag, BufferInfo, CodecKind, Format, Surface};
use crate::codec::{CodecEngine, CodecRegistry, EngineError};
use crate::error::{AvcsError, Result};
use crate::memory::SharedMemory;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub mod callback;
pub mod pool;
pub mod state;

pub use callback::{CallbackChannel, CallbackEvent, CodecCallback, ErrorType};
pub use pool::{BufferPool, Direction, SlotState};
pub use state::SessionState;

use SessionState::*;

struct SessionCore {
    name: String,
    state: SessionState,
    engine: Option<CodecEngine>,
    config: Format,
    input: Option<BufferPool>,
    output: Option<BufferPool>,
    callback: Option<CallbackChannel>,
    input_eos: bool,
    input_surface: Option<Surface>,
    output_surface: Option<Surface>,
}

impl SessionCore {
    fn emit(&self, event: CallbackEvent) {
        if let Some(callback) = &self.callback {
            callback.post(event);
        }
    }

    fn engine_mut(&mut self) -> Result<&mut CodecEngine> {
        self.engine
            .as_mut()
            .ok_or_else(|| AvcsError::InvalidState("no engine".into()))
    }

    fn pool_mut(&mut self, direction: Direction) -> Result<&mut BufferPool> {
        let pool = match direction {
            Direction::Input => self.input.as_mut(),
            Direction::Output => self.output.as_mut(),
        };
        pool.ok_or_else(|| AvcsError::InvalidState(format!("no {} buffers allocated", direction)))
    }

    fn free_pools(&mut self) {
        if let Some(pool) = self.input.as_mut() {
            pool.free_all();
        }
        if let Some(pool) = self.output.as_mut() {
            pool.free_all();
        }
    }

    /// Moves the session to ERROR and reports the engine fault.
    fn fault(&mut self, err: EngineError) -> AvcsError {
        log::error!("{}: engine fault {} in {}", self.name, err.code, self.state);
        self.state = Error;
        self.emit(CallbackEvent::Error {
            error_type: ErrorType::Engine,
            code: err.code,
        });
        err.into()
    }

    /// Feeds one payload to the engine and moves whatever it produced.
    fn feed(&mut self, data: Bytes, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let sent = self.engine_mut()?.send_input(data, info, flag);
        if let Err(err) = sent {
            return Err(self.fault(err));
        }
        if flag.is_eos() {
            self.input_eos = true;
        }
        self.pump()
    }

    /// Moves pending engine output into free output slots, in order.
    fn pump(&mut self) -> Result<()> {
        loop {
            let has_output = match &self.engine {
                Some(engine) => engine.has_output(),
                None => false,
            };
            if !has_output || self.state != Running {
                return Ok(());
            }
            let index = match self.output.as_ref().and_then(BufferPool::find_free) {
                Some(index) => index,
                None => return Ok(()),
            };
            let engine = self.engine_mut()?;
            let change = engine.take_output_format_change();
            let output = match engine.receive_output() {
                Some(output) => output,
                None => return Ok(()),
            };
            if let Some(format) = change {
                log::info!("{}: output format {}", self.name, format);
                self.emit(CallbackEvent::OutputFormatChanged(format));
            }

            let info = output.info();
            let filled = self
                .pool_mut(Direction::Output)?
                .fill(index, &output.data, info, output.flag);
            if filled.is_err() {
                let err = EngineError {
                    code: crate::codec::ENGINE_ERR_CORRUPT_STREAM,
                    msg: format!("output of {} bytes overflows buffer {}", output.data.len(), index),
                };
                return Err(self.fault(err));
            }
            log::debug!(
                "{}: output {} ready ({} bytes, pts {}, {})",
                self.name,
                index,
                info.size,
                info.presentation_time_us,
                output.flag
            );
            self.emit(CallbackEvent::OutputBufferAvailable {
                index,
                info,
                flag: output.flag,
            });
            if output.flag.is_eos() {
                log::info!("{}: {} -> {}", self.name, self.state, EndOfStream);
                self.state = EndOfStream;
            }
        }
    }

    /// Offers every free input slot to the client.
    fn offer_inputs(&mut self) {
        if self.input_surface.is_some() || self.input_eos {
            return;
        }
        let offered = match self.input.as_mut() {
            Some(pool) => pool.offer_all_free(),
            None => return,
        };
        for index in offered {
            self.emit(CallbackEvent::InputBufferAvailable(index));
        }
    }

    /// Feeds frames waiting on the input surface.
    fn drain_surface(&mut self) -> Result<()> {
        let surface = match &self.input_surface {
            Some(surface) => surface.clone(),
            None => return Ok(()),
        };
        while self.state == Running && !self.input_eos {
            let frame = match surface.acquire_frame() {
                Some(frame) => frame,
                None => break,
            };
            let info = BufferInfo::new(frame.pts_us, frame.data.len() as u32, 0);
            self.feed(frame.data, info, BufferFlag::NONE)?;
        }
        Ok(())
    }
}

struct SessionShared {
    core: Mutex<SessionCore>,
    input_ready: Notify,
    output_ready: Notify,
    registry: Arc<CodecRegistry>,
    max_buffer_size: usize,
}

impl SessionShared {
    fn wake_all(&self) {
        self.input_ready.notify_waiters();
        self.output_ready.notify_waiters();
    }
}

impl SurfaceConsumer for SessionShared {
    fn on_frame_available(&self) {
        let result = {
            let mut core = self.core.lock();
            core.drain_surface()
        };
        if let Err(e) = result {
            log::warn!("surface input: {}", e);
        }
        self.wake_all();
    }
}

/// A codec session. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct CodecSession {
    inner: Arc<SessionShared>,
}

impl CodecSession {
    pub fn new(registry: Arc<CodecRegistry>, max_buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                core: Mutex::new(SessionCore {
                    name: String::from("codec"),
                    state: Uninitialized,
                    engine: None,
                    config: Format::new(),
                    input: None,
                    output: None,
                    callback: None,
                    input_eos: false,
                    input_surface: None,
                    output_surface: None,
                }),
                input_ready: Notify::new(),
                output_ready: Notify::new(),
                registry,
                max_buffer_size,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn name(&self) -> String {
        self.inner.core.lock().name.clone()
    }

    /// Resolves the engine by codec name, or by MIME type when `is_mime`.
    pub fn init(&self, kind: CodecKind, is_mime: bool, name: &str) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("init", &[Uninitialized])?;
        let engine = if is_mime {
            self.inner.registry.create_by_mime(name, kind)?
        } else {
            self.inner.registry.create_by_name(name)?
        };
        if engine.kind() != kind {
            return Err(AvcsError::Unsupported {
                code: crate::ErrorCode::Unsupport,
                msg: format!("{} is not a {:?}", name, kind),
            });
        }
        core.name = engine.info().name.to_string();
        core.engine = Some(engine);
        core.state = Initialized;
        log::info!("{}: {} -> {}", core.name, Uninitialized, Initialized);
        Ok(())
    }

    pub fn configure(&self, format: &Format) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("configure", &[Initialized])?;
        let engine = core.engine_mut()?;
        if let Err(e) = engine.configure(format) {
            engine.reset();
            log::warn!("{}: configure rejected: {}", core.name, e);
            return Err(e);
        }
        core.config = format.clone();
        core.input = None;
        core.output = None;
        core.state = Configured;
        log::info!("{}: {} -> {} ({})", core.name, Initialized, Configured, format);
        Ok(())
    }

    /// Applies a partial update; keys the engine does not know are ignored.
    pub fn set_parameter(&self, format: &Format) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("set_parameter", &[Configured, Running])?;
        core.engine_mut()?.set_parameter(format)?;
        core.config.merge(format);
        log::debug!("{}: parameters {}", core.name, format);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("start", &[Configured, Flushed])?;
        if core.input.is_none() || core.output.is_none() {
            let requirements = core.engine_mut()?.buffer_requirements()?;
            let largest = requirements.input_size.max(requirements.output_size);
            if largest > self.inner.max_buffer_size {
                return Err(AvcsError::NoMemory(format!(
                    "buffer of {} bytes exceeds the {} byte limit",
                    largest, self.inner.max_buffer_size
                )));
            }
            let input = BufferPool::allocate(Direction::Input, requirements.input_count, requirements.input_size)?;
            let output =
                BufferPool::allocate(Direction::Output, requirements.output_count, requirements.output_size)?;
            core.input = Some(input);
            core.output = Some(output);
        }
        core.free_pools();
        core.input_eos = false;
        let from = core.state;
        core.state = Running;
        log::info!("{}: {} -> {}", core.name, from, Running);
        core.offer_inputs();
        let drained = core.drain_surface();
        drop(core);
        self.inner.input_ready.notify_waiters();
        drained
    }

    /// Stops processing and returns to CONFIGURED. Buffer pools are kept.
    pub fn stop(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("stop", &[Running, Flushed, EndOfStream])?;
        core.engine_mut()?.flush();
        core.free_pools();
        core.input_eos = false;
        let from = core.state;
        core.state = Configured;
        log::info!("{}: {} -> {}", core.name, from, Configured);
        drop(core);
        self.inner.wake_all();
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("flush", &[Running, EndOfStream])?;
        core.engine_mut()?.flush();
        core.free_pools();
        core.input_eos = false;
        let from = core.state;
        core.state = Flushed;
        log::info!("{}: {} -> {}", core.name, from, Flushed);
        drop(core);
        self.inner.wake_all();
        Ok(())
    }

    /// Tears down the engine and pools; `init` is required again.
    pub fn reset(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state == Released {
            return core.state.expect("reset", &[]);
        }
        if let Some(mut engine) = core.engine.take() {
            engine.reset();
        }
        core.input = None;
        core.output = None;
        core.config = Format::new();
        core.input_eos = false;
        if let Some(surface) = core.input_surface.take() {
            surface.clear_consumer();
        }
        core.output_surface = None;
        let from = core.state;
        core.state = Uninitialized;
        log::info!("{}: {} -> {}", core.name, from, Uninitialized);
        drop(core);
        self.inner.wake_all();
        Ok(())
    }

    /// Terminal; releasing twice is harmless.
    pub fn release(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state == Released {
            return Ok(());
        }
        core.engine = None;
        core.input = None;
        core.output = None;
        core.callback = None;
        if let Some(surface) = core.input_surface.take() {
            surface.clear_consumer();
        }
        core.output_surface = None;
        let from = core.state;
        core.state = Released;
        log::info!("{}: {} -> {}", core.name, from, Released);
        drop(core);
        self.inner.wake_all();
        Ok(())
    }

    /// Signals end of input; the only way to end surface input.
    pub fn notify_eos(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("notify_eos", &[Running])?;
        if core.input_eos {
            return Err(AvcsError::InvalidState("end of stream already signalled".into()));
        }
        let result = core.feed(Bytes::new(), BufferInfo::default(), BufferFlag::EOS);
        drop(core);
        self.inner.wake_all();
        result
    }

    /// Installs the event receiver, replacing any earlier one.
    pub fn set_callback(&self, callback: Arc<dyn CodecCallback>) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state == Released {
            return core.state.expect("set_callback", &[]);
        }
        core.callback = Some(CallbackChannel::spawn(callback)?);
        Ok(())
    }

    pub fn get_input_buffer(&self, index: u32) -> Result<SharedMemory> {
        let mut core = self.inner.core.lock();
        core.state.expect("get_input_buffer", &[Running])?;
        if core.input_surface.is_some() {
            return Err(AvcsError::InvalidOperation("input comes from a surface".into()));
        }
        core.pool_mut(Direction::Input)?.fetch(index)
    }

    pub fn queue_input_buffer(&self, index: u32, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("queue_input_buffer", &[Running])?;
        if core.input_surface.is_some() {
            return Err(AvcsError::InvalidOperation("input comes from a surface".into()));
        }
        if core.input_eos {
            return Err(AvcsError::InvalidState("input already ended".into()));
        }
        let pool = core.pool_mut(Direction::Input)?;
        match pool.state(index) {
            Some(SlotState::OwnedByClient) => {}
            other => {
                return Err(AvcsError::InvalidVal(format!(
                    "input buffer {} is not owned by the client ({:?})",
                    index, other
                )))
            }
        }
        if !info.fits(pool.buffer_size()) {
            return Err(AvcsError::InvalidVal(format!(
                "payload {}+{} exceeds input buffer of {} bytes",
                info.offset,
                info.size,
                pool.buffer_size()
            )));
        }
        let memory = pool.hand_to_engine(index)?;
        let data = memory.snapshot(info.offset as usize, info.size as usize)?;
        log::debug!(
            "{}: input {} queued ({} bytes, pts {}, {})",
            core.name,
            index,
            info.size,
            info.presentation_time_us,
            flag
        );

        let result = core.feed(data, info, flag);
        let offer = result.is_ok() && !flag.is_eos() && core.state == Running;
        if let Ok(pool) = core.pool_mut(Direction::Input) {
            pool.recycle(index, offer);
        }
        if offer {
            core.emit(CallbackEvent::InputBufferAvailable(index));
        }
        drop(core);
        self.inner.wake_all();
        result
    }

    pub fn get_output_buffer(&self, index: u32) -> Result<SharedMemory> {
        let mut core = self.inner.core.lock();
        core.state.expect("get_output_buffer", &[Running, EndOfStream])?;
        core.pool_mut(Direction::Output)?.fetch(index)
    }

    /// Returns an output slot. `render` presents it on the output surface;
    /// without a surface it is a no-op.
    pub fn release_output_buffer(&self, index: u32, render: bool) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state.expect("release_output_buffer", &[Running, EndOfStream])?;
        let (info, _) = core.pool_mut(Direction::Output)?.release(index)?;
        if render {
            if let Some(surface) = &core.output_surface {
                surface.render(info.presentation_time_us);
            }
        }
        log::debug!("{}: output {} released (render={})", core.name, index, render);
        let result = core.pump();
        drop(core);
        self.inner.output_ready.notify_waiters();
        result
    }

    /// Waits up to `timeout_us` for a free input slot. Zero polls, a negative
    /// value waits forever.
    pub async fn dequeue_input_buffer(&self, timeout_us: i64) -> Result<u32> {
        let deadline = deadline_for(timeout_us);
        loop {
            let notified = self.inner.input_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut core = self.inner.core.lock();
                core.state.expect("dequeue_input_buffer", &[Running])?;
                if core.input_surface.is_some() {
                    return Err(AvcsError::InvalidOperation("input comes from a surface".into()));
                }
                if let Some((index, _, _)) = core.pool_mut(Direction::Input)?.dequeue() {
                    return Ok(index);
                }
            }
            wait(notified, timeout_us, deadline).await?;
        }
    }

    /// Waits up to `timeout_us` for a filled output slot.
    pub async fn dequeue_output_buffer(&self, timeout_us: i64) -> Result<(u32, BufferInfo, BufferFlag)> {
        let deadline = deadline_for(timeout_us);
        loop {
            let notified = self.inner.output_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut core = self.inner.core.lock();
                core.state.expect("dequeue_output_buffer", &[Running, EndOfStream])?;
                if let Some(ready) = core.pool_mut(Direction::Output)?.dequeue() {
                    return Ok(ready);
                }
            }
            wait(notified, timeout_us, deadline).await?;
        }
    }

    /// Current output format; fills in as the engine discovers the stream.
    pub fn output_format(&self) -> Result<Format> {
        let core = self.inner.core.lock();
        core.state
            .expect("output_format", &[Configured, Running, Flushed, EndOfStream, Error])?;
        Ok(core.engine.as_ref().map(CodecEngine::output_format).unwrap_or_default())
    }

    pub fn input_format(&self) -> Result<Format> {
        let core = self.inner.core.lock();
        core.state
            .expect("input_format", &[Configured, Running, Flushed, EndOfStream, Error])?;
        Ok(core.config.clone())
    }

    /// Creates the surface an encoder reads its input from.
    pub fn create_input_surface(&self) -> Result<Surface> {
        let mut core = self.inner.core.lock();
        core.state.expect("create_input_surface", &[Configured])?;
        if !core.engine_mut()?.supports_input_surface() {
            return Err(AvcsError::InvalidOperation(format!("{} takes no input surface", core.name)));
        }
        let surface = Surface::new(&format!("{}-input", core.name));
        let consumer: Weak<SessionShared> = Arc::downgrade(&self.inner);
        let consumer: Weak<dyn SurfaceConsumer> = consumer;
        surface.set_consumer(consumer);
        if let Some(previous) = core.input_surface.replace(surface.clone()) {
            previous.clear_consumer();
        }
        log::info!("{}: input surface {}", core.name, surface.id());
        Ok(surface)
    }

    /// Directs decoded frames to `surface`.
    pub fn set_output_surface(&self, surface: Surface) -> Result<()> {
        let mut core = self.inner.core.lock();
        core.state
            .expect("set_output_surface", &[Configured, Running, Flushed])?;
        if !core.engine_mut()?.supports_output_surface() {
            return Err(AvcsError::InvalidOperation(format!("{} renders to no surface", core.name)));
        }
        log::info!("{}: output surface {}", core.name, surface.id());
        core.output_surface = Some(surface);
        Ok(())
    }

    /// Number of slots in the pool for `direction`, once allocated.
    pub fn pool_size(&self, direction: Direction) -> Option<usize> {
        let core = self.inner.core.lock();
        match direction {
            Direction::Input => core.input.as_ref().map(BufferPool::len),
            Direction::Output => core.output.as_ref().map(BufferPool::len),
        }
    }

    pub fn slot_state(&self, direction: Direction, index: u32) -> Option<SlotState> {
        let core = self.inner.core.lock();
        let pool = match direction {
            Direction::Input => core.input.as_ref(),
            Direction::Output => core.output.as_ref(),
        };
        pool.and_then(|p| p.state(index))
    }
}

fn deadline_for(timeout_us: i64) -> Option<Instant> {
    if timeout_us > 0 {
        Some(Instant::now() + Duration::from_micros(timeout_us as u64))
    } else {
        None
    }
}

async fn wait(
    notified: std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>,
    timeout_us: i64,
    deadline: Option<Instant>,
) -> Result<()> {
    if timeout_us == 0 {
        return Err(AvcsError::TryAgain("no buffer available".into()));
    }
    match deadline {
        None => {
            notified.await;
            Ok(())
        }
        Some(deadline) => tokio::time::timeout_at(deadline, notified)
            .await
            .map_err(|_| AvcsError::TryAgain(format!("no buffer within {} us", timeout_us))),
    }
}
