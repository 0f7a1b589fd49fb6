//! Opaque producer/consumer handle standing in for a graphics buffer queue.
//!
//! A decoder presents output on a surface; an encoder may consume its input
//! from one. Across the service boundary a surface travels as an object
//! reference, never as raw data.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Notified when a producer queues a frame on a surface.
pub trait SurfaceConsumer: Send + Sync {
    fn on_frame_available(&self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceFrame {
    pub data: Bytes,
    pub pts_us: i64,
}

struct SurfaceInner {
    id: u64,
    name: String,
    frames: Mutex<VecDeque<SurfaceFrame>>,
    consumer: Mutex<Option<Weak<dyn SurfaceConsumer>>>,
    rendered: AtomicU64,
    last_rendered_pts: AtomicI64,
}

#[derive(Clone)]
pub struct Surface {
    inner: Arc<SurfaceInner>,
}

impl Surface {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                frames: Mutex::new(VecDeque::new()),
                consumer: Mutex::new(None),
                rendered: AtomicU64::new(0),
                last_rendered_pts: AtomicI64::new(-1),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Producer side: hands a frame to whoever consumes this surface.
    pub fn queue_frame(&self, data: impl Into<Bytes>, pts_us: i64) {
        self.inner.frames.lock().push_back(SurfaceFrame {
            data: data.into(),
            pts_us,
        });
        // The consumer lock is released before the callback runs.
        let consumer = self.inner.consumer.lock().as_ref().and_then(Weak::upgrade);
        if let Some(consumer) = consumer {
            consumer.on_frame_available();
        }
    }

    pub fn pending_frames(&self) -> usize {
        self.inner.frames.lock().len()
    }

    /// Number of buffers presented on this surface.
    pub fn rendered_frames(&self) -> u64 {
        self.inner.rendered.load(Ordering::Acquire)
    }

    pub fn last_rendered_pts(&self) -> Option<i64> {
        match self.inner.last_rendered_pts.load(Ordering::Acquire) {
            pts if pts < 0 => None,
            pts => Some(pts),
        }
    }

    pub(crate) fn set_consumer(&self, consumer: Weak<dyn SurfaceConsumer>) {
        *self.inner.consumer.lock() = Some(consumer);
    }

    pub(crate) fn clear_consumer(&self) {
        *self.inner.consumer.lock() = None;
    }

    pub(crate) fn acquire_frame(&self) -> Option<SurfaceFrame> {
        self.inner.frames.lock().pop_front()
    }

    pub(crate) fn render(&self, pts_us: i64) {
        self.inner.last_rendered_pts.store(pts_us, Ordering::Release);
        self.inner.rendered.fetch_add(1, Ordering::AcqRel);
    }

    pub fn ptr_eq(&self, other: &Surface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("rendered", &self.rendered_frames())
            .finish()
    }
}
