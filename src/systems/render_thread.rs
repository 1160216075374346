//! Frame handoff between the control thread and the render thread.
//!
//! One frame is in flight at a time. The control thread takes the lock with
//! [`FrameCoordinator::lock`], which waits until the render thread has
//! finished the previous frame, mutates the simulation, publishes a
//! [`RenderView`] and releases. Releasing marks the frame ready and wakes the
//! render thread, which records it and marks it processed.
//!
//! ```text
//! control:  lock ─ step/scripts ─ publish ─ release ─┐         lock (waits) ...
//! render:                                 wait ready └─ record ─ processed ┘
//! ```
//!
//! Shutdown is cooperative: the last frame carries `should_close`, the render
//! thread exits after drawing it and the coordinator joins it.

use crate::resources::scene::{Dynamism, RenderView};
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Per-frame sequence of the render collaborator.
///
/// Only ever called from the render thread, in this order.
pub trait RenderBackend: Send + 'static {
    /// Not called for the first frame.
    fn start_frame(&mut self, delta: Duration);
    fn record_scene(&mut self, view: &RenderView);
    fn render(&mut self);
    fn swap(&mut self);
    fn end_frame(&mut self);
}

struct FrameState {
    ready: bool,
    processed: bool,
    should_close: bool,
    first_frame: bool,
    close_sent: bool,
    render_alive: bool,
    rendered_frames: u64,
    view: RenderView,
}

struct Shared {
    state: Mutex<FrameState>,
    signal: Condvar,
}

pub struct FrameCoordinator {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl FrameCoordinator {
    /// Start the render thread with `renderer`.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn<R: RenderBackend>(renderer: R) -> Result<Self, String> {
        let shared = Arc::new(Shared {
            state: Mutex::new(FrameState {
                ready: false,
                processed: true,
                should_close: false,
                first_frame: true,
                close_sent: false,
                render_alive: true,
                rendered_frames: 0,
                view: RenderView::default(),
            }),
            signal: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || render_loop(thread_shared, renderer))
            .map_err(|e| format!("cannot start render thread: {}", e))?;
        info!(target: "render", "render thread started");
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Wait until the previous frame is processed and take the frame lock.
    ///
    /// Returns `None` once the render thread has exited.
    pub fn lock(&self) -> Option<FrameGuard<'_>> {
        let mut state = self.shared.state.lock();
        while !state.processed && state.render_alive {
            self.shared.signal.wait(&mut state);
        }
        if !state.render_alive {
            return None;
        }
        state.processed = false;
        Some(FrameGuard {
            state,
            signal: &self.shared.signal,
        })
    }

    /// Frames the render thread has completed so far.
    pub fn rendered_frames(&self) -> u64 {
        self.shared.state.lock().rendered_frames
    }

    pub fn is_render_alive(&self) -> bool {
        self.shared.state.lock().render_alive
    }

    /// Finish the frame in flight, send a closing frame if none was sent
    /// yet, and join the render thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            while !state.processed && state.render_alive {
                self.shared.signal.wait(&mut state);
            }
            if state.render_alive && !state.close_sent {
                debug!(target: "render", "sending closing frame");
                state.processed = false;
                state.should_close = true;
                state.close_sent = true;
                state.first_frame = false;
                state.ready = true;
                self.shared.signal.notify_all();
            }
        }
        if handle.join().is_err() {
            error!(target: "render", "render thread panicked");
        } else {
            info!(target: "render", "render thread joined");
        }
    }
}

impl Drop for FrameCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive access to the frame being prepared.
///
/// Dropping the guard hands the frame to the render thread.
pub struct FrameGuard<'a> {
    state: MutexGuard<'a, FrameState>,
    signal: &'a Condvar,
}

impl FrameGuard<'_> {
    pub fn set_flags(&mut self, should_close: bool, first_frame: bool) {
        self.state.should_close = should_close;
        self.state.first_frame = first_frame;
        if should_close {
            self.state.close_sent = true;
        }
    }

    pub fn publish(&mut self, view: RenderView) {
        self.state.view = view;
    }

    /// Mark the frame ready and wake the render thread.
    pub fn release(self) {}
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.state.ready = true;
        self.signal.notify_all();
    }
}

/// Clears `render_alive` however the render loop ends.
struct AliveGuard(Arc<Shared>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.render_alive = false;
        self.0.signal.notify_all();
    }
}

fn render_loop<R: RenderBackend>(shared: Arc<Shared>, mut renderer: R) {
    let _alive = AliveGuard(shared.clone());
    let mut last = Instant::now();
    loop {
        let (mut view, should_close, first_frame) = {
            let mut state = shared.state.lock();
            while !state.ready {
                shared.signal.wait(&mut state);
            }
            state.ready = false;
            (
                std::mem::take(&mut state.view),
                state.should_close,
                state.first_frame,
            )
        };

        let now = Instant::now();
        if !first_frame {
            renderer.start_frame(now - last);
        }
        last = now;
        view.compute_bounds(Dynamism::Dynamic);
        renderer.record_scene(&view);
        renderer.render();
        renderer.swap();
        renderer.end_frame();

        {
            let mut state = shared.state.lock();
            state.processed = true;
            state.rendered_frames += 1;
            shared.signal.notify_all();
        }
        if should_close {
            break;
        }
    }
    debug!(target: "render", "render loop finished");
}

/// Backend without a window or GPU. Counts frames and logs them.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    frames: u64,
    instances: usize,
    last_delta: Duration,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderBackend for HeadlessRenderer {
    fn start_frame(&mut self, delta: Duration) {
        self.last_delta = delta;
    }

    fn record_scene(&mut self, view: &RenderView) {
        self.instances = view.instances.len();
        debug!(
            target: "render",
            "frame {}: {} instances ({} dynamic bounds)",
            view.frame,
            self.instances,
            view.bounds(Dynamism::Dynamic).len()
        );
    }

    fn render(&mut self) {}

    fn swap(&mut self) {}

    fn end_frame(&mut self) {
        self.frames += 1;
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        info!(
            target: "render",
            "headless renderer drew {} frames, last delta {:?}",
            self.frames,
            self.last_delta
        );
    }
}
