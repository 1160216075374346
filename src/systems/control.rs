//! The control thread's frame loop.
//!
//! Every frame runs inside the frame lock: physics step, physics to scene
//! sync, script tick, removals queued during the tick, then the scene
//! snapshot for the render thread. Frame pacing happens after the lock is released.

use crate::resources::engine::Engine;
use crate::resources::engineconfig::EngineConfig;
use crate::resources::frameclock::FrameClock;
use crate::resources::physics::PhysicsWorld;
use crate::resources::scene::Scene;
use crate::resources::script_bridge::ScriptBridge;
use crate::systems::render_thread::FrameCoordinator;
use log::{error, info};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub struct ControlLoop {
    config: EngineConfig,
    engine: Rc<RefCell<Engine>>,
    scene: Rc<RefCell<Scene>>,
    physics: Rc<RefCell<PhysicsWorld>>,
    scripts: ScriptBridge,
    coordinator: FrameCoordinator,
    clock: FrameClock,
    initialized: bool,
    frames: u64,
}

impl ControlLoop {
    pub fn new(
        config: EngineConfig,
        engine: Rc<RefCell<Engine>>,
        scripts: ScriptBridge,
        coordinator: FrameCoordinator,
    ) -> Self {
        let (scene, physics) = {
            let engine = engine.borrow();
            (engine.scene(), engine.physics())
        };
        let clock = FrameClock::with_time_scale(config.frame_loop.time_scale);
        Self {
            config,
            engine,
            scene,
            physics,
            scripts,
            coordinator,
            clock,
            initialized: false,
            frames: 0,
        }
    }

    pub fn engine(&self) -> &Rc<RefCell<Engine>> {
        &self.engine
    }

    pub fn scripts(&self) -> &ScriptBridge {
        &self.scripts
    }

    pub fn scripts_mut(&mut self) -> &mut ScriptBridge {
        &mut self.scripts
    }

    /// Frames handed to the render thread so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn rendered_frames(&self) -> u64 {
        self.coordinator.rendered_frames()
    }

    /// Run one frame advancing the simulation by `delta`.
    ///
    /// Blocks until the render thread is done with the previous frame.
    /// Script `init` runs before the first frame's tick.
    ///
    /// # Errors
    ///
    /// Fails if the render thread is gone or a script call raises.
    pub fn frame(&mut self, delta: Duration, should_close: bool) -> Result<(), String> {
        let Some(mut guard) = self.coordinator.lock() else {
            return Err("render thread is no longer running".to_string());
        };
        guard.set_flags(should_close, self.frames == 0);

        if !self.initialized {
            self.scripts
                .init()
                .map_err(|e| format!("script init failed: {}", e))?;
            self.initialized = true;
        }

        self.physics.borrow_mut().tick(delta);
        self.physics
            .borrow()
            .update_dynamic_objects(&mut self.scene.borrow_mut());

        self.engine.borrow_mut().advance(delta);
        self.scripts
            .tick(delta)
            .map_err(|e| format!("script tick failed: {}", e))?;

        let removed = self.engine.borrow_mut().apply_removals();
        for id in removed {
            self.scripts.unregister_entity(id);
        }

        let view = self.scene.borrow_mut().render_view();
        guard.publish(view);
        guard.release();
        self.frames += 1;
        Ok(())
    }

    /// Run frames until `max_frames` is reached or a script requests quit.
    /// Returns the number of frames run.
    ///
    /// # Errors
    ///
    /// Stops at the first failing frame. The render thread is joined either
    /// way.
    pub fn run(&mut self) -> Result<u64, String> {
        let max_frames = self.config.frame_loop.max_frames;
        let budget = match self.config.frame_loop.target_fps {
            0 => None,
            fps => Some(Duration::from_secs_f64(1.0 / fps as f64)),
        };
        info!(
            "control loop running (max_frames = {}, target_fps = {})",
            max_frames, self.config.frame_loop.target_fps
        );

        let result = loop {
            let started = Instant::now();
            let delta = self.clock.tick();
            let last = (max_frames > 0 && self.frames + 1 >= max_frames)
                || self.engine.borrow().quit_requested();
            if let Err(e) = self.frame(delta, last) {
                error!("{}", e);
                break Err(e);
            }
            if last {
                break Ok(self.frames);
            }
            if let Some(budget) = budget {
                let spent = started.elapsed();
                if spent < budget {
                    std::thread::sleep(budget - spent);
                }
            }
        };

        self.shutdown();
        info!(
            "control loop stopped after {} frames, {:.2}s simulated",
            self.frames,
            self.clock.elapsed.as_secs_f32()
        );
        result
    }

    /// Join the render thread.
    pub fn shutdown(&mut self) {
        self.coordinator.shutdown();
    }
}
