//! Engine configuration.
//!
//! Settings are loaded from an INI file. Every key is optional; anything
//! missing keeps the safe default it was constructed with.
//!
//! # Configuration File Format
//!
//! ```ini
//! [physics]
//! gravity_y = -9.8
//! fixed_timestep = 0.0166667
//! max_substeps = 10
//!
//! [scripts]
//! root = ./assets/scripts
//! main = main.lua
//! event_queue_size = 256
//!
//! [loop]
//! target_fps = 60
//! max_frames = 0
//! time_scale = 1.0
//! ```
//!
//! `max_frames = 0` runs until a script requests quit.

use configparser::ini::Ini;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

/// Default safe values for startup
const DEFAULT_GRAVITY_Y: f32 = -9.8;
const DEFAULT_FIXED_TIMESTEP: f32 = 1.0 / 60.0;
const DEFAULT_MAX_SUBSTEPS: u32 = 10;
const DEFAULT_SCRIPT_ROOT: &str = "./assets/scripts";
const DEFAULT_MAIN_SCRIPT: &str = "main.lua";
const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;
const DEFAULT_TARGET_FPS: u32 = 60;
const DEFAULT_MAX_FRAMES: u64 = 0;
const DEFAULT_TIME_SCALE: f32 = 1.0;
const MIN_FIXED_TIMESTEP: f32 = 1e-4;
const MAX_FIXED_TIMESTEP: f32 = 1.0;
const MAX_TIME_SCALE: f32 = 100.0;
const DEFAULT_CONFIG_PATH: &str = "./config.ini";

/// Physics step settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    /// Vertical gravity in m/s².
    pub gravity_y: f32,
    /// Length of one internal simulation step in seconds.
    pub fixed_timestep: f32,
    /// Most internal steps taken per `tick`; leftover time is dropped.
    pub max_substeps: u32,
}

impl PhysicsConfig {
    /// Step length as a `Duration`. Values that are not a positive finite
    /// number of seconds fall back to the default. The result is clamped to
    /// between 0.1 ms and one second.
    pub fn step_duration(&self) -> Duration {
        let seconds = if self.fixed_timestep.is_finite() && self.fixed_timestep > 0.0 {
            self.fixed_timestep.clamp(MIN_FIXED_TIMESTEP, MAX_FIXED_TIMESTEP)
        } else {
            DEFAULT_FIXED_TIMESTEP
        };
        Duration::from_secs_f32(seconds)
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity_y: DEFAULT_GRAVITY_Y,
            fixed_timestep: DEFAULT_FIXED_TIMESTEP,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
        }
    }
}

/// Script bridge settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptConfig {
    /// Directory scripts are resolved against. Also added to `package.path`.
    pub root: PathBuf,
    /// Entry script defining `init()` and `main(dt)`, relative to `root`.
    pub main: PathBuf,
    /// Capacity of the script event queue.
    pub event_queue_size: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_SCRIPT_ROOT),
            main: PathBuf::from(DEFAULT_MAIN_SCRIPT),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }
}

impl ScriptConfig {
    /// Full path of the entry script.
    pub fn main_path(&self) -> PathBuf {
        self.root.join(&self.main)
    }
}

/// Control loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Frame pacing target. `0` disables pacing.
    pub target_fps: u32,
    /// Stop after this many frames. `0` means no limit.
    pub max_frames: u64,
    /// Multiplier applied to measured frame time.
    pub time_scale: f32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            max_frames: DEFAULT_MAX_FRAMES,
            time_scale: DEFAULT_TIME_SCALE,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub physics: PhysicsConfig,
    pub scripts: ScriptConfig,
    pub frame_loop: LoopConfig,
    /// Path to the configuration file.
    pub config_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a new configuration with safe default values.
    pub fn new() -> Self {
        Self {
            physics: PhysicsConfig::default(),
            scripts: ScriptConfig::default(),
            frame_loop: LoopConfig::default(),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Create a new configuration with a custom config file path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            ..Self::new()
        }
    }

    /// Load configuration from the INI file.
    ///
    /// Missing values retain their current (default) values.
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(&mut self) -> Result<(), String> {
        let mut config = Ini::new();
        config
            .load(&self.config_path)
            .map_err(|e| format!("Failed to load config file: {}", e))?;
        self.apply(&config);

        info!(
            "Loaded config: gravity={}, step={:.4}s x{}, scripts={:?}, fps={}, max_frames={}",
            self.physics.gravity_y,
            self.physics.fixed_timestep,
            self.physics.max_substeps,
            self.scripts.main_path(),
            self.frame_loop.target_fps,
            self.frame_loop.max_frames
        );

        Ok(())
    }

    /// Load configuration from INI text instead of a file.
    pub fn load_from_str(&mut self, text: &str) -> Result<(), String> {
        let mut config = Ini::new();
        config
            .read(text.to_string())
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        self.apply(&config);
        Ok(())
    }

    fn apply(&mut self, config: &Ini) {
        // [physics] section
        if let Some(g) = config.getfloat("physics", "gravity_y").ok().flatten() {
            self.physics.gravity_y = g as f32;
        }
        if let Some(step) = config.getfloat("physics", "fixed_timestep").ok().flatten() {
            if step.is_finite() && step > 0.0 {
                self.physics.fixed_timestep = step.min(MAX_FIXED_TIMESTEP as f64) as f32;
            }
        }
        if let Some(n) = config.getuint("physics", "max_substeps").ok().flatten() {
            self.physics.max_substeps = n.max(1) as u32;
        }

        // [scripts] section
        if let Some(root) = config.get("scripts", "root") {
            self.scripts.root = PathBuf::from(root);
        }
        if let Some(main) = config.get("scripts", "main") {
            self.scripts.main = PathBuf::from(main);
        }
        if let Some(size) = config.getuint("scripts", "event_queue_size").ok().flatten() {
            self.scripts.event_queue_size = size.max(1) as usize;
        }

        // [loop] section
        if let Some(fps) = config.getuint("loop", "target_fps").ok().flatten() {
            self.frame_loop.target_fps = fps as u32;
        }
        if let Some(frames) = config.getuint("loop", "max_frames").ok().flatten() {
            self.frame_loop.max_frames = frames;
        }
        if let Some(scale) = config.getfloat("loop", "time_scale").ok().flatten() {
            if scale.is_finite() && scale >= 0.0 {
                self.frame_loop.time_scale = scale.min(MAX_TIME_SCALE as f64) as f32;
            }
        }
    }
}
