//! Tempest headless runner.
//!
//! Runs the demo world on two threads:
//! - the **control thread** (this one) owns the scene, the `rapier3d`
//!   physics world and the LuaJIT script bridge
//! - the **render thread** draws one frame per control frame through a
//!   headless backend
//!
//! # Main Loop
//!
//! 1. Load `config.ini` (defaults if missing)
//! 2. Build the engine, install native operations into Lua, load scripts
//! 3. Start the render thread
//! 4. Per frame: physics step, scene sync, script tick, hand the frame over
//! 5. Stop on `max_frames` or `engine_request_quit()`, join the render thread
//!
//! # Running
//!
//! ```sh
//! cargo run --release -- --frames 600
//! ```

use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tempest::game;
use tempest::resources::engine::Engine;
use tempest::resources::engineconfig::EngineConfig;
use tempest::stub_generator;
use tempest::systems::control::ControlLoop;
use tempest::systems::render_thread::{FrameCoordinator, HeadlessRenderer};

/// Tempest simulation core
#[derive(Parser)]
#[command(version, about = "Headless runner for the Tempest physics/scripting core.")]
struct Cli {
    /// Configuration file.
    #[arg(long, value_name = "PATH", default_value = "./config.ini")]
    config: PathBuf,

    /// Stop after this many frames. Overrides `max_frames` in the config.
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Generate Lua LSP stubs for every native operation and exit.
    /// Optionally provide a path (default: <script root>/engine.lua).
    #[arg(long, value_name = "PATH")]
    create_lua_stubs: Option<Option<PathBuf>>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = EngineConfig::with_path(&cli.config);
    if let Err(e) = config.load_from_file() {
        log::warn!("{}, using defaults", e);
    }
    if let Some(frames) = cli.frames {
        config.frame_loop.max_frames = frames;
    }

    let engine = game::build_engine(&config);

    // Early-exit: generate Lua stubs and quit (no scripts or render thread needed)
    if let Some(maybe_path) = cli.create_lua_stubs {
        let path = maybe_path.unwrap_or_else(|| config.scripts.root.join("engine.lua"));
        let result = game::create_bridge(&config, &engine)
            .and_then(|bridge| stub_generator::generate_stubs(&bridge))
            .and_then(|content| stub_generator::write_stubs(&path, &content));
        match result {
            Ok(()) => println!("Lua stubs written to {}", path.display()),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    log::info!("Tempest starting");
    if let Err(e) = run(config, engine) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: EngineConfig, engine: Rc<RefCell<Engine>>) -> Result<(), String> {
    let mut bridge = game::create_bridge(&config, &engine)?;
    game::setup(&engine, &mut bridge)?;
    let coordinator = FrameCoordinator::spawn(HeadlessRenderer::new())?;
    let mut control = ControlLoop::new(config, engine, bridge, coordinator);
    let frames = control.run()?;
    log::info!(
        "Tempest finished after {} frames ({} rendered)",
        frames,
        control.rendered_frames()
    );
    Ok(())
}
