use std::env;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use log::{debug, error, info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use shoreline::{
    DragTracker, InputAction, InputQueue, KeyCode, RecordingBackend,
    RenderError, RenderOrchestrator, SceneDescription, Viewport, WgpuRenderer,
};

/// Pixels of a precise scroll delta that count as one wheel line.
const PIXELS_PER_LINE: f32 = 20.0;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let scene = match &options.scene {
        Some(path) => SceneDescription::load(path)
            .with_context(|| format!("failed to load scene {path}"))?,
        None => SceneDescription::beach(),
    };
    info!(
        "scene: {} grounds, {} patches, {} objects",
        scene.grounds.len(),
        scene.patches.len(),
        scene.objects.len()
    );

    if options.summary_only {
        return run_headless(&scene, options.frames.unwrap_or(1));
    }

    match run_interactive(scene.clone(), options.frames) {
        Ok(()) => Ok(()),
        Err(err) if err.downcast_ref::<WindowInitError>().is_some() => {
            eprintln!(
                "{err}. Falling back to --summary-only mode (set DISPLAY or install X11 libs to enable rendering)."
            );
            run_headless(&scene, options.frames.unwrap_or(1))
        }
        Err(err) => Err(err),
    }
}

fn run_headless(scene: &SceneDescription, frames: u64) -> Result<()> {
    let mut world = RenderOrchestrator::new(
        RecordingBackend::new(),
        scene,
        Arc::new(InputQueue::new()),
        Viewport::new(1280, 720),
    )
    .context("failed to build scene")?;

    let summary = world.summary();
    println!(
        "Loaded scene with {} nodes ({} objects, {} patches)",
        summary.nodes, summary.objects, summary.patches
    );
    println!("Grounds: {}", summary.grounds.join(", "));
    println!("Terrain triangles: {}", summary.terrain_triangles);
    println!("Water indices: {}", summary.water_indices);
    println!("Fallbacks: {}", summary.fallbacks);

    for _ in 0..frames {
        world.backend_mut().clear_calls();
        let report = world.frame().context("frame failed")?;
        println!(
            "Frame {}: {} ({} draws)",
            report.index,
            world.backend().pass_sequence().join(" -> "),
            report.draws
        );
    }
    Ok(())
}

fn run_interactive(scene: SceneDescription, frames: Option<u64>) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| WindowInitError::from_error("event loop", err))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(scene, frames);
    event_loop
        .run_app(&mut app)
        .map_err(|err| WindowInitError::from_error("event loop", err))?;

    match app.last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct App {
    scene: SceneDescription,
    input: Arc<InputQueue>,
    world: Option<RenderOrchestrator<WgpuRenderer>>,
    drag: DragTracker,
    shift: bool,
    frame_limit: Option<u64>,
    last_error: Option<anyhow::Error>,
}

impl App {
    fn new(scene: SceneDescription, frame_limit: Option<u64>) -> Self {
        Self {
            scene,
            input: Arc::new(InputQueue::new()),
            world: None,
            drag: DragTracker::default(),
            shift: false,
            frame_limit,
            last_error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title("Shoreline")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        let renderer = block_on(WgpuRenderer::new(window))?;
        let viewport = renderer.viewport();
        let world = RenderOrchestrator::new(renderer, &self.scene, Arc::clone(&self.input), viewport)
            .context("failed to build scene")?;
        let summary = world.summary();
        info!(
            "loaded {} nodes, {} terrain triangles, {} fallbacks",
            summary.nodes, summary.terrain_triangles, summary.fallbacks
        );
        self.world = Some(world);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.last_error = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(world) = self.world.as_mut() else {
            return;
        };
        match world.frame() {
            Ok(report) => {
                if self.frame_limit.is_some_and(|limit| report.index >= limit) {
                    event_loop.exit();
                }
            }
            Err(RenderError::SurfaceLost) => {
                let size = world.backend().window().inner_size();
                world.backend_mut().resize_surface(size);
            }
            Err(RenderError::OutOfMemory) => {
                self.fail(event_loop, anyhow!("GPU is out of memory"));
                return;
            }
            Err(err) => error!("frame failed: {err}"),
        }
        if self.world.as_ref().is_some_and(|world| world.should_quit()) {
            event_loop.exit();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.world.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(world) = self.world.as_mut() else {
            return;
        };
        if world.backend().window_id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                world.backend_mut().resize_surface(size);
                world.resize(Viewport::new(size.width, size.height));
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.shift = modifiers.state().shift_key();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                let key = match &event.logical_key {
                    Key::Named(NamedKey::Escape) => Some(KeyCode::Escape),
                    Key::Character(text) => KeyCode::from_name(text.as_str()),
                    _ => None,
                };
                if let Some(key) = key {
                    if !self.input.push_key(key, self.shift) {
                        debug!("unbound key {key:?}");
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                match button {
                    MouseButton::Left => self.drag.set_left(pressed),
                    MouseButton::Right => self.drag.set_right(pressed),
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let cursor = Vec2::new(position.x as f32, position.y as f32);
                if let Some(action) = self.drag.cursor_moved(cursor) {
                    self.input.push(action);
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let offset = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / PIXELS_PER_LINE,
                };
                self.input.push(InputAction::Scroll { offset });
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(world) = self.world.as_ref() {
            world.backend().window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(world) = self.world.as_ref() {
            let summary = world.summary();
            info!("exiting on ground {}", world.active_ground());
            if summary.fallbacks > 0 {
                warn!("{} assets were replaced by placeholders", summary.fallbacks);
            }
        }
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

struct CliOptions {
    scene: Option<String>,
    summary_only: bool,
    frames: Option<u64>,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut scene = None;
        let mut summary_only = false;
        let mut frames = None;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--summary-only" => summary_only = true,
                "--frames" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--frames expects a count"))?;
                    let count = value
                        .parse::<u64>()
                        .with_context(|| format!("invalid frame count {value}"))?;
                    frames = Some(count);
                }
                other if other.starts_with("--") => {
                    return Err(anyhow!(
                        "Unknown argument: {other}. Usage: shoreline [scene.xml] [--summary-only] [--frames N]"
                    ));
                }
                path if scene.is_none() => scene = Some(path.to_string()),
                extra => return Err(anyhow!("Unexpected argument: {extra}")),
            }
        }
        Ok(Self {
            scene,
            summary_only,
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse_from(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_scene_and_flags() {
        let options = parse(&["beach.xml", "--summary-only", "--frames", "3"]).unwrap();
        assert_eq!(options.scene.as_deref(), Some("beach.xml"));
        assert!(options.summary_only);
        assert_eq!(options.frames, Some(3));
    }

    #[test]
    fn scene_is_optional() {
        let options = parse(&["--summary-only"]).unwrap();
        assert!(options.scene.is_none());
        assert_eq!(options.frames, None);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&["--frames"]).is_err());
        assert!(parse(&["--frames", "many"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["a.xml", "b.xml"]).is_err());
    }
}
