use std::any::Any;
use std::env;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode as WinitKey, PhysicalKey};
use winit::window::{CursorGrabMode, Window, WindowId};

use flycam::{
    App, AppConfig, EventQueue, FrameState, HeadlessBackend, InputEvent, KeyCode,
    MotionAccumulator, NamedKey, RenderError, ShaderSource, WgpuBackend,
};

const DEFAULT_HEADLESS_FRAMES: u64 = 60;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let config = match &options.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let source = ShaderSource::load(&config.shader_dir);

    println!(
        "Rendering {} mesh(es) with shaders from {}",
        config.meshes.len(),
        config.shader_dir.display()
    );

    if options.headless {
        run_headless(
            config,
            &source,
            options.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES),
        )
    } else {
        run_windowed(config, source, options.frames)
    }
}

fn run_headless(config: AppConfig, source: &ShaderSource, frames: u64) -> Result<()> {
    let mut app = App::new(config, HeadlessBackend::new(), source)
        .map_err(|err| classify(err, "failed to initialize renderer"))?;
    let mut input = EventQueue::new();
    app.run(&mut input, Some(frames))
        .map_err(|err| classify(err, "frame loop failed"))?;
    app.print_final_state();
    app.shutdown();
    Ok(())
}

fn run_windowed(config: AppConfig, source: ShaderSource, max_frames: Option<u64>) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut handler = FlycamHandler {
        pending: Some(config),
        source,
        max_frames,
        app: None,
        input: EventQueue::new(),
        motion: MotionAccumulator::new(),
        last_error: None,
    };
    event_loop
        .run_app(&mut handler)
        .context("event loop terminated abnormally")?;

    if let Some(mut app) = handler.app.take() {
        app.print_final_state();
        app.shutdown();
    }
    if let Some(err) = handler.last_error {
        return Err(err);
    }
    Ok(())
}

struct FlycamHandler {
    pending: Option<AppConfig>,
    source: ShaderSource,
    max_frames: Option<u64>,
    app: Option<App<WgpuBackend>>,
    input: EventQueue,
    motion: MotionAccumulator,
    last_error: Option<anyhow::Error>,
}

impl FlycamHandler {
    fn start(&mut self, event_loop: &ActiveEventLoop, config: AppConfig) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        capture_cursor(&window);

        let backend = block_on(WgpuBackend::new(Arc::clone(&window)))?;
        let mut app = App::new(config, backend, &self.source)
            .map_err(|err| classify(err, "failed to initialize renderer"))?;
        let size = window.inner_size();
        app.resize(size.width, size.height);
        window.request_redraw();
        self.app = Some(app);
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(app) = self.app.as_mut() else {
            return Ok(());
        };
        if self.max_frames.is_some_and(|limit| app.frames() >= limit) {
            self.input.push(InputEvent::Quit);
        }
        let state = app
            .tick(&mut self.input)
            .map_err(|err| classify(err, "frame loop failed"))?;
        if state != FrameState::Running {
            event_loop.exit();
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.last_error = Some(err);
        event_loop.exit();
    }

    fn handle_keyboard(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let Some(key) = map_keycode(code) else {
            return;
        };
        match event.state {
            ElementState::Pressed => self.input.push(InputEvent::KeyDown(key)),
            ElementState::Released => self.input.push(InputEvent::KeyUp(key)),
        }
    }
}

impl ApplicationHandler for FlycamHandler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(config) = self.pending.take() {
            if let Err(err) = self.start(event_loop, config) {
                self.fail(event_loop, err);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.input.push(InputEvent::Quit);
            }
            WindowEvent::Resized(size) => {
                if let Some(app) = self.app.as_mut() {
                    app.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_keyboard(&event);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw(event_loop) {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if let Some(motion) = self.motion.accumulate(delta.0, delta.1) {
                self.input.push(motion);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(app) = self.app.as_ref() {
            app.backend().window().request_redraw();
        }
    }
}

/// Tags a render failure as a configuration problem or a driver failure.
fn classify(err: RenderError, action: &str) -> anyhow::Error {
    let kind = match &err {
        err if err.is_configuration() => "configuration error",
        RenderError::Mesh(_) => "invalid mesh data",
        _ => "GPU error",
    };
    anyhow::Error::new(err).context(format!("{action} ({kind})"))
}

/// Hides the pointer and keeps it inside the window so motion stays relative.
fn capture_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    match grabbed {
        Ok(()) => info!("cursor captured"),
        Err(err) => warn!("unable to capture cursor: {err}"),
    }
    window.set_cursor_visible(false);
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

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

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

fn map_keycode(code: WinitKey) -> Option<KeyCode> {
    Some(match code {
        WinitKey::Space => KeyCode::Named(NamedKey::Space),
        WinitKey::Enter => KeyCode::Named(NamedKey::Enter),
        WinitKey::Tab => KeyCode::Named(NamedKey::Tab),
        WinitKey::ArrowLeft => KeyCode::Named(NamedKey::Left),
        WinitKey::ArrowRight => KeyCode::Named(NamedKey::Right),
        WinitKey::ArrowUp => KeyCode::Named(NamedKey::Up),
        WinitKey::ArrowDown => KeyCode::Named(NamedKey::Down),
        WinitKey::Escape => KeyCode::Named(NamedKey::Escape),
        WinitKey::Backspace => KeyCode::Named(NamedKey::Backspace),
        WinitKey::ShiftLeft => KeyCode::Named(NamedKey::LeftShift),
        WinitKey::ShiftRight => KeyCode::Named(NamedKey::RightShift),
        WinitKey::ControlLeft => KeyCode::Named(NamedKey::LeftCtrl),
        WinitKey::ControlRight => KeyCode::Named(NamedKey::RightCtrl),
        WinitKey::Digit0 => KeyCode::Digit(0),
        WinitKey::Digit1 => KeyCode::Digit(1),
        WinitKey::Digit2 => KeyCode::Digit(2),
        WinitKey::Digit3 => KeyCode::Digit(3),
        WinitKey::Digit4 => KeyCode::Digit(4),
        WinitKey::Digit5 => KeyCode::Digit(5),
        WinitKey::Digit6 => KeyCode::Digit(6),
        WinitKey::Digit7 => KeyCode::Digit(7),
        WinitKey::Digit8 => KeyCode::Digit(8),
        WinitKey::Digit9 => KeyCode::Digit(9),
        WinitKey::KeyA => KeyCode::Character('A'),
        WinitKey::KeyB => KeyCode::Character('B'),
        WinitKey::KeyC => KeyCode::Character('C'),
        WinitKey::KeyD => KeyCode::Character('D'),
        WinitKey::KeyE => KeyCode::Character('E'),
        WinitKey::KeyF => KeyCode::Character('F'),
        WinitKey::KeyG => KeyCode::Character('G'),
        WinitKey::KeyH => KeyCode::Character('H'),
        WinitKey::KeyI => KeyCode::Character('I'),
        WinitKey::KeyJ => KeyCode::Character('J'),
        WinitKey::KeyK => KeyCode::Character('K'),
        WinitKey::KeyL => KeyCode::Character('L'),
        WinitKey::KeyM => KeyCode::Character('M'),
        WinitKey::KeyN => KeyCode::Character('N'),
        WinitKey::KeyO => KeyCode::Character('O'),
        WinitKey::KeyP => KeyCode::Character('P'),
        WinitKey::KeyQ => KeyCode::Character('Q'),
        WinitKey::KeyR => KeyCode::Character('R'),
        WinitKey::KeyS => KeyCode::Character('S'),
        WinitKey::KeyT => KeyCode::Character('T'),
        WinitKey::KeyU => KeyCode::Character('U'),
        WinitKey::KeyV => KeyCode::Character('V'),
        WinitKey::KeyW => KeyCode::Character('W'),
        WinitKey::KeyX => KeyCode::Character('X'),
        WinitKey::KeyY => KeyCode::Character('Y'),
        WinitKey::KeyZ => KeyCode::Character('Z'),
        WinitKey::F1 => KeyCode::Function(1),
        WinitKey::F2 => KeyCode::Function(2),
        WinitKey::F3 => KeyCode::Function(3),
        WinitKey::F4 => KeyCode::Function(4),
        WinitKey::F5 => KeyCode::Function(5),
        WinitKey::F6 => KeyCode::Function(6),
        WinitKey::F7 => KeyCode::Function(7),
        WinitKey::F8 => KeyCode::Function(8),
        WinitKey::F9 => KeyCode::Function(9),
        WinitKey::F10 => KeyCode::Function(10),
        WinitKey::F11 => KeyCode::Function(11),
        WinitKey::F12 => KeyCode::Function(12),
        _ => return None,
    })
}

struct CliOptions {
    config: Option<PathBuf>,
    headless: bool,
    frames: Option<u64>,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        const USAGE: &str = "Usage: flycam [--config <file.json>] [--headless] [--frames <n>]";
        let mut args = env::args().skip(1);
        let mut config = None;
        let mut headless = false;
        let mut frames = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow!("--config expects a path. {USAGE}"))?;
                    config = Some(PathBuf::from(path));
                }
                "--headless" => headless = true,
                "--frames" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--frames expects a count. {USAGE}"))?;
                    let count = value
                        .parse::<u64>()
                        .with_context(|| format!("invalid frame count {value}"))?;
                    frames = Some(count);
                }
                "--help" | "-h" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
            }
        }
        Ok(Self {
            config,
            headless,
            frames,
        })
    }
}
