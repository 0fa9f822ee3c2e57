use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use clap::Parser;
use pixels::{Pixels, SurfaceTexture};
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source, source::SquareWave};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, KeyCode, NamedKey},
    window::{Window, WindowId},
};

use schip_rust::emu::{MAX_PROGRAM_SIZE, Machine, MachineError, Mode, Runner};

/// The rate at which pixels fade out (phosphor decay).
const DISPLAY_PHOSPHOR_RATE: f32 = 10.0;

/// Logical pixels per framebuffer cell for the initial window size.
const WINDOW_SCALE: u32 = 10;

/// Mapping from physical keyboard keys to the hex keypad (0x0-0xF).
const KEY_MAP: [KeyCode; 16] = [
    KeyCode::KeyX,   // 0x00
    KeyCode::Digit1, // 0x01
    KeyCode::Digit2, // 0x02
    KeyCode::Digit3, // 0x03
    KeyCode::KeyQ,   // 0x04
    KeyCode::KeyW,   // 0x05
    KeyCode::KeyE,   // 0x06
    KeyCode::KeyA,   // 0x07
    KeyCode::KeyS,   // 0x08
    KeyCode::KeyD,   // 0x09
    KeyCode::KeyZ,   // 0x0A
    KeyCode::KeyC,   // 0x0B
    KeyCode::Digit4, // 0x0C
    KeyCode::KeyR,   // 0x0D
    KeyCode::KeyF,   // 0x0E
    KeyCode::KeyV,   // 0x0F
];

struct App {
    pixels: Option<Pixels<'static>>,
    window: Option<Arc<Window>>,
    /// Brightness of each cell (0.0 to 1.0) for the phosphor decay effect.
    /// Resized together with the pixel buffer on a mode switch.
    display_float: Vec<f32>,
    /// Dimensions the pixel buffer is currently allocated for.
    buffer_size: (usize, usize),

    /// Audio output stream (must be kept alive).
    _audio_stream: OutputStream,
    audio_sink: Sink,

    runner: Runner,
    /// Used for delta time calculation.
    last_frame_instant: Instant,

    /// Stores the result of the application to be returned from main.
    exit_result: anyhow::Result<()>,
}

impl App {
    fn new(rom: &[u8], mode: Mode) -> anyhow::Result<Self> {
        // Initialize audio
        let mut _audio_stream = OutputStreamBuilder::open_default_stream()
            .context("Failed to open audio output stream")?;
        _audio_stream.log_on_drop(false);

        let audio_sink = Sink::connect_new(_audio_stream.mixer());
        audio_sink.pause();
        audio_sink.append(SquareWave::new(440.0).amplify(0.5));

        // Initialize the machine. Loads past the end of memory are silently
        // ignored by the core, so size-check here where we can report it.
        anyhow::ensure!(
            rom.len() <= MAX_PROGRAM_SIZE,
            "ROM is {} bytes, the maximum is {}",
            rom.len(),
            MAX_PROGRAM_SIZE
        );
        let mut machine = Machine::new(mode);
        machine.load_program(rom);

        let fb = machine.framebuffer();
        let buffer_size = (fb.width(), fb.height());

        Ok(Self {
            pixels: None,
            window: None,
            display_float: vec![0.0; buffer_size.0 * buffer_size.1],
            buffer_size,

            _audio_stream,
            audio_sink,

            runner: Runner::new(machine),
            last_frame_instant: Instant::now(),
            exit_result: Ok(()),
        })
    }

    /// Reallocates the pixel and decay buffers after a video mode switch.
    fn sync_buffer_size(&mut self) -> anyhow::Result<()> {
        let fb = self.runner.machine().framebuffer();
        let size = (fb.width(), fb.height());
        if size == self.buffer_size {
            return Ok(());
        }

        self.pixels
            .as_mut()
            .unwrap()
            .resize_buffer(size.0 as u32, size.1 as u32)
            .context("Failed to resize pixel buffer")?;
        self.display_float = vec![0.0; size.0 * size.1];
        self.buffer_size = size;
        Ok(())
    }

    fn process_display(&mut self, dt: f32) {
        let cells = self.runner.machine().framebuffer().cells();
        let buff = self.pixels.as_mut().unwrap().frame_mut();

        for (i, pxl) in buff.chunks_exact_mut(4).enumerate() {
            // display_float tracks the "brightness" of each cell over time,
            // so pixels fade out slowly instead of turning off instantly.
            self.display_float[i] = if cells[i] != 0 {
                1.0
            } else {
                (self.display_float[i] - DISPLAY_PHOSPHOR_RATE * dt).max(0.0)
            };

            let rgba = [0, 0xFF, 0, (self.display_float[i] * 255.0) as u8];
            pxl.copy_from_slice(&rgba);
        }
    }

    fn try_resumed(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let (width, height) = self.buffer_size;

        let window = {
            let size = LogicalSize::new(width as u32 * WINDOW_SCALE, height as u32 * WINDOW_SCALE);
            let min_size = LogicalSize::new(width as u32, height as u32);

            Arc::new(
                event_loop
                    .create_window(
                        Window::default_attributes()
                            .with_title("schip-rust")
                            .with_inner_size(size)
                            .with_min_inner_size(min_size),
                    )
                    .context("Failed to create window")?,
            )
        };

        self.window = Some(window.clone());
        self.pixels = {
            let window_size = window.inner_size();
            let surface_texture =
                SurfaceTexture::new(window_size.width, window_size.height, window.clone());

            let pixels = Pixels::new(width as u32, height as u32, surface_texture)
                .context("Failed to create pixels surface")?;

            window.request_redraw();
            Some(pixels)
        };

        // Avoid large dt on first frame
        self.last_frame_instant = Instant::now();
        Ok(())
    }

    fn try_window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        event: WindowEvent,
    ) -> anyhow::Result<()> {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                self.pixels
                    .as_mut()
                    .unwrap()
                    .resize_surface(size.width, size.height)
                    .context("Failed to resize pixels surface")?;
            }

            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - self.last_frame_instant).as_secs_f32();
                self.last_frame_instant = now;

                match self.runner.update(dt) {
                    Ok(_) => {}
                    // 00FD is an orderly shutdown, not a failure
                    Err(MachineError::QuitRequested) => {
                        event_loop.exit();
                        return Ok(());
                    }
                    Err(e) => return Err(e).context("Emulation halted"),
                }

                if self.runner.should_beep() {
                    self.audio_sink.play();
                } else {
                    self.audio_sink.pause();
                }

                self.sync_buffer_size()?;
                self.process_display(dt);
                self.runner.machine_mut().consume_dirty_flag(true);

                self.pixels
                    .as_ref()
                    .unwrap()
                    .render()
                    .context("Pixels render error")?;

                self.window.as_ref().unwrap().request_redraw();
            }

            WindowEvent::KeyboardInput { event, .. } => match event.state {
                ElementState::Pressed => {
                    if let Some(key) = KEY_MAP.iter().position(|&k| k == event.physical_key) {
                        self.runner.set_key(key as u8, true);
                    }
                }
                ElementState::Released => {
                    if let Some(key) = KEY_MAP.iter().position(|&k| k == event.physical_key) {
                        self.runner.set_key(key as u8, false);
                    }
                }
            },

            _ => (),
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.try_resumed(event_loop) {
            self.exit_result = Err(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Err(e) = self.try_window_event(event_loop, event) {
            self.exit_result = Err(e);
            event_loop.exit();
        }
    }
}

/// CHIP-8 / SCHIP emulator written in Rust.
///
/// Keys 1-4, Q-R, A-F, Z-V map to the hex keypad.
/// Escape is used to exit the emulator.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Path to the ROM file (.ch8)
    rom_path: PathBuf,

    /// Start in SCHIP (128x64) video mode instead of CHIP-8 (64x32)
    #[arg(long)]
    schip: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let rom = std::fs::read(&args.rom_path).context("Failed to read ROM file")?;
    let mode = if args.schip { Mode::Schip } else { Mode::Chip8 };

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(&rom, mode).context("Failed to initialize application")?;
    event_loop
        .run_app(&mut app)
        .context("Error occurred during event loop execution")?;

    // Return the result captured during the event loop
    app.exit_result
}
