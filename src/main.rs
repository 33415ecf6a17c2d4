//! v4l2-grab binary: list a device's capture settings and capture from it.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::info;

use v4l2_grab::config::DEFAULT_DEVICE;
use v4l2_grab::convert::yuyv_to_rgb24;
use v4l2_grab::pnm::write_ppm;
use v4l2_grab::{CaptureConfig, CaptureDevice, Image, Listener, Result};

/// Capture frames from a V4L2 device
#[derive(Parser, Debug)]
#[command(name = "v4l2-grab")]
#[command(version, about = "Capture frames from a V4L2 device")]
struct Cli {
    /// Device node
    #[arg(default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Index into the supported capture settings
    #[arg(short, long, default_value_t = 0)]
    settings: usize,

    /// List the supported capture settings and exit
    #[arg(short, long)]
    list: bool,

    /// Polls before frames are reported
    #[arg(long, default_value_t = 10)]
    warmup_polls: u32,

    /// Polls while frames are reported
    #[arg(long, default_value_t = 100)]
    polls: u32,

    /// Delay between polls, in milliseconds
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,

    /// Buffers to request from the driver
    #[arg(long, default_value_t = 3)]
    buffers: u32,

    /// Save up to this many frames as PPM files
    #[arg(long, default_value_t = 0)]
    save: usize,

    /// Directory for saved frames
    #[arg(long, default_value = ".")]
    output: PathBuf,
}

/// Prints every capture event and keeps copies of the first frames.
struct Printer {
    keep: usize,
    frames: Vec<Image>,
}

impl Listener for Printer {
    fn on_started(&mut self, device: &CaptureDevice) {
        println!("{} - capture started", device.name());
    }

    fn on_frame_captured(&mut self, device: &CaptureDevice) {
        let Some(captured) = device.captured_image() else {
            return;
        };
        println!(
            "{} - image captured #{} at {:.3} sec",
            device.name(),
            captured.sequence_number(),
            captured.timestamp_in_seconds()
        );
        if self.frames.len() < self.keep {
            self.frames.push(captured.image().clone());
        }
    }

    fn on_stopped(&mut self, device: &CaptureDevice) {
        println!("{} - capture stopped", device.name());
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = CaptureConfig::default().with_buffer_count(cli.buffers);
    let mut device = CaptureDevice::open_with_config(&cli.device, config)?;

    let capabilities = device.capabilities();
    println!("Device: {} ({})", capabilities.card, capabilities.driver);
    println!("Supported capture settings:");
    for (index, settings) in device.supported_capture_settings().iter().enumerate() {
        println!("  [{index}] {settings}");
    }
    if cli.list {
        return Ok(());
    }

    device.start_capture(cli.settings)?;
    let interval = Duration::from_millis(cli.interval_ms);
    for _ in 0..cli.warmup_polls {
        device.update();
        thread::sleep(interval);
    }

    let printer = Rc::new(RefCell::new(Printer {
        keep: cli.save,
        frames: Vec::new(),
    }));
    device.add_listener(&printer);

    let mut delivered = 0;
    for _ in 0..cli.polls {
        delivered += device.update();
        thread::sleep(interval);
    }
    device.stop_capture()?;
    println!("{delivered} frames captured");

    let frames = std::mem::take(&mut printer.borrow_mut().frames);
    save_frames(&frames, &cli.output)
}

fn save_frames(frames: &[Image], dir: &Path) -> Result<()> {
    for (index, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("{index}.ppm"));
        write_ppm(&path, &yuyv_to_rgb24(frame)?)?;
        info!("saved {}", path.display());
    }
    Ok(())
}
