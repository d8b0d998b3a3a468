//! Frame-grab binary: capture one raw frame from a V4L2 device.

use std::path::PathBuf;

use clap::Parser;
use frame_grab::{CaptureConfig, ControlInfo, DeviceCapabilities, FrameCapture};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "frame-grab",
    version,
    about = "Grab one raw YUYV frame from a V4L2 device"
)]
struct Cli {
    /// List device capabilities and controls before capturing
    #[arg(
        short = 'l',
        long = "list",
        visible_short_alias = 'c',
        visible_alias = "controls"
    )]
    list: bool,

    /// Video device node
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Requested frame width in pixels
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Requested frame height in pixels
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Raw frame output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the share of black pixels in the captured frame
    #[arg(long)]
    black_ratio: bool,
}

impl Cli {
    fn apply(self, mut config: CaptureConfig) -> CaptureConfig {
        if let Some(device) = self.device {
            config.device_path = device;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        config.list_controls = self.list;
        config.black_ratio = self.black_ratio;
        config
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version go to stdout and succeed; usage errors fail.
            let code = i32::from(err.use_stderr());
            err.print().ok();
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.apply(CaptureConfig::from_env());
    let mut session = FrameCapture::open(config)?;

    if session.config().list_controls {
        let caps = session.query_capabilities()?;
        print_capabilities(&caps);
        let controls = session.query_controls()?;
        print_controls(&controls);
    }

    let report = session.run()?;

    println!(
        "Saved {} bytes of {} to {}",
        report.bytes_written,
        report.format,
        report.output_path.display()
    );
    if let Some(ratio) = report.black_pixel_ratio {
        println!("Black pixel ratio: {:.2}%", ratio * 100.0);
    }
    Ok(())
}

fn print_capabilities(caps: &DeviceCapabilities) {
    let (major, minor, patch) = caps.version;
    println!("Driver: {}", caps.driver);
    println!("Card: {}", caps.card);
    println!("Bus info: {}", caps.bus_info);
    println!("Version: {major}.{minor}.{patch}");
    println!(
        "Capabilities: {:#010x} {:?}",
        caps.capabilities,
        v4l::capability::Flags::from_bits_truncate(caps.capabilities)
    );
}

fn print_controls(controls: &[ControlInfo]) {
    if controls.is_empty() {
        println!("Controls: none");
        return;
    }
    println!("Controls:");
    for control in controls {
        println!(
            "  {:#010x} {:<32} {:<10} min={} max={} step={} default={}",
            control.id,
            control.name,
            control.kind,
            control.minimum,
            control.maximum,
            control.step,
            control.default
        );
    }
}
