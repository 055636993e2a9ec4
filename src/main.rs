// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "stockcam")]
#[command(about = "Barcode scanning and object detection for product entry")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Scan one barcode and look it up
    Scan {
        /// V4L2 device path (default: configured or first camera)
        #[arg(short, long)]
        camera: Option<String>,

        /// Scan a still image instead of a camera
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Product catalog JSON used for the lookup
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Run object detection with recorded model outputs
    Detect {
        /// Recorded model outputs (JSON)
        #[arg(short, long)]
        replay: PathBuf,

        /// V4L2 device path (default: configured or first camera)
        #[arg(short, long)]
        camera: Option<String>,

        /// Detect on a still image instead of a camera
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Minimum confidence (0.0 - 1.0)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Maximum detections per frame
        #[arg(short, long)]
        max: Option<usize>,

        /// Stop after the first qualifying detection
        #[arg(long)]
        auto_close: bool,

        /// Write the last overlay to a PNG (default: configured overlay directory)
        #[arg(short, long, num_args = 0..=1)]
        overlay: Option<Option<PathBuf>>,
    },

    /// Show the config file location and effective settings
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=stockcam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Config => cli::show_config(cli.config.as_deref(), &config),
        Commands::Scan {
            camera,
            image,
            catalog,
        } => cli::block_on(cli::scan(&config, camera, image, catalog)),
        Commands::Detect {
            replay,
            camera,
            image,
            threshold,
            max,
            auto_close,
            overlay,
        } => cli::block_on(cli::detect(
            &config,
            cli::DetectArgs {
                replay,
                camera,
                image,
                threshold,
                max,
                auto_close,
                overlay,
            },
        )),
    }
}
