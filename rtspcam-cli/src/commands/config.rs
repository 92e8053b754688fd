//! Config command - inspect and create the settings file

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use rtspcam_core::{
    config::{sample_config, ConfigFile, RelayConfig},
    convert::ImageAdjustments,
    types::StreamSource,
};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the path of the settings file
    Path,

    /// Show the relay settings `rtspcam start` would use
    Show {
        /// Settings file to read instead of the default
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Validate the settings file, failing on values that cannot work
    Check {
        /// Settings file to read instead of the default
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write the commented sample to the settings path
    Init {
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the commented sample to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => println!("{}", ConfigFile::default_path().display()),
        ConfigCommand::Show { file } => {
            let (path, config) = resolve(file.as_deref())?;
            describe_origin(&path);
            print_summary(&config);
            println!();
            print_warnings(&config);
            match config.validate_strict() {
                Ok(()) => println!("Settings are usable."),
                Err(e) => println!("Settings cannot be used: {}", e),
            }
        }
        ConfigCommand::Check { file } => {
            let (path, config) = resolve(file.as_deref())?;
            print_warnings(&config);
            config
                .validate_strict()
                .with_context(|| format!("{} is not usable", path.display()))?;
            println!("{} is valid.", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = ConfigFile::default_path();
            if !ConfigFile::write_sample_to(&path, force)? {
                bail!(
                    "{} already exists; pass --force to replace it",
                    path.display()
                );
            }
            println!("Created {}", path.display());
            println!("Set [stream] url to relay a camera with a bare `rtspcam start`.");
        }
        ConfigCommand::Sample => print!("{}", sample_config()),
    }

    Ok(())
}

/// Load a settings file and merge it into relay settings
///
/// A file without a stream URL resolves against the test pattern so the
/// remaining settings can still be shown.
fn resolve(file: Option<&Path>) -> Result<(PathBuf, RelayConfig)> {
    let path = file.map_or_else(ConfigFile::default_path, Path::to_path_buf);
    let settings = ConfigFile::load_from(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let source = settings
        .stream
        .url
        .is_none()
        .then_some(StreamSource::TestPattern);
    let config = settings
        .relay_config(source)
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok((path, config))
}

fn describe_origin(path: &Path) {
    if path.exists() {
        println!("Settings from {}\n", path.display());
    } else {
        println!("No file at {}, showing built-in defaults\n", path.display());
    }
}

fn print_warnings(config: &RelayConfig) {
    let warnings = config.validate();
    if warnings.is_empty() {
        return;
    }
    println!("Warnings:");
    for warning in &warnings {
        println!("  - {}", warning);
    }
    println!();
}

fn describe_adjustments(adjustments: &ImageAdjustments) -> String {
    if adjustments.is_identity() {
        return "none".to_string();
    }
    let mut parts = Vec::new();
    if adjustments.flip_horizontal {
        parts.push("mirror".to_string());
    }
    if adjustments.flip_vertical {
        parts.push("flip".to_string());
    }
    if adjustments.brightness != 0 {
        parts.push(format!("brightness {:+}", adjustments.brightness));
    }
    if adjustments.contrast != 0 {
        parts.push(format!("contrast {:+}", adjustments.contrast));
    }
    parts.join(", ")
}

/// Print the relay settings a session will run with
pub(crate) fn print_summary(config: &RelayConfig) {
    println!("Configuration:");
    println!("  Source:      {}", config.source);
    println!("  Preset:      {}", config.preset);
    println!("  Resolution:  {}x{}", config.width(), config.height());
    println!("  Framerate:   {} fps", config.fps());
    println!(
        "  Channel:     {} ({:.1} MB/s)",
        config.channel_name,
        config.preset.channel_bandwidth() as f64 / 1_000_000.0
    );
    if config.source.is_network() {
        println!("  Transport:   {}", config.transport);
        println!("  Timeout:     {} ms", config.timeout_ms);
        match config.reconnect_delay_ms {
            0 => println!("  Reconnect:   off"),
            delay => println!("  Reconnect:   after {} ms", delay),
        }
    }
    println!("  Publish:     {}", describe_adjustments(&config.publish));
    match config.preview_interval {
        0 => println!("  Preview:     off"),
        n => println!(
            "  Preview:     every {} frames, {}",
            n,
            describe_adjustments(&config.preview)
        ),
    }
}
