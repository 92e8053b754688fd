//! Info command - show FFmpeg, channel and preset information

use anyhow::Result;
use rtspcam_core::channel::{self, ChannelGeometry, DEFAULT_CHANNEL_NAME};
use rtspcam_core::config::{ConfigFile, Preset};
use rtspcam_core::decoder;

/// Show system information
pub async fn info() -> Result<()> {
    println!("rtspcam - System Information\n");

    // FFmpeg
    println!("FFmpeg:");
    match decoder::init_runtime() {
        Ok(()) => {
            println!("  [OK] libavformat {}", decoder::ffmpeg_version());
            for (name, available) in decoder::decoder_support() {
                println!(
                    "  {} {} decoder",
                    if available { "[OK]" } else { "[!!]" },
                    name
                );
            }
        }
        Err(e) => {
            println!("  [!!] {}", e);
            println!("  Make sure the FFmpeg shared libraries are installed.");
        }
    }

    println!();

    // Frame channel
    let config = ConfigFile::load_or_default();
    println!("Frame Channel:");
    let mut names = vec![DEFAULT_CHANNEL_NAME];
    if config.output.channel != DEFAULT_CHANNEL_NAME {
        names.push(config.output.channel.as_str());
    }
    for name in names {
        let status = if channel::channel_exists(name) {
            "[OK] active (run 'rtspcam probe' for details)"
        } else {
            "[--] not present"
        };
        println!("  {:<20} {}", name, status);
    }

    println!();
    println!("Config file: {}", ConfigFile::default_path().display());

    println!();
    println!("Supported presets:");
    for preset in [
        Preset::P480_30,
        Preset::P720_30,
        Preset::P720_60,
        Preset::P1080_30,
        Preset::P1080_60,
    ] {
        let region = ChannelGeometry::new(preset.width(), preset.height(), preset.fps())
            .map(|g| format!("{:.1} MB channel", g.total_size as f64 / 1_048_576.0))
            .unwrap_or_default();
        let default = if preset == Preset::default() { " (default)" } else { "" };
        println!(
            "  {:<8} - {}x{} @ {}fps, {}{}",
            preset.to_string(),
            preset.width(),
            preset.height(),
            preset.fps(),
            region,
            default
        );
    }
    println!("  WxH@fps  - custom, even width and height (e.g. 800x600@25)");

    println!();
    println!("Output format: NV12 (BT.601), triple-buffered shared memory");

    Ok(())
}
