//! CLI entry point for hevc-swarm.
//!
//! Parses arguments, resolves the preset, and runs one batch. Exit codes:
//! 0 when no job failed, 1 on job failure or interrupt, 2 on argument and
//! configuration errors.

use clap::Parser;
use hevc_swarm::{
    check_toolchain, effective_workers, install_signal_handlers, BatchScheduler, EncodeSettings,
    EncoderDriver, SchedulerConfig, ShutdownFlag,
};
use hevc_swarm_config::{parse_rate_pair, PresetFile, PresetValue, ZoneConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

const EXIT_USAGE: u8 = 2;

/// Distributed batch H.265 transcoder: workers cooperate over a shared
/// token directory to divide the inputs without central coordination.
#[derive(Parser, Debug)]
#[command(name = "hevc-swarm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video files
    #[arg(short = 'i', long, num_args = 1.., required_unless_present = "list_presets")]
    inputs: Vec<PathBuf>,

    /// Directory for encoded outputs
    #[arg(short = 'o', long, required_unless_present = "list_presets")]
    output_dir: Option<PathBuf>,

    /// Directory for per-job scratch files (pass statistics)
    #[arg(short = 's', long, required_unless_present = "list_presets")]
    scratch_dir: Option<PathBuf>,

    /// Shared directory for claim token files
    #[arg(short = 't', long, required_unless_present = "list_presets")]
    token_dir: Option<PathBuf>,

    /// Preset name from the preset file
    #[arg(short = 'p', long, required_unless_present = "list_presets")]
    preset: Option<String>,

    /// Path to the preset file
    #[arg(short = 'c', long, default_value = "presets.toml")]
    config: PathBuf,

    /// Concurrent jobs in this process (0 derives from the CPU count)
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Force single-pass encoding regardless of preset
    #[arg(short = '1', long)]
    one_pass: bool,

    /// Title zone as "seconds,multiplier"
    #[arg(long, value_name = "S,M")]
    title_rate: Option<String>,

    /// Closing zone as "seconds,multiplier"
    #[arg(long, value_name = "S,M")]
    closing_rate: Option<String>,

    /// Give first episodes (filenames containing E01) no zone rewrites
    #[arg(long)]
    skip_rate_for_first_episodes: bool,

    /// List preset names from the preset file and exit
    #[arg(short = 'l', long)]
    list_presets: bool,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(level).init();

    let preset_file = match PresetFile::load(&args.config) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.list_presets {
        for name in preset_file.preset_names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }

    // clap enforces these once --list-presets is off the table.
    let (Some(preset_name), Some(output_dir), Some(scratch_dir), Some(token_dir)) =
        (args.preset, args.output_dir, args.scratch_dir, args.token_dir)
    else {
        eprintln!("missing required arguments");
        return ExitCode::from(EXIT_USAGE);
    };

    let mut preset = match preset_file.resolve(&preset_name) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    if args.one_pass {
        preset.set("one_pass", PresetValue::Bool(true));
    }

    let settings = match EncodeSettings::from_preset(&preset) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut zone_config = match ZoneConfig::from_preset(&preset) {
        Ok(z) => z,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    for (raw, slot) in [
        (&args.title_rate, &mut zone_config.title_rate),
        (&args.closing_rate, &mut zone_config.closing_rate),
    ] {
        if let Some(raw) = raw {
            match parse_rate_pair(raw) {
                Ok(pair) => *slot = Some(pair),
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::from(EXIT_USAGE);
                }
            }
        }
    }
    if args.skip_rate_for_first_episodes {
        zone_config.skip_first_episodes = true;
    }

    if let Err(e) = check_toolchain(&settings.ffmpeg_path, &settings.ffprobe_path).await {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let shutdown = ShutdownFlag::new();
    install_signal_handlers(shutdown.clone());

    let scheduler = BatchScheduler::new(
        EncoderDriver::new(settings, zone_config),
        SchedulerConfig {
            output_dir,
            scratch_dir,
            token_dir,
            max_workers: effective_workers(args.jobs),
        },
        shutdown.clone(),
    );

    match scheduler.run(&args.inputs).await {
        Ok(summary) => {
            if summary.success() && !shutdown.requested() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("batch failed: {e}");
            ExitCode::FAILURE
        }
    }
}
