//! drumgrid CLI - render patterns to WAV or play them live.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use drumgrid_core::config::EngineConfig;
use drumgrid_core::dsp::renderer::RenderRequest;
use drumgrid_core::export::Exporter;
use drumgrid_core::pattern::{PRESETS, Pattern, preset};
use drumgrid_core::scheduler::DEFAULT_BPM;
use drumgrid_core::settings::EffectAmounts;
use drumgrid_core::store::PatternStore;

#[derive(Parser)]
#[command(name = "drumgrid")]
#[command(about = "Step-sequenced drum synthesizer", long_about = None)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in presets
    Presets,

    /// Render a pattern to a timestamped WAV file
    Render {
        #[command(flatten)]
        source: PatternArgs,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Play a pattern through the default output device
    #[cfg(feature = "device")]
    Play {
        #[command(flatten)]
        source: PatternArgs,

        /// How long to play, in seconds
        #[arg(short, long, default_value = "8.0")]
        seconds: f64,
    },
}

#[derive(Args)]
struct PatternArgs {
    /// Built-in preset name
    #[arg(long, conflicts_with_all = ["pattern", "saved"])]
    preset: Option<String>,

    /// Pattern file: JSON array of 10 rows of 16 booleans
    #[arg(long)]
    pattern: Option<PathBuf>,

    /// Name of a pattern in the saved-pattern store
    #[arg(long)]
    saved: Option<String>,

    /// Saved-pattern store file
    #[arg(long)]
    store: Option<PathBuf>,

    /// Tempo (clamped to 40-240)
    #[arg(long, default_value_t = DEFAULT_BPM)]
    bpm: f64,

    /// Global reverb, 0-100
    #[arg(long, default_value_t = 0.0)]
    reverb: f64,

    /// Global delay, 0-100
    #[arg(long, default_value_t = 0.0)]
    delay: f64,

    /// Global distortion, 0-100
    #[arg(long, default_value_t = 0.0)]
    distortion: f64,
}

impl PatternArgs {
    fn effects(&self) -> EffectAmounts {
        EffectAmounts::new(self.reverb, self.delay, self.distortion)
    }

    fn resolve(&self) -> Result<Pattern, String> {
        if let Some(name) = &self.preset {
            return preset(name).ok_or_else(|| format!("unknown preset '{name}'"));
        }
        if let Some(path) = &self.pattern {
            let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
            return serde_json::from_str(&json).map_err(|e| format!("{}: invalid pattern: {e}", path.display()));
        }
        if let Some(name) = &self.saved {
            let store = self.load_store()?;
            return store
                .get(name)
                .copied()
                .ok_or_else(|| format!("no saved pattern named '{name}'"));
        }
        preset(PRESETS[0].name).ok_or_else(|| "no built-in presets".to_string())
    }

    fn load_store(&self) -> Result<PatternStore, String> {
        let path = match &self.store {
            Some(path) => path.clone(),
            None => default_store_path().ok_or("no store path; pass --store")?,
        };
        Ok(PatternStore::load(&path))
    }
}

#[cfg(feature = "dirs")]
fn default_store_path() -> Option<PathBuf> {
    PatternStore::default_path()
}

#[cfg(not(feature = "dirs"))]
fn default_store_path() -> Option<PathBuf> {
    None
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Presets => {
            for p in &PRESETS {
                println!("{:<12} {:>3} hits", p.name, p.pattern.active_count());
            }
            Ok(())
        }
        Commands::Render { source, out } => render(config, &source, &out),
        #[cfg(feature = "device")]
        Commands::Play { source, seconds } => play(config, &source, seconds),
    }
}

fn render(config: EngineConfig, source: &PatternArgs, out: &Path) -> Result<(), String> {
    let request = RenderRequest::new(source.resolve()?, source.bpm, source.effects());
    let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    let exporter = Exporter::new(config);
    let path = runtime
        .block_on(exporter.export_to_dir(request, out))
        .map_err(|e| e.to_string())?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(feature = "device")]
fn play(config: EngineConfig, source: &PatternArgs, seconds: f64) -> Result<(), String> {
    use std::sync::Arc;
    use std::time::Duration;

    use drumgrid_core::device::start_output;
    use drumgrid_core::scheduler::{LiveState, NullSink, SystemClock};
    use drumgrid_core::settings::MixSettings;
    use drumgrid_core::ticker::{ThreadTicker, spawn_sequencer};

    let mut mix = MixSettings::default();
    mix.global = source.effects();
    let state = Arc::new(LiveState::new(source.resolve()?, mix, source.bpm));
    let period = Duration::from_millis(config.tick_interval_ms);

    // Without a device the transport still runs, silently.
    let (sequencer, _output) = match start_output(&config, mix.global) {
        Ok(output) => {
            let seq = spawn_sequencer(
                Arc::clone(&state),
                output.clock(),
                output.sink(),
                config.lookahead_seconds,
                period,
                &ThreadTicker,
            );
            (seq, Some(output))
        }
        Err(e) => {
            log::warn!("audio output unavailable: {e}");
            let seq = spawn_sequencer(
                Arc::clone(&state),
                SystemClock::new(),
                NullSink,
                config.lookahead_seconds,
                period,
                &ThreadTicker,
            );
            (seq, None)
        }
    };

    sequencer.play();
    std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
    sequencer.stop();
    // Let the last hits ring out.
    std::thread::sleep(Duration::from_millis(500));
    Ok(())
}
