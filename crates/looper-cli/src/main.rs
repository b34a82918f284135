use std::io::{self, BufRead, ErrorKind};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use looper_contracts::control::{parse_control_line, ControlCommand, ControlSignal, CONTROL_HELP_COMMANDS};
use looper_engine::params::{
    DEFAULT_DELAY, DEFAULT_HEIGHT, DEFAULT_ITERATIONS, DEFAULT_NUM_FRAMES, DEFAULT_OUTPUT_DIR,
    DEFAULT_PIPELINE_CONFIG, DEFAULT_SEED, DEFAULT_WIDTH,
};
use looper_engine::stitch::DEFAULT_STITCHED_FILENAME;
use looper_engine::{LoopSession, RunHandle, RunParams, SessionError, SystemHost, ToolConfig};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CONTROL_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "looper", version, about = "Feedback-driven video generation loop")]
struct Cli {
    /// Log filter, e.g. `info` or `looper_engine=debug`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the loop to completion without a controller.
    Run(LoopArgs),
    /// Run the loop and read control commands (`/pause`, `/resume`, ...) from stdin.
    Interactive(LoopArgs),
}

#[derive(Debug, Clone, Args)]
struct LoopArgs {
    #[arg(short = 'p', long)]
    prompt: String,
    #[arg(short = 'i', long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    #[arg(short = 's', long, default_value_t = DEFAULT_SEED, allow_negative_numbers = true)]
    seed: i64,
    /// Conditioning image for the first iteration.
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: u32,
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: u32,
    #[arg(long, default_value_t = DEFAULT_NUM_FRAMES)]
    num_frames: u32,
    #[arg(long, default_value = DEFAULT_PIPELINE_CONFIG)]
    pipeline_config: PathBuf,
    #[arg(long, default_value_t = DEFAULT_DELAY.as_secs_f64())]
    delay_secs: f64,
    #[arg(long)]
    stitch_videos: bool,
    #[arg(long, default_value = DEFAULT_STITCHED_FILENAME)]
    stitched_output_filename: String,
    /// Skip events.jsonl, loop.json and summary.json.
    #[arg(long)]
    no_journal: bool,
    #[arg(long)]
    python: Option<String>,
    #[arg(long)]
    inference_script: Option<PathBuf>,
    #[arg(long)]
    ffmpeg: Option<String>,
}

impl LoopArgs {
    /// Environment first, then flags on top.
    fn tool_config(&self) -> ToolConfig {
        let mut tools = ToolConfig::from_env();
        if let Some(python) = &self.python {
            tools.python = python.clone();
        }
        if let Some(script) = &self.inference_script {
            tools.inference_script = script.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            tools.ffmpeg = ffmpeg.clone();
        }
        tools
    }

    fn run_params(&self) -> Result<RunParams> {
        let delay = Duration::try_from_secs_f64(self.delay_secs).map_err(|_| {
            anyhow!(
                "--delay-secs must be a non-negative number of seconds, got {}",
                self.delay_secs
            )
        })?;
        let mut params = RunParams::new(self.prompt.as_str());
        params.seed = self.seed;
        params.initial_image = self.image.clone();
        params.output_dir = self.output_dir.clone();
        params.iterations = self.iterations;
        params.height = self.height;
        params.width = self.width;
        params.pipeline_config = self.pipeline_config.clone();
        params.num_frames = self.num_frames;
        params.delay = delay;
        params.stitch = self.stitch_videos;
        params.stitched_filename = self.stitched_output_filename.clone();
        Ok(params)
    }

    fn session(&self) -> LoopSession<SystemHost> {
        let tools = self.tool_config();
        debug!(
            python = %tools.python,
            script = %tools.inference_script.display(),
            ffmpeg = %tools.ffmpeg,
            "tool configuration"
        );
        LoopSession::new(SystemHost::new(&tools), tools).with_journal(!self.no_journal)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("looper error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Command::Run(args) => run_headless(&args),
        Command::Interactive(args) => run_interactive(&args),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn run_headless(args: &LoopArgs) -> Result<i32> {
    let params = args.run_params()?;
    let session = args.session();
    let handle = session.start(params).context("failed to start the loop")?;
    finish(handle)
}

fn run_interactive(args: &LoopArgs) -> Result<i32> {
    let params = args.run_params()?;
    let session = args.session();
    let handle = session.start(params).context("failed to start the loop")?;
    let lines = spawn_stdin_reader()?;

    println!("Loop started. Type /help for commands.");
    while !handle.is_finished() {
        let line = match lines.recv_timeout(CONTROL_POLL) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("stdin closed; letting the run finish");
                release_pause(&session);
                break;
            }
        };

        match parse_control_line(&line) {
            ControlCommand::Noop => {}
            ControlCommand::Help => println!("Commands: {}", CONTROL_HELP_COMMANDS.join(" ")),
            ControlCommand::Status => println!("Status: {}", session.status().label()),
            ControlCommand::Quit => {
                println!("No mid-iteration cancellation; waiting for the run to finish.");
                release_pause(&session);
                break;
            }
            ControlCommand::Signals(signals) => {
                for signal in signals {
                    let note = describe_signal(&signal);
                    match session.enqueue(signal) {
                        Ok(()) => println!("{note}"),
                        Err(SessionError::NotRunning) => {
                            println!("The run has already finished.");
                            break;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            ControlCommand::Unknown { command, hint } => {
                println!("Unknown command {command}: {hint}");
            }
        }
    }
    finish(handle)
}

/// Nobody is left to resume a paused run once the controller stops reading.
fn release_pause(session: &LoopSession<SystemHost>) {
    if let Err(err) = session.resume() {
        debug!("resume on exit ignored: {err}");
    }
}

fn finish(handle: RunHandle) -> Result<i32> {
    match handle.join().context("loop run failed")? {
        Some(artifact) => println!("Stitched video: {}", artifact.display()),
        None => println!("Loop finished."),
    }
    Ok(0)
}

fn describe_signal(signal: &ControlSignal) -> String {
    match signal {
        ControlSignal::Pause => "Pause requested; takes effect before the next iteration.".to_string(),
        ControlSignal::Resume => "Resume requested.".to_string(),
        ControlSignal::SetPrompt(prompt) => format!("Prompt set to: {prompt}"),
        ControlSignal::SetImage(path) => format!("Conditioning image set to {}", path.display()),
    }
}

/// Forward stdin lines to the control loop so it can keep polling run status.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("looper-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let input = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(input).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!("failed to read stdin: {err}");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}
