//! Command handlers behind the `codescan` binary.
//!
//! Each subcommand loads the layered configuration, mounts a
//! [`ScanSession`] over the pipeline selected by the flags, and prints what
//! the session delivers. The completion sink only forwards results over a
//! channel; printing happens on the calling thread.

use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::{Cli, Commands, ConfigAction, ConfigArgs, DecodeArgs, ScanArgs};
use crate::config::Config;
use crate::error::{ExitCode, Interrupted};
use crate::logging;
use crate::output::{ResultPrinter, ScanRecord};
use crate::progress::ScanProgress;
use crate::scanner::{
    CapturePipeline, DeviceCapture, FrameDirectoryProvider, ScanMode, ScanResult, ScanSession,
    SessionConfig, SimulatedCapture, SimulatedTrigger, Toggle,
};
use crate::signal::{self, InterruptHandler};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long results may still arrive after the input has run dry.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How long `decode` waits for its single result.
const DECODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the parsed command line and pick the process exit code.
///
/// # Errors
///
/// Returns an error for unusable configuration or I/O failures, and
/// [`Interrupted`] when Ctrl+C ended a scan.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color || !std::io::stdout().is_terminal() {
        yansi::disable();
    }

    let profile = cli.profile.as_deref();
    let config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            Config::load_from_path(path, profile)
        }
        None => Config::load(profile),
    };

    match &cli.command {
        Commands::Scan(args) => run_scan(config, args, cli.quiet),
        Commands::Decode(args) => run_decode(config, args),
        Commands::Config(args) => run_config(&config, args, cli.config.clone()),
    }
}

/// Where the session's events come from.
enum Feed {
    /// A device pipeline; its stream ends when the preview stops running.
    Device,
    /// The fallback pipeline; `done` is set once all input was submitted.
    Simulated {
        trigger: SimulatedTrigger,
        input: SimulatedInput,
        done: Arc<AtomicBool>,
    },
}

enum SimulatedInput {
    Tap,
    Image(PathBuf),
    Stdin,
}

impl Feed {
    fn pipeline(config: &Config, args: &ScanArgs) -> (Box<dyn CapturePipeline>, Self) {
        if let Some(frames) = &args.frames {
            let mut provider = FrameDirectoryProvider::new(frames)
                .with_frame_interval(config.frame_interval())
                .with_repeat(args.repeat);
            if let Some(front) = &args.front_frames {
                provider = provider.with_front(front);
            }
            let pipeline: Box<dyn CapturePipeline> = Box::new(DeviceCapture::new(provider));
            return (pipeline, Self::Device);
        }

        let input = if let Some(image) = &args.image {
            SimulatedInput::Image(image.clone())
        } else if args.stdin {
            SimulatedInput::Stdin
        } else {
            SimulatedInput::Tap
        };
        let (pipeline, trigger) = SimulatedCapture::new(config.simulated_data.clone());
        let feed = Self::Simulated {
            trigger,
            input,
            done: Arc::new(AtomicBool::new(false)),
        };
        let pipeline: Box<dyn CapturePipeline> = Box::new(pipeline);
        (pipeline, feed)
    }

    /// Push host-side input into a started session.
    fn begin(&self) {
        let Self::Simulated {
            trigger,
            input,
            done,
        } = self
        else {
            return;
        };

        match input {
            SimulatedInput::Tap => {
                trigger.tap();
                done.store(true, Ordering::SeqCst);
            }
            SimulatedInput::Image(path) => {
                trigger.submit_image_path(path);
                done.store(true, Ordering::SeqCst);
            }
            SimulatedInput::Stdin => {
                spawn_line_reader(BufReader::new(std::io::stdin()), trigger.clone(), done);
            }
        }
    }

    fn is_exhausted(&self, session: &ScanSession) -> bool {
        match self {
            Self::Device => !session.preview().running,
            Self::Simulated { done, .. } => done.load(Ordering::SeqCst),
        }
    }
}

/// Feed each line of `reader` to the session as a scanned code, then set `done`.
fn spawn_line_reader<R>(reader: R, trigger: SimulatedTrigger, done: &Arc<AtomicBool>)
where
    R: BufRead + Send + 'static,
{
    let reader_done = Arc::clone(done);
    let spawned = std::thread::Builder::new()
        .name("codescan-stdin".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        trigger.scan(line.trim());
                    }
                    Err(e) => {
                        log::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            reader_done.store(true, Ordering::SeqCst);
        });
    if let Err(e) = spawned {
        log::error!("Failed to spawn stdin reader: {}", e);
        done.store(true, Ordering::SeqCst);
    }
}

/// When the CLI stops waiting on its own.
#[derive(Debug, Clone, Copy, Default)]
struct StopConditions {
    max_results: Option<usize>,
    deadline: Option<Instant>,
}

/// What a finished scan delivered.
#[derive(Debug, Default)]
struct ScanSummary {
    codes: usize,
    failed: bool,
    timed_out: bool,
}

impl ScanSummary {
    fn delivered(&self) -> usize {
        self.codes + usize::from(self.failed)
    }

    fn exit_code(&self) -> ExitCode {
        if self.failed {
            ExitCode::ScanFailed
        } else if self.codes > 0 {
            ExitCode::Success
        } else {
            ExitCode::NoCode
        }
    }
}

struct Reporter {
    printer: ResultPrinter,
    progress: ScanProgress,
    summary: ScanSummary,
    limit: Option<usize>,
}

impl Reporter {
    fn is_full(&self) -> bool {
        self.limit.is_some_and(|max| self.summary.delivered() >= max)
    }

    fn report(&mut self, result: &ScanResult) -> Result<()> {
        if self.is_full() {
            log::debug!("Result limit reached, dropping {:?}", result);
            return Ok(());
        }
        match result {
            Ok(_) => self.summary.codes += 1,
            Err(_) => self.summary.failed = true,
        }
        self.progress.record(result);

        let record = ScanRecord::new(self.summary.delivered(), result);
        self.progress
            .suspend(|| self.printer.print(&record))
            .context("Failed to print result")
    }
}

fn run_scan(mut config: Config, args: &ScanArgs, quiet: bool) -> Result<ExitCode> {
    config.merge_scan_args(args);
    let interrupt = signal::install_handler().context("Failed to set up Ctrl+C handling")?;

    let session_config = config.session_config(Toggle::default(), Toggle::default());
    let (pipeline, feed) = Feed::pipeline(&config, args);

    let (tx, rx) = mpsc::channel();
    let session = ScanSession::start(session_config, pipeline, move |result: ScanResult| {
        let _ = tx.send(result);
    });
    interrupt.watch(session.handle());
    feed.begin();

    let hidden = quiet || !std::io::stderr().is_terminal();
    let mut reporter = Reporter {
        printer: ResultPrinter::new(config.output),
        progress: ScanProgress::new(config.mode, hidden),
        summary: ScanSummary::default(),
        limit: args.max_results,
    };
    let stop_when = StopConditions {
        max_results: args.max_results,
        deadline: args.timeout.map(|timeout| Instant::now() + timeout),
    };

    let watched = watch_session(&session, &feed, &rx, &mut reporter, stop_when, &interrupt);
    interrupt.unwatch();
    session.stop();
    watched?;

    // Results delivered before stop returned.
    for result in rx.try_iter() {
        reporter.report(&result)?;
    }
    reporter.progress.finish();

    let summary = reporter.summary;
    if summary.timed_out {
        log::info!("Scan timed out");
    }
    if interrupt.is_interrupted() {
        return Err(Interrupted.into());
    }
    log::info!(
        "Scan ended with {} code(s){}",
        summary.codes,
        if summary.failed { " and a failure" } else { "" }
    );
    Ok(summary.exit_code())
}

fn watch_session(
    session: &ScanSession,
    feed: &Feed,
    rx: &Receiver<ScanResult>,
    reporter: &mut Reporter,
    stop_when: StopConditions,
    interrupt: &InterruptHandler,
) -> Result<()> {
    let mut exhausted_at: Option<Instant> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(result) => {
                reporter.report(&result)?;
                if result.is_err() {
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if interrupt.is_interrupted() || session.is_stopped() {
            return Ok(());
        }
        if session.mode() == ScanMode::Once && session.is_finished() && reporter.summary.codes > 0 {
            return Ok(());
        }
        if stop_when
            .max_results
            .is_some_and(|max| reporter.summary.delivered() >= max)
        {
            return Ok(());
        }
        if stop_when.deadline.is_some_and(|d| Instant::now() >= d) {
            reporter.summary.timed_out = true;
            return Ok(());
        }

        if feed.is_exhausted(session) {
            let since = *exhausted_at.get_or_insert_with(Instant::now);
            if since.elapsed() >= DRAIN_GRACE {
                log::debug!("Input exhausted, ending scan");
                return Ok(());
            }
        }
    }
}

fn run_decode(mut config: Config, args: &DecodeArgs) -> Result<ExitCode> {
    if let Some(output) = args.output {
        config.output = output;
    }

    let (pipeline, trigger) = SimulatedCapture::new(String::new());
    let (tx, rx) = mpsc::channel();
    let session = ScanSession::start(
        SessionConfig::new(ScanMode::Once),
        Box::new(pipeline),
        move |result: ScanResult| {
            let _ = tx.send(result);
        },
    );
    trigger.submit_image_path(&args.image);

    let result = rx
        .recv_timeout(DECODE_TIMEOUT)
        .with_context(|| format!("No result for {}", args.image.display()))?;
    session.stop();

    ResultPrinter::new(config.output)
        .print(&ScanRecord::new(1, &result))
        .context("Failed to print result")?;
    Ok(match result {
        Ok(_) => ExitCode::Success,
        Err(_) => ExitCode::ScanFailed,
    })
}

fn run_config(config: &Config, args: &ConfigArgs, explicit: Option<PathBuf>) -> Result<ExitCode> {
    let path = match explicit {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match args.action {
        ConfigAction::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to_path(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(ExitCode::Success)
}
