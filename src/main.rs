use std::io;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, LevelFilter};
use ratatui::{backend::CrosstermBackend, Terminal};

use ideafit::analysis::pareto;
use ideafit::core::config::SessionConfig;
use ideafit::core::curve::CurveData;
use ideafit::core::sample::{self, SampleShape, SampleSpec};
use ideafit::engine::adapter::EngineAdapter;
use ideafit::engine::external::process::ProcessEngine;
use ideafit::engine::external::replay::ReplayEngine;
use ideafit::interface::logging;
use ideafit::interface::state::AppState;
use ideafit::interface::ui;
use ideafit::session::controller::{FittingController, SessionHandle};
use ideafit::session::{SessionState, SessionStatus};

/// How long the binary waits for the worker after the user quits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "IdeaFit: interactive symbolic curve fitting", long_about = None)]
struct Args {
    /// CSV file with columns x1..xn, y[, error]
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Number of input columns in the CSV
    #[arg(long, default_value_t = 1)]
    dims: usize,

    /// CSV carries a trailing per-point error column
    #[arg(long)]
    with_error: bool,

    /// Built-in curve used when no CSV is given (linear, quadratic, sine, damped, gaussian)
    #[arg(long, default_value = "sine")]
    sample: String,

    /// Points in the built-in curve
    #[arg(long, default_value_t = 100)]
    points: usize,

    /// Noise amplitude for the built-in curve
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Seed for the built-in curve
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Session config (JSON); missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    islands: Option<usize>,

    #[arg(long)]
    cycles: Option<usize>,

    #[arg(long)]
    interactions: Option<usize>,

    /// Target score in [0, 100]
    #[arg(short, long)]
    target: Option<f64>,

    /// External engine command followed by its arguments
    #[arg(short, long, num_args = 1.., value_name = "CMD")]
    engine: Vec<String>,

    /// File receiving the external engine's stderr
    #[arg(long)]
    engine_log: Option<PathBuf>,

    /// Recorded candidates (JSON) replayed instead of a live engine. A replay
    /// that runs out ends the session as Completed.
    #[arg(short, long, conflicts_with = "engine")]
    replay: Option<PathBuf>,

    /// Restart the replay once it runs out
    #[arg(long = "loop", requires = "replay")]
    looping: bool,

    /// Run without the terminal UI
    #[arg(long)]
    headless: bool,

    /// Snapshot polling interval (ms)
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Log file written while the terminal UI runs
    #[arg(long, default_value = "ideafit.log")]
    log_file: PathBuf,
}

// --- Terminal Guard (RAII) ---

struct TuiContext {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TuiContext {
    fn new() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("Failed to setup terminal alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("Failed to create terminal backend")?;
        Ok(Self { terminal })
    }
}

impl Drop for TuiContext {
    fn drop(&mut self) {
        // Best-effort restoration of terminal state
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

// --- Initialization Helpers ---

fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Forcefully restore terminal before printing panic
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));
}

fn load_curve(args: &Args) -> Result<CurveData> {
    if let Some(path) = &args.data {
        return CurveData::from_csv(path, args.dims, args.with_error)
            .with_context(|| format!("Failed to load curve from {}", path.display()));
    }

    let shape: SampleShape = args.sample.parse().map_err(|e: String| anyhow!(e))?;
    let spec = SampleSpec {
        shape,
        points: args.points,
        noise: args.noise,
        seed: args.seed,
    };
    sample::generate(&spec).context("Failed to generate sample curve")
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(v) = args.islands {
        config.islands = v;
    }
    if let Some(v) = args.cycles {
        config.cycles = v;
    }
    if let Some(v) = args.interactions {
        config.interactions_per_cycle = v;
    }
    if let Some(v) = args.target {
        config.target_score = v;
    }
    Ok(config)
}

fn build_engine(args: &Args) -> Result<Arc<dyn EngineAdapter>> {
    if let Some(path) = &args.replay {
        let engine = ReplayEngine::from_json_file(path)?.looping(args.looping);
        info!("Replaying {} recorded candidates from {}", engine.len(), path.display());
        return Ok(Arc::new(engine));
    }

    let (program, rest) = args
        .engine
        .split_first()
        .ok_or_else(|| anyhow!("No engine given: pass --engine <CMD> [ARGS..] or --replay <FILE>"))?;

    let mut engine = ProcessEngine::new(program, rest.to_vec());
    if let Some(log_path) = &args.engine_log {
        engine = engine.with_stderr_log(log_path);
    }
    Ok(Arc::new(engine))
}

// --- Run Modes ---

fn run_tui(handle: SessionHandle, curve: CurveData, config: SessionConfig, engine_name: &str, poll: Duration) -> Result<SessionState> {
    let mut tui = TuiContext::new().context("Failed to initialize TUI")?;
    let mut app = AppState::new(handle.clone(), Arc::new(curve), config, engine_name);

    let mut last_tick = Instant::now();
    while !app.should_quit {
        // Draw
        tui.terminal.draw(|f| ui::draw(f, &mut app))?;

        // Handle Input
        let timeout = poll.saturating_sub(last_tick.elapsed());
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == event::KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char(c) => app.on_key(c),
                        KeyCode::Esc => app.quit(),
                        _ => {}
                    }
                }
            }
        }

        // Logic Tick
        if last_tick.elapsed() >= poll {
            app.tick();
            last_tick = Instant::now();
        }
    }

    drop(tui);
    handle.request_stop();
    Ok(handle.join(SHUTDOWN_GRACE).unwrap_or_else(|| handle.snapshot()))
}

fn run_headless(handle: SessionHandle, poll: Duration) -> SessionState {
    let mut seen_version = 0;
    let mut last_line: Option<String> = None;
    loop {
        let state = handle.join(poll).unwrap_or_else(|| handle.snapshot());
        if state.version != seen_version {
            seen_version = state.version;
            log_new_events(&state, &mut last_line);
        }
        if state.status.is_terminal() {
            return state;
        }
    }
}

/// Logs the events published since `last_line`. The ring buffer may have
/// evicted that line already, in which case everything held is new.
fn log_new_events(state: &SessionState, last_line: &mut Option<String>) {
    let start = last_line
        .as_ref()
        .and_then(|seen| state.events.iter().rposition(|l| l == seen))
        .map_or(0, |i| i + 1);
    for line in state.events.iter().skip(start) {
        info!("{}", line);
    }
    if let Some(line) = state.events.back() {
        *last_line = Some(line.clone());
    }
}

fn print_summary(state: &SessionState, handle: &SessionHandle) {
    println!("Session {}: {}", state.session_id.map(|id| id.to_string()).unwrap_or_default(), state.status.label());
    println!("  Units:     {}/{}", state.iteration, state.total_iterations);
    println!("  Elapsed:   {:.1}s", state.elapsed().as_secs_f64());
    if state.has_best() {
        println!("  Best:      {:.4}  y = {}", state.best_score, state.best_expression);
    } else {
        println!("  Best:      -");
    }
    if let Some(err) = &state.error_message {
        println!("  Error:     {}", err);
    }

    match handle.pareto_frontier() {
        Ok(points) => {
            let points = pareto::frontier(&points);
            if !points.is_empty() {
                println!("  Pareto frontier:");
                for p in points {
                    println!("    {:>4}  {:>9.4}  {}", p.complexity, p.score, p.expression);
                }
            }
        }
        Err(e) => println!("  Pareto frontier unavailable: {}", e),
    }
}

// --- Main ---

fn main() -> Result<()> {
    // 1. Safety & Parsing
    let args = Args::parse();
    if !args.headless {
        setup_panic_hook();
    }

    if args.headless {
        logging::init_stderr(LevelFilter::Info)?;
    } else {
        logging::init_file(&args.log_file, LevelFilter::Info)?;
    }

    // 2. Inputs
    let curve = load_curve(&args)?;
    let config = load_config(&args)?;
    let engine = build_engine(&args)?;
    let engine_name = engine.name().to_string();
    let poll = Duration::from_millis(args.poll_ms.max(1));

    // 3. Start Session
    let controller = FittingController::new(engine);
    let handle = controller.start(curve.clone(), config.clone())?;

    // 4. Drive
    let final_state = if args.headless {
        run_headless(handle.clone(), poll)
    } else {
        let outcome = run_tui(handle.clone(), curve, config, &engine_name, poll);
        // The screen is restored by now; surface what was logged behind it.
        if let Err(e) = logging::echo_file(&args.log_file, &mut io::stderr()) {
            eprintln!("{:#}", e);
        }
        outcome?
    };

    print_summary(&final_state, &handle);
    if final_state.status == SessionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
