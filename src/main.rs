//! tabexec - run an agent on a tab from the command line.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tabexec::messaging::{AgentEvent, BusError, EventReceiver, EventType};
use tabexec::{AppContext, Settings, ECHO_AGENT_ID};

/// Run a prompt through the tab execution pipeline
#[derive(Parser, Debug)]
#[command(name = "tabexec")]
#[command(version, about, long_about = None)]
struct Args {
    /// Prompt to send
    #[arg(required_unless_present = "list_agents")]
    prompt: Vec<String>,

    /// Tab to run on (defaults to the configured default tab)
    #[arg(short, long)]
    tab: Option<String>,

    /// Agent to run
    #[arg(short, long, default_value = ECHO_AGENT_ID)]
    agent: String,

    /// Settings file (defaults to the XDG config file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List registered agents and exit
    #[arg(long)]
    list_agents: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable verbose logging (equivalent to RUST_LOG=trace)
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "warn" // Quiet by default for normal use
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if args.debug || args.verbose {
        tracing::info!("Debug logging enabled");
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    let app = AppContext::new(settings);

    if args.list_agents {
        for agent in app.registry().list() {
            println!("{:<12} {} [{}]", agent.id, agent.description, agent.tags.join(", "));
        }
        return Ok(());
    }

    let tab = args
        .tab
        .clone()
        .unwrap_or_else(|| app.settings().default_tab.clone());
    let prompt = args.prompt.join(" ");

    let printer = tokio::spawn(print_stream(
        app.bus().subscribe(),
        tab.clone(),
        args.agent.clone(),
    ));

    let result = app.submit(&tab, &args.agent, &prompt).await;
    if result.is_err() {
        printer.abort();
    } else if tokio::time::timeout(Duration::from_secs(1), printer)
        .await
        .is_err()
    {
        tracing::debug!("Output stream did not finish");
    }
    let result = result?;

    if let Some(session_id) = &result.session_id {
        tracing::info!(tab = %tab, session_id = %session_id, "Session");
    }
    if !result.success {
        anyhow::bail!(result.error.unwrap_or_else(|| "execution failed".to_string()));
    }
    Ok(())
}

/// Print streamed text for one agent on one tab until it finishes.
async fn print_stream(mut events: EventReceiver, tab: String, agent: String) {
    let mut stdout = std::io::stdout();
    loop {
        let event: AgentEvent = match events.recv().await {
            Ok(event) => event,
            Err(BusError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Output stream lagged");
                continue;
            }
            Err(BusError::Closed) => return,
        };
        if event.tab_id != tab || event.agent_id != agent {
            continue;
        }

        match event.event_type {
            EventType::AgentText => {
                if let Some(chunk) = event.text() {
                    let _ = write!(stdout, "{}", chunk);
                    let _ = stdout.flush();
                }
            }
            EventType::AgentReasoning => {
                if let Some(chunk) = event.text() {
                    tracing::debug!(reasoning = %chunk);
                }
            }
            EventType::AgentCompleted => {
                let _ = writeln!(stdout);
                return;
            }
            EventType::AgentFailed => return,
            _ => {}
        }
    }
}
