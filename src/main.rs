use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod ctrlc_handler;
mod directive;
mod history;
mod line_editor;
mod repl;
mod session;
mod shell;
mod term;

use api::client::AgentZeroClient;
use directive::Resolver;
use history::HistoryStore;
use line_editor::LineEditor;
use repl::{Mode, NoInput, Repl};
use session::ChatSession;

const LOG_ENV: &str = "AGENT_ZERO_LOG";

/// A terminal client for Agent Zero
#[derive(Parser)]
#[command(name = "agent-zero")]
#[command(
    about = "A terminal client for Agent Zero. Inline `commands`, @files and @urls \
             are expanded before a message is sent.",
    version
)]
struct Cli {
    /// Message to send first (required with --one-shot)
    message: Option<String>,

    /// Send MESSAGE, print the reply, and exit
    #[arg(short = '1', long = "one-shot")]
    one_shot: bool,

    /// Continue an existing chat
    #[arg(long = "chat-id", value_name = "ID")]
    chat_id: Option<String>,

    /// Continue the chat of the last interactive session
    #[arg(short = 'r', long = "resume", conflicts_with_all = ["one_shot", "chat_id"])]
    resume: bool,

    /// Agent Zero MCP endpoint (overrides AGENT_ZERO_MCP_URL)
    #[arg(short = 'u', long = "url", value_name = "URL")]
    url: Option<String>,

    /// Non-default path to config file (defaults to ~/.agent-zero/config.toml)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Does not read or write input history
    #[arg(short = 'i', long = "incognito")]
    incognito: bool,

    /// Debug mode (logs to ~/.agent-zero/debug.log)
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn init_logging(debug: bool) -> Result<(), config::ConfigError> {
    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    if debug {
        let log_file = config::open_debug_log()?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(log_file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .init();
    }
    Ok(())
}

fn fail(msg: impl std::fmt::Display) -> ! {
    term::error(msg);
    process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    term::init_colors();

    if args.one_shot && args.message.is_none() {
        term::error("--one-shot needs a MESSAGE");
        process::exit(2);
    }

    if let Err(e) = config::create_config_dir_if_missing() {
        fail(e);
    }
    if let Err(e) = init_logging(args.debug) {
        fail(e);
    }

    let cfg = match config::get_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => fail(e),
    };
    let (url, url_source) = config::resolve_mcp_url(args.url.as_deref());
    debug!("endpoint {} (from {})", url, url_source);

    let mode = if args.one_shot {
        Mode::OneShot
    } else {
        Mode::Persistent
    };
    let store = match (config::get_history_path(), config::get_session_path()) {
        (Ok(history_path), Ok(session_path)) => {
            let store = HistoryStore::new(history_path, session_path, cfg.history_size);
            debug!("history at {}", store.history_path().display());
            Some(store)
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!("local history unavailable: {}", e);
            None
        }
    };

    let mut resume = args.chat_id.clone();
    if args.resume {
        match store.as_ref().map(|store| store.load_session()) {
            Some(Ok(Some(chat_id))) => resume = Some(chat_id),
            Some(Ok(None)) | None => term::note("no previous chat to resume; starting a new one"),
            Some(Err(e)) => warn!("cannot resume: {}", e),
        }
    }

    let client = AgentZeroClient::new(&url, mode == Mode::Persistent);
    let resolver = Resolver::new(&cfg.shell(), cfg.command_timeout());
    let session = ChatSession::new(resume);

    // Reedline handles ctrl+c at the prompt itself. Otherwise this handler
    // receives it, and it cancels whatever request is in flight.
    let ctrlc_handler = match ctrlc_handler::CtrlcHandler::new() {
        Ok(handler) => Some(handler),
        Err(e) => {
            warn!("ctrl+c will not cancel requests: {}", e);
            None
        }
    };

    let code = match mode {
        Mode::OneShot => {
            let mut repl = Repl::new(mode, client, NoInput, resolver, session);
            if let Some(handler) = ctrlc_handler {
                repl = repl.with_ctrlc_handler(handler);
            }
            repl.run(args.message).await
        }
        Mode::Persistent => {
            let recall = match store {
                Some(ref store) if !args.incognito => store.load().unwrap_or_else(|e| {
                    warn!("history recall unavailable: {}", e);
                    vec![]
                }),
                _ => vec![],
            };
            let line_editor = LineEditor::new(&recall, cfg.history_size);

            term::note(&format!(
                "agent-zero-cli {} | {} ({})",
                env!("CARGO_PKG_VERSION"),
                client.base_url(),
                url_source
            ));
            if let Some(chat_id) = session.chat_id() {
                term::note(&format!("continuing chat {}", chat_id));
            }
            term::note("Type quit, exit, or q to leave. Alt+Enter inserts a newline.");
            term::window_title_set("agent-zero");

            let mut repl = Repl::new(mode, client, line_editor, resolver, session);
            if let Some(store) = store {
                repl = repl.with_store(store, !args.incognito);
            }
            if let Some(handler) = ctrlc_handler {
                repl = repl.with_ctrlc_handler(handler);
            }
            let code = repl.run(args.message).await;
            term::window_title_reset();
            code
        }
    };

    if code != 0 {
        process::exit(code);
    }
    Ok(())
}
