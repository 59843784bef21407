//! dash - streaming chat client for the DASH assistant

mod commands;
mod config;
mod storage;
mod ui;
mod utils;

use clap::Parser;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use dash_agent::{ConversationStore, StreamingChatClient};
use dash_ai::HttpTransport;

/// dash - chat with the DASH assistant from the terminal
#[derive(Parser, Debug)]
#[command(name = "dash")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the chat service (default: http://localhost:8000)
    #[arg(short, long)]
    base_url: Option<String>,

    /// Send a single message, print the reply and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Start from a fresh conversation instead of the saved one
    #[arg(long)]
    clear: bool,

    /// Print the saved conversation and exit
    #[arg(long)]
    history: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("dash=debug,dash_agent=debug,dash_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let base_url = config::resolve_base_url(
        args.base_url,
        std::env::var(config::BASE_URL_ENV).ok(),
        &cfg,
    );
    tracing::debug!(%base_url, "using chat service");

    let blobs = Arc::new(storage::FileBlobStore::new(cfg.data_dir()));
    tracing::debug!(dir = %blobs.dir().display(), "history directory");
    let store = Arc::new(ConversationStore::load(blobs));

    if args.clear {
        store.clear_messages();
    }

    if args.history {
        ui::print_history(&store.snapshot());
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::new(base_url)?);
    let client = StreamingChatClient::new(Arc::clone(&store), transport);

    let printer = Mutex::new(ui::StreamPrinter::new(std::io::stdout()));
    store.subscribe(move |state| {
        if let Err(e) = printer.lock().render(state) {
            tracing::warn!(error = %e, "failed to write to stdout");
        }
    });

    // Non-interactive mode
    if let Some(command) = args.command {
        send(&client, &command).await;
        return Ok(());
    }

    run_interactive(&client).await
}

/// Run one turn, cancelling it on Ctrl-C.
///
/// Listening for Ctrl-C replaces the default handler for the rest of the
/// process, so the prompt loop listens for it too.
async fn send(client: &StreamingChatClient, message: &str) {
    tokio::select! {
        _ = client.send_message(message) => {}
        _ = tokio::signal::ctrl_c() => {
            client.cancel_request();
            println!();
            println!("[cancelled]");
        }
    }
}

async fn run_interactive(client: &StreamingChatClient) -> anyhow::Result<()> {
    use std::io::Write;

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("dash - type a message, /help for commands");
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                // A pending blocking stdin read would keep the runtime alive
                std::process::exit(130);
            }
        };

        // EOF
        let Some(input) = line else {
            break;
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match commands::execute_command(input) {
            Some(commands::CommandResult::Clear) => client.clear_conversation(),
            Some(commands::CommandResult::History) => {
                ui::print_history(&client.store().snapshot());
            }
            Some(commands::CommandResult::Message(msg)) => println!("{}", msg),
            Some(commands::CommandResult::Exit) => break,
            Some(commands::CommandResult::Unknown(cmd)) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
            None => send(client, input).await,
        }
    }

    Ok(())
}
