//! OpenCodex CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Initialize config & workspace
//! - `serve`: Start the HTTP/WebSocket gateway
//! - `chat`: Run the agent in the terminal
//! - `doctor`: Diagnose configuration and storage

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "opencodex",
    about = "OpenCodex — a streaming ReAct coding agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and workspace
    Onboard,

    /// Start the gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat with the agent in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing chat session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Diagnose system health
    Doctor,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Chat { message, session } => commands::chat::run(message, session).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chat_with_message() {
        let cli = Cli::try_parse_from(["opencodex", "chat", "-m", "hello", "--verbose"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Chat { message, session } => {
                assert_eq!(message.as_deref(), Some("hello"));
                assert!(session.is_none());
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let cli =
            Cli::try_parse_from(["opencodex", "serve", "--port", "9000", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Serve {
                port: Some(9000),
                host: None
            }
        ));
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(Cli::try_parse_from(["opencodex", "daemon"]).is_err());
    }
}
