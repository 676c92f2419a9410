use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kayzen_mcp_runtime::{ConnectionArgs, McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "kayzen-mcp",
    version,
    about = "Kayzen Analytics MCP server — report tools over stdio"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kayzen_mcp=info,kayzen_mcp_runtime=info,kayzen_core=info".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let code = run_mcp(&cli.connection, cli.command).await;
    std::process::exit(code);
}
