use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harbor_mcp_runtime::{McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "harbor-mcp",
    version,
    about = "Harbor MCP server over stdio or HTTP"
)]
struct Cli {
    /// Harbor API base URL (falls back to the config file, then the public API)
    #[arg(long, env = "HARBOR_HOST")]
    host: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "HARBOR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: McpCommands,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "harbor_mcp=info,harbor_mcp_runtime=info".into());
    // stdout carries the stdio protocol stream.
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let code = run_mcp(cli.host, cli.command).await;
    std::process::exit(code);
}
