mod commands;
mod output;

use std::{process::ExitCode, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use commands::{ConnectOptions, Ctx};

#[derive(Parser)]
#[command(name = "mcport", about = "Session-bridged MCP client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a session and start its bridge.
    Connect {
        /// Session name (alphanumerics and '-').
        name: String,
        /// HTTP MCP server URL.
        #[arg(long, conflicts_with = "command")]
        url: Option<String>,
        /// Command for a stdio MCP server.
        #[arg(long)]
        command: Option<String>,
        /// Arguments for the stdio command (repeatable).
        #[arg(long = "arg")]
        args: Vec<String>,
        /// Environment for the stdio command, KEY=VALUE (repeatable).
        #[arg(long = "env")]
        env: Vec<String>,
        /// Extra HTTP header, 'Name: value' (repeatable; stored in the
        /// keychain, never on disk).
        #[arg(long = "header")]
        headers: Vec<String>,
        /// OAuth profile name for the server.
        #[arg(long)]
        profile: Option<String>,
        /// Expose the upstream on a local MCP proxy port.
        #[arg(long)]
        proxy: Option<u16>,
        /// Proxy bind host.
        #[arg(long, default_value = "127.0.0.1")]
        proxy_host: String,
        /// Bearer token required by the proxy (stored in the keychain).
        #[arg(long)]
        proxy_bearer: Option<String>,
        /// Per-call deadline in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// List-cache TTL in milliseconds.
        #[arg(long)]
        ttl_ms: Option<u64>,
        /// Token refresh preemption window in seconds.
        #[arg(long)]
        refresh_buffer_sec: Option<u64>,
        /// Registry lock retry budget in milliseconds.
        #[arg(long)]
        lock_timeout_ms: Option<u64>,
    },
    /// Stop a session's bridge and remove the session.
    Close { name: String },
    /// Stop the bridge and reconnect with a fresh server session.
    Restart { name: String },
    /// List all sessions.
    Sessions,
    /// Show one session in detail.
    Status { name: String },
    /// Sweep the registry: reap crashed bridges, remove expired sessions.
    Clean,
    /// End-to-end ping through the bridge to the server.
    Ping { name: String },
    /// List the server's tools.
    ToolsList { name: String },
    /// Call a tool.
    ToolsCall {
        name: String,
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long)]
        args: Option<String>,
    },
    /// List the server's resources.
    ResourcesList {
        name: String,
        /// List resource templates instead.
        #[arg(long)]
        templates: bool,
    },
    /// Read a resource by URI.
    ResourcesRead { name: String, uri: String },
    /// Subscribe to change notifications for a resource.
    ResourcesSubscribe { name: String, uri: String },
    /// Unsubscribe from a resource.
    ResourcesUnsubscribe { name: String, uri: String },
    /// List the server's prompts.
    PromptsList { name: String },
    /// Fetch a prompt.
    PromptsGet {
        name: String,
        prompt: String,
        /// Prompt arguments as a JSON object.
        #[arg(long)]
        args: Option<String>,
    },
    /// Set the server-side logging level.
    LogLevel { name: String, level: String },
    /// Auth profile metadata.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Internal: run the bridge daemon for a session.
    #[command(hide = true, name = "bridge-daemon")]
    BridgeDaemon {
        #[arg(long)]
        session: String,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// List auth profiles (metadata only, never tokens).
    List,
    /// Show one profile.
    Show { server_url: String, name: String },
}

fn init_telemetry(cli: &Cli) {
    let default_level = if matches!(cli.command, Commands::BridgeDaemon { .. }) {
        // Daemons log to their session log file via redirected stderr.
        "info"
    } else {
        cli.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_telemetry(&cli);
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(output::fail(json, &e)),
    }
}

async fn run(cli: Cli) -> mcport_common::Result<()> {
    // The daemon entry point manages its own lifecycle.
    if let Commands::BridgeDaemon { session } = &cli.command {
        return mcport_bridge::daemon::run(session).await;
    }

    let ctx = Ctx::new(cli.json);

    // Every invocation reconciles the registry with reality; `clean` runs
    // its own sweep with expired-session removal.
    if !matches!(cli.command, Commands::Clean) {
        let report = ctx
            .registry
            .consolidate(false, Arc::clone(&ctx.secrets))
            .await?;
        if report.crashed > 0 {
            tracing::debug!(crashed = report.crashed, "consolidation reaped dead bridges");
        }
    }

    match cli.command {
        Commands::Connect {
            name,
            url,
            command,
            args,
            env,
            headers,
            profile,
            proxy,
            proxy_host,
            proxy_bearer,
            timeout_ms,
            ttl_ms,
            refresh_buffer_sec,
            lock_timeout_ms,
        } => {
            commands::connect(&ctx, ConnectOptions {
                name,
                url,
                command,
                args,
                env,
                headers,
                profile,
                proxy_port: proxy,
                proxy_host,
                proxy_bearer,
                timeout_ms,
                ttl_ms,
                refresh_buffer_sec,
                lock_timeout_ms,
            })
            .await
        },
        Commands::Close { name } => commands::close(&ctx, &name).await,
        Commands::Restart { name } => commands::restart(&ctx, &name).await,
        Commands::Sessions => commands::sessions(&ctx).await,
        Commands::Status { name } => commands::status(&ctx, &name).await,
        Commands::Clean => commands::clean(&ctx).await,
        Commands::Ping { name } => commands::ping(&ctx, &name).await,
        Commands::ToolsList { name } => commands::tools_list(&ctx, &name).await,
        Commands::ToolsCall { name, tool, args } => {
            commands::tools_call(&ctx, &name, &tool, args.as_deref()).await
        },
        Commands::ResourcesList { name, templates } => {
            commands::resources_list(&ctx, &name, templates).await
        },
        Commands::ResourcesRead { name, uri } => {
            commands::resources_read(&ctx, &name, &uri).await
        },
        Commands::ResourcesSubscribe { name, uri } => {
            commands::resources_subscribe(&ctx, &name, &uri, true).await
        },
        Commands::ResourcesUnsubscribe { name, uri } => {
            commands::resources_subscribe(&ctx, &name, &uri, false).await
        },
        Commands::PromptsList { name } => commands::prompts_list(&ctx, &name).await,
        Commands::PromptsGet { name, prompt, args } => {
            commands::prompts_get(&ctx, &name, &prompt, args.as_deref()).await
        },
        Commands::LogLevel { name, level } => commands::log_level(&ctx, &name, &level).await,
        Commands::Auth { action } => match action {
            AuthAction::List => commands::auth_list(&ctx).await,
            AuthAction::Show { server_url, name } => {
                commands::auth_show(&ctx, &server_url, &name).await
            },
        },
        Commands::BridgeDaemon { .. } => unreachable!("handled above"),
    }
}
