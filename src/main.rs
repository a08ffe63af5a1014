//! # PlugHost: chat bot plugin host
//!
//! Usage:
//!   plughost run                          # Load plugins and serve the configured transport
//!   plughost run --config bot.toml -v     # Custom config, debug logging
//!   plughost check                        # Load manifests, print a summary, exit
//!   plughost cron "30 9 * * 1-5" -n 3     # Print upcoming fire times

mod plugins;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use plughost_channels::{TransportHandle, create_transport};
use plughost_core::{HostConfig, SystemClock};
use plughost_plugins::{AdminCommand, LoadSummary, PluginHost};
use plughost_scheduler::CronSchedule;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plughost", version, about = "🔌 PlugHost: chat bot plugin host")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the bot
    Run {
        /// Config file (default: ~/.plughost/config.toml)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Load every manifest once and report what would run
    Check {
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show the next fire times of a cron expression
    Cron {
        expression: String,
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
        /// IANA timezone to evaluate in
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
}

fn load_config(path: Option<&str>) -> Result<HostConfig> {
    let config = match path {
        Some(p) => HostConfig::load_from(Path::new(&shellexpand::tilde(p).to_string()))?,
        None => HostConfig::load()?,
    };
    Ok(config)
}

fn print_summary(summary: &LoadSummary) {
    println!(
        "🔌 Loaded {} plugin(s), {} skipped, {} failed, {} scheduled task(s)",
        summary.loaded,
        summary.skipped,
        summary.failed.len(),
        summary.tasks
    );
    for (file, error) in &summary.failed {
        println!("   ❌ {file}: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "plughost=debug,plughost_plugins=debug,plughost_scheduler=debug"
    } else {
        "plughost=info,plughost_plugins=info,plughost_scheduler=info,plughost_store=info,plughost_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.command {
        Command::Run { config } => run(load_config(config.as_deref())?).await,
        Command::Check { config } => check(load_config(config.as_deref())?).await,
        Command::Cron {
            expression,
            count,
            timezone,
        } => cron(&expression, count, &timezone),
    }
}

async fn run(config: HostConfig) -> Result<()> {
    let store = plughost_store::create_store(&config.store)?;
    let TransportHandle {
        transport,
        admin_lines,
    } = create_transport(&config.transport)?;

    let host = Arc::new(PluginHost::new(
        config,
        plugins::builtin_catalog(),
        transport,
        store,
        Arc::new(SystemClock),
    )?);

    println!("🔌 PlugHost v{}", env!("CARGO_PKG_VERSION"));
    println!("   🤖 Bot:       {}", host.config().bot_name);
    println!("   📂 Plugins:   {}", host.loader.plugins_dir().display());
    println!("   🗄️  Store:     {}", host.context().store.name());
    println!("   📡 Transport: {}", host.context().transport.name());
    println!("   🕐 Timezone:  {}", host.supervisor.timezone());
    println!();

    let summary = host.start().await?;
    print_summary(&summary);

    if let Some(lines) = admin_lines {
        tokio::spawn(serve_admin(host.clone(), lines));
        println!("   🛠️  Admin: type '/admin help' for commands\n");
    }

    tokio::select! {
        result = host.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Ctrl-C received");
        }
    }
    host.shutdown().await;
    println!("👋 Bye");
    Ok(())
}

/// Execute `/admin` lines typed into the console until the feed closes.
async fn serve_admin(host: Arc<PluginHost>, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        if line.trim() == "help" {
            println!(
                "admin commands: reload [plugin] | enable <plugin> | disable <plugin> | list | stats | \
                 tasks | trigger <plugin/task> | reset <plugin/task> | health | shutdown"
            );
            continue;
        }
        let command = match AdminCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("⚠️ {e}");
                continue;
            }
        };
        let shutting_down = command == AdminCommand::Shutdown;
        let response = host.admin.execute(command).await;
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("⚠️ Failed to render response: {e}"),
        }
        if shutting_down {
            break;
        }
    }
}

async fn check(config: HostConfig) -> Result<()> {
    let store: Arc<dyn plughost_core::Store> = Arc::new(plughost_store::MemoryStore::new());
    let transport = Arc::new(plughost_channels::CliTransport::new(config.transport.cli.clone()));
    let host = PluginHost::new(config, plugins::builtin_catalog(), transport, store, Arc::new(SystemClock))?;

    let summary = host.loader.load_all(false).await?;
    print_summary(&summary);
    for info in host.admin.list() {
        println!(
            "   • {} v{} [{}] {}",
            info.id,
            info.version,
            info.category.as_str(),
            info.commands.join(", ")
        );
    }
    for task in host.admin.task_status() {
        let next = task
            .next_fire_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into());
        println!("   ⏰ {} `{}` → next {next}", task.key(), task.expression);
    }
    host.shutdown().await;

    if summary.failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} manifest(s) failed to load", summary.failed.len())
    }
}

fn cron(expression: &str, count: usize, timezone: &str) -> Result<()> {
    let tz: chrono_tz::Tz = timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid timezone '{timezone}': {e}"))?;
    let schedule = CronSchedule::parse(expression)?;
    let mut after = chrono::Utc::now();
    for _ in 0..count {
        let Some(next) = schedule.next_after(after, &tz) else {
            println!("(no further fire times)");
            break;
        };
        println!("{}", next.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z (%a)"));
        after = next;
    }
    Ok(())
}

