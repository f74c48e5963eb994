use std::{path::PathBuf, sync::Arc};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use meshlb::{
    config::NodeConfig,
    generator::Generator,
    resolver::{FixedIpResolver, IpResolver},
    seed::Provider,
    telemetry::{initialize_subscriber, LogFormat},
    types::{Application, Upstream, UpstreamApplicationMap},
};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Parser)]
#[command(name = "meshlb-ctl")]
#[command(about = "meshlb seed store and config generation tool", long_about = None)]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prints the seeds currently published by the configured provider
    FetchSeeds {
        #[arg(long)]
        config: PathBuf,
    },
    /// Publishes this node as a seed
    PushSeed {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        port: String,
        /// Address to publish instead of the one found by the configured resolver
        #[arg(long)]
        ip: Option<String>,
    },
    /// Renders the proxy configuration for a json list of upstreams
    Render {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        state: PathBuf,
    },
    /// Validates a node configuration file
    Check {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct UpstreamEntry {
    name: String,
    address: String,
    #[serde(default)]
    applications: Vec<Application>,
}

fn read_state(path: &PathBuf) -> anyhow::Result<UpstreamApplicationMap> {
    let contents = std::fs::read_to_string(path)?;
    let entries: Vec<UpstreamEntry> = serde_json::from_str(&contents)?;

    let mut upstreams = UpstreamApplicationMap::new();
    for entry in entries {
        for application in entry.applications.iter() {
            application.validate()?;
        }
        upstreams.insert(Upstream::new(entry.name, entry.address), entry.applications);
    }

    Ok(upstreams)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    initialize_subscriber(args.log_format)?;

    let mut stdout = tokio::io::stdout();
    match args.command {
        Commands::FetchSeeds { config } => {
            let config = NodeConfig::from_path(config)?;
            let provider = config.provider().build()?;
            let seeds = provider.fetch_seed().await?;

            stdout
                .write_all(serde_json::to_string_pretty(&seeds)?.as_bytes())
                .await?;
        }
        Commands::PushSeed { config, port, ip } => {
            let config = NodeConfig::from_path(config)?;
            let provider = config.provider().build()?;
            let resolver: Arc<dyn IpResolver> = match ip {
                Some(ip) => Arc::new(FixedIpResolver::new(ip)),
                None => config.resolver.build()?,
            };

            provider.push_seed(resolver.as_ref(), &port).await?;
        }
        Commands::Render { config, state } => {
            let config = NodeConfig::from_path(config)?;
            let load_balancer = config
                .load_balancer
                .ok_or_else(|| anyhow!("render requires a load balancer config"))?;
            let generator = load_balancer.generator.build()?;
            let upstreams = read_state(&state)?;

            stdout
                .write_all(generator.generate_config(&upstreams)?.as_bytes())
                .await?;
        }
        Commands::Check { config } => {
            let config = NodeConfig::from_path(config)?;
            let kind = if config.lb { "load balancer" } else { "backend" };
            stdout
                .write_all(format!("valid {} configuration\n", kind).as_bytes())
                .await?;
        }
    }
    stdout.flush().await?;

    Ok(())
}
