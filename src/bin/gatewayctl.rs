//! `amtp-gatewayctl` - a thin CLI wrapper over the gateway library.

use std::sync::Arc;

use amtp_gateway::agent_registry::{AgentRegistry, DeliveryMode, RegisterAgentRequest};
use amtp_gateway::config::GatewayConfig;
use amtp_gateway::identifiers::SchemaPattern;
use amtp_gateway::schema::registry::MockRegistryClient;
use amtp_gateway::schema::RegistryClient;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "amtp-gatewayctl", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to a gateway config file (JSON or TOML). Falls back to the
    /// development profile when omitted.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the gateway server (delegates to `amtp-gateway`).
    Serve,

    #[command(subcommand)]
    Agent(AgentCommand),

    #[command(subcommand)]
    Schema(SchemaCommand),
}

#[derive(Subcommand)]
enum AgentCommand {
    /// Registers a local agent in this process's in-memory registry.
    Register {
        name: String,
        #[arg(long, value_enum, default_value = "pull")]
        mode: DeliveryModeArg,
        #[arg(long)]
        push_target: Option<String>,
        #[arg(long = "schema")]
        supported_schemas: Vec<String>,
    },
    /// Rotates a local agent's API key.
    RotateKey { address: String },
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Lists schema identifiers matching an optional domain/entity pattern.
    List {
        #[arg(default_value = "")]
        pattern: String,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum DeliveryModeArg {
    Push,
    Pull,
}

impl From<DeliveryModeArg> for DeliveryMode {
    fn from(value: DeliveryModeArg) -> Self {
        match value {
            DeliveryModeArg::Push => Self::Push,
            DeliveryModeArg::Pull => Self::Pull,
        }
    }
}

fn load_config(path: Option<&str>) -> Result<GatewayConfig> {
    match path {
        Some(path) => Ok(GatewayConfig::from_file(path)?),
        None => Ok(GatewayConfig::development()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => {
            eprintln!("run the `amtp-gateway` binary to start the server");
        }
        Command::Agent(AgentCommand::Register { name, mode, push_target, supported_schemas }) => {
            // The CLI's registry is in-memory and process-local; against a
            // running gateway, register through the admin HTTP API instead.
            let registry = AgentRegistry::new(config.server.domain.clone(), None);
            let supported_schemas: Vec<SchemaPattern> = supported_schemas
                .iter()
                .map(|p| SchemaPattern::parse(p))
                .collect::<Result<_, _>>()?;
            let outcome = registry
                .register_agent(RegisterAgentRequest {
                    name,
                    delivery_mode: mode.into(),
                    push_target,
                    push_headers: None,
                    supported_schemas,
                    api_key: None,
                })
                .await?;
            println!("registered {}", outcome.agent.address);
            println!("api key: {}", outcome.api_key);
        }
        Command::Agent(AgentCommand::RotateKey { address }) => {
            let registry = AgentRegistry::new(config.server.domain.clone(), None);
            let api_key = registry.rotate_api_key(&address)?;
            println!("new api key for {address}: {api_key}");
        }
        Command::Schema(SchemaCommand::List { pattern }) => {
            let registry: Arc<dyn RegistryClient> = Arc::new(MockRegistryClient::new());
            let ids = registry.list_schemas(&pattern).await?;
            for id in ids {
                println!("{id}");
            }
        }
    }

    Ok(())
}
