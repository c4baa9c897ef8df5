use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use k8s_openapi::serde_json;
use kubemirror::config::{parse_list, ControllerConfig, DEFAULT_LOG_LEVEL, DEFAULT_RESOURCES};
use kubemirror::controller::{Controller, StatusReporter};
use kubemirror::domain::ResourceKind;
use kubemirror::k8s::cache::CacheManager;
use kubemirror::k8s::client::KubeResourceClient;
use kubemirror::k8s::remote::RemoteResourceClient;
use kubemirror::reader::{CacheReader, DeploymentListResponse};
use std::io;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// DEBUG, INFO, WARN or ERROR; `RUST_LOG` takes precedence
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror the cluster and reconcile deployments until interrupted
    Control {
        /// Comma-separated namespaces to watch
        #[arg(short, long, default_value = "default")]
        namespaces: String,

        /// Comma-separated resources to watch
        #[arg(short, long, default_value = DEFAULT_RESOURCES)]
        resources: String,
    },
    /// Print a cached listing
    List {
        /// Resource type, only deployments are supported
        resource: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,

        #[arg(short, long, value_enum, default_value_t = Output::Table)]
        output: Output,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Table,
    Json,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn control(config: ControllerConfig) -> anyhow::Result<()> {
    let client: Arc<dyn RemoteResourceClient> = Arc::new(KubeResourceClient::default());
    let mut controller = Controller::new(config, client, Arc::new(StatusReporter));
    controller.start().await.context("starting controller")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    controller.stop().await;
    Ok(())
}

async fn list(config: ControllerConfig, resource: &str, namespace: &str, output: Output) -> anyhow::Result<()> {
    if ResourceKind::from_resource_name(resource) != Some(ResourceKind::Deployment) {
        anyhow::bail!("unsupported resource {resource:?}, only deployments can be listed");
    }

    let client: Arc<dyn RemoteResourceClient> = Arc::new(KubeResourceClient::default());
    client.connect().await.context("connecting to cluster")?;

    let cache = Arc::new(CacheManager::new(Arc::clone(&client), config.cache, &[ResourceKind::Deployment]));
    cache.initialize_for_namespaces(&[namespace.to_string()]).await?;
    let reader = CacheReader::new(Arc::clone(&cache), client);
    let listing = reader.list_deployments(namespace).await?;
    cache.shutdown().await;

    match output {
        Output::Json => {
            let response = DeploymentListResponse::new(namespace, &listing);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Output::Table => {
            println!("{:<40} {:<8} {:<11} {:<10} CREATED", "NAME", "READY", "UP-TO-DATE", "AVAILABLE");
            for dep in &listing.items {
                println!(
                    "{:<40} {:<8} {:<11} {:<10} {}",
                    dep.name,
                    format!("{}/{}", dep.ready_replicas, dep.replicas),
                    dep.updated_replicas,
                    dep.available_replicas,
                    dep.creation_timestamp_text()
                );
            }
            eprintln!("source: {} synced: {}", listing.source, listing.synced);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ControllerConfig::default().with_log_level(&args.log_level);
    init_tracing(&config.log_level);
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match args.command {
        Command::Control { namespaces, resources } => {
            let config = config
                .with_namespaces(parse_list(&namespaces))
                .with_resources(parse_list(&resources));
            control(config).await
        }
        Command::List {
            resource,
            namespace,
            output,
        } => list(config, &resource, &namespace, output).await,
        Command::Completions { shell } => {
            let mut cmd = Args::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
