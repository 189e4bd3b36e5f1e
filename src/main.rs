use clap::{Args, Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod access;
mod cluster;
mod components;
mod config;
mod crd;
mod error;
mod executor;
mod install;
mod plan;
mod poller;
mod produce;
mod render;
mod resource;
mod retry;
#[cfg(test)]
mod testing;

use access::AccessPoint;
use cluster::KubeClusterClient;
use components::Component;
use config::{ConfigFile, InstallConfig};
use error::Error;
use executor::{Executor, Report};
use plan::Plan;
use produce::RestProducer;

#[derive(Parser)]
#[command(name = "cloudpak-installer")]
#[command(bin_name = "cloudpak-installer")]
enum InstallerCli {
    /// Apply the selected components and wait until they are ready
    Install(RunArgs),
    /// Remove the selected components' instances, operators, CSVs and catalogs
    Uninstall(RunArgs),
    /// Print the manifests an install would apply, without a cluster
    Render(SelectionArgs),
    /// Send test messages through the Event Streams REST producer
    Produce(ProduceArgs),
}

#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct SelectionArgs {
    #[arg(short, long)]
    namespace: Option<String>,
    #[arg(long, env = "IBM_ENTITLEMENT_KEY", hide_env_values = true)]
    entitlement_key: Option<String>,
    #[arg(long)]
    storage_class: Option<String>,
    #[arg(long)]
    storage_size: Option<String>,
    #[arg(long, value_enum, value_delimiter = ',')]
    components: Option<Vec<Component>>,
    #[arg(long)]
    accept_license: bool,
    #[arg(long)]
    concurrency: Option<usize>,
    /// YAML file with the same settings; flags win
    #[arg(long)]
    config: Option<PathBuf>,
}

impl SelectionArgs {
    fn install_config(&self) -> Result<InstallConfig, Error> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        let flags = ConfigFile {
            namespace: self.namespace.clone(),
            entitlement_key: self.entitlement_key.clone(),
            storage_class: self.storage_class.clone(),
            storage_size: self.storage_size.clone(),
            components: self.components.clone(),
            accept_license: self.accept_license.then_some(true),
            concurrency: self.concurrency,
            timings: None,
        };
        InstallConfig::try_from(file.merge(flags))
    }
}

#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct RunArgs {
    #[command(flatten)]
    selection: SelectionArgs,
    /// Stop scheduling and cancel waits after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
    #[arg(long)]
    show_credentials: bool,
}

#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct ProduceArgs {
    #[arg(long)]
    topic: String,
    /// Base URL of the REST producer route
    #[arg(long)]
    rest_api_url: String,
    /// SCRAM username
    #[arg(long)]
    username: String,
    #[arg(long, env = "ES_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value = produce::DEFAULT_MESSAGE)]
    message: String,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    count: u32,
    /// Accept the route's certificate without verifying it
    #[arg(long)]
    insecure: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Serialize)]
struct Outcome<'a> {
    report: &'a Report,
    access: &'a [AccessPoint],
}

/// Ctrl-C cancels the whole run; a deadline only cancels a child of it.
fn cancellation(deadline_secs: Option<u64>) -> CancellationToken {
    let root = CancellationToken::new();
    let interrupted = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            interrupted.cancel();
        }
    });

    match deadline_secs {
        Some(secs) => {
            let child = root.child_token();
            let expired = child.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                warn!(deadline_secs = secs, "Deadline reached, cancelling run");
                expired.cancel();
            });
            child
        }
        None => root,
    }
}

async fn execute(
    client: &KubeClusterClient,
    args: &RunArgs,
    config: &InstallConfig,
    plan: Plan,
    collect_access: bool,
) -> Result<bool, Error> {
    let cancel = cancellation(args.deadline_secs);

    let report = Executor::new(client)
        .with_retry(install::retry_policy(&config.timings))
        .with_concurrency(config.concurrency)
        .run(&plan, &cancel)
        .await?;

    let access: Vec<AccessPoint> = if collect_access {
        access::collect(client, config, &report)
            .await
            .into_iter()
            .map(|point| {
                if args.show_credentials {
                    point
                } else {
                    point.without_password()
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let outcome = Outcome {
        report: &report,
        access: &access,
    };
    match args.output {
        OutputFormat::Text => {
            println!("{}", report);
            for point in &access {
                println!("{}", point);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&outcome)?),
    }

    Ok(report.is_success())
}

async fn produce_messages(args: &ProduceArgs) -> Result<(), Error> {
    let producer = RestProducer::new(
        &args.rest_api_url,
        &args.topic,
        &args.username,
        &args.password,
        args.insecure,
    )?;
    info!(url = %producer.records_url(), username = %args.username, "Producing messages");

    let count = args.count as usize;
    for i in 0..count {
        let message = produce::message_text(&args.message, i, count);
        let delivery = producer.send(&message).await?;
        println!("Message {} delivered to {} {}", i + 1, args.topic, delivery);
    }
    info!(count, "All messages sent and delivered");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let succeeded = match InstallerCli::parse() {
        InstallerCli::Install(args) => {
            let config = args.selection.install_config()?;
            config.check_license()?;
            config.check_entitlement()?;
            let plan = install::build_install_plan(&config)?;
            let client = KubeClusterClient::try_default().await?;
            info!(namespace = %config.namespace, steps = plan.steps.len(), "Installing");
            execute(&client, &args, &config, plan, true).await?
        }
        InstallerCli::Uninstall(args) => {
            let config = args.selection.install_config()?;
            let client = KubeClusterClient::try_default().await?;
            let csvs = install::installed_csvs(&client, &config).await?;
            let plan = install::build_uninstall_plan(&config, &csvs)?;
            info!(namespace = %config.namespace, steps = plan.steps.len(), "Uninstalling");
            execute(&client, &args, &config, plan, false).await?
        }
        InstallerCli::Render(args) => {
            let config = args.install_config()?;
            for manifest in install::render_all(&config)? {
                print!("---\n{}", manifest.to_yaml()?);
            }
            true
        }
        InstallerCli::Produce(args) => {
            produce_messages(&args).await?;
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
