//! ike operator - routes developer traffic to per-session workload clones

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};

use ike_common::crd::Session;
use ike_common::kube_utils::{create_client, KubeResourceClient};
use ike_common::metrics::OtelMetricsRecorder;
use ike_common::telemetry::{init_telemetry, TelemetryConfig};
use ike_common::template::PatchEngine;
use ike_common::FIELD_MANAGER;
use ike_operator::controller_runner::{build_session_controller, served_kinds, WatchScope};
use ike_session::controller::Context;
use ike_session::Engine;

/// ike - clones workloads per Session and routes matching traffic to them
#[derive(Parser, Debug)]
#[command(name = "ike-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Directory with extra patch templates (`*.tpl`, optional `*.var`)
    #[arg(long, env = "TEMPLATE_PATH")]
    template_path: Option<PathBuf>,

    /// Only reconcile Sessions in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Pause between reverting a changed ref and applying it again
    #[arg(long, env = "IKE_REVERT_PAUSE_MS", default_value_t = 2000)]
    revert_pause_ms: u64,

    /// Emit human readable logs instead of JSON
    #[arg(long, env = "IKE_TEXT_LOGS")]
    text_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Sessions and every kind they modify, applying each ref and
    /// reverting it when it is removed or the Session is deleted.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client's TLS stack needs a process-wide crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Session::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json_logs: !cli.text_logs,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

/// Ensure the Session CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Api, Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Session CRD...");
    crds.patch("sessions.maistra.io", &params, &Patch::Apply(&Session::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Session CRD: {}", e))?;
    Ok(())
}

fn patch_engine(template_path: Option<&PathBuf>) -> anyhow::Result<PatchEngine> {
    match template_path {
        Some(dir) => {
            let engine = PatchEngine::with_template_dir(dir)
                .map_err(|e| anyhow::anyhow!("Failed to load templates from {}: {}", dir.display(), e))?;
            tracing::info!(
                path = %dir.display(),
                templates = ?engine.names().collect::<Vec<_>>(),
                "loaded patch templates"
            );
            Ok(engine)
        }
        None => Ok(PatchEngine::new()),
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("ike controller starting...");

    let client = create_client(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let engine = Engine::standard(
        Arc::new(patch_engine(cli.template_path.as_ref())?),
        Arc::new(OtelMetricsRecorder),
    );
    tracing::info!(
        locators = ?engine.locator_names(),
        modificators = ?engine.modificator_names(),
        "engine ready"
    );
    let ctx = Arc::new(
        Context::new(Arc::new(KubeResourceClient::new(client.clone())), engine)
            .with_revert_pause(Duration::from_millis(cli.revert_pause_ms)),
    );

    let scope = WatchScope {
        namespace: cli.watch_namespace,
    };
    match &scope.namespace {
        Some(ns) => tracing::info!(namespace = %ns, "watching one namespace"),
        None => tracing::info!("watching all namespaces"),
    }
    let dependents = served_kinds(&client).await;

    build_session_controller(client, ctx, scope, dependents).await;

    tracing::info!("ike controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_run_the_controller_everywhere() {
        let cli = Cli::try_parse_from(["ike-operator"]).unwrap();
        assert!(!cli.crd);
        assert!(cli.command.is_none());
        assert_eq!(cli.revert_pause_ms, 2000);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "ike-operator",
            "--watch-namespace",
            "bookinfo",
            "--revert-pause-ms",
            "0",
            "controller",
        ])
        .unwrap();
        assert_eq!(cli.watch_namespace.as_deref(), Some("bookinfo"));
        assert_eq!(cli.revert_pause_ms, 0);
        assert!(matches!(cli.command, Some(Commands::Controller)));
    }
}
