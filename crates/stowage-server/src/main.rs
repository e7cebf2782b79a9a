use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use stowage_functions::{FunctionsEmulatorClient, MulticastTarget, StorageCloudFunctions};
use stowage_persistence::{DiskPersistence, Persistence};
use stowage_rules::{
    AdminCredentialValidator, AllowAllRules, DocumentFetcher, FirebaseRulesValidator,
    FirestoreEmulatorClient, RulesManager, RulesValidator, RuntimeConfig, StorageRulesRuntime,
};
use stowage_storage::{StaticAdminSdkConfig, StorageLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stowage", about = "Local Firebase Storage emulator")]
struct Cli {
    #[arg(long, env = "STOWAGE_PROJECT", default_value = "demo-project")]
    project: String,

    #[arg(long, env = "STOWAGE_DATA_DIR", default_value = "./stowage-data")]
    data_dir: PathBuf,

    /// Address clients use to reach this emulator; used in object links.
    #[arg(long, env = "STORAGE_EMULATOR_HOST", default_value = "127.0.0.1:9199")]
    host: String,

    #[arg(long, env = "FUNCTIONS_EMULATOR_HOST")]
    functions_host: Option<String>,

    #[arg(long, env = "FIRESTORE_EMULATOR_HOST")]
    firestore_host: Option<String>,

    /// Security rules applied to every bucket.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Skip the rules evaluator and allow every request.
    #[arg(long, default_value_t = false)]
    no_rules: bool,

    #[arg(long)]
    default_bucket: Option<String>,

    #[arg(long)]
    import: Option<PathBuf>,

    #[arg(long)]
    export_on_exit: Option<PathBuf>,
}

fn base_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{host}")
    }
}

/// Empties the data directory left by a previous run, naming what is removed.
async fn clear_data_dir(persistence: &DiskPersistence) -> anyhow::Result<usize> {
    let removed = count_entries(persistence.dir_path()).await?;
    if removed > 0 {
        warn!(
            data_dir = %persistence.dir_path().display(),
            entries = removed,
            "removing files left in the data dir"
        );
    }
    clear_data_dir(&persistence).await?;
    Ok(removed)
}

async fn count_entries(dir: &Path) -> anyhow::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading data dir {}", dir.display()))?;
    let mut count = 0;
    while entries.next_entry().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn init_tracing() -> anyhow::Result<()> {
    let level = if std::env::var_os("STORAGE_EMULATOR_DEBUG").is_some() {
        "stowage=debug"
    } else {
        "stowage=info"
    };
    let env_filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let base_url = base_url(&cli.host);

    let persistence = Arc::new(
        DiskPersistence::new(cli.data_dir.clone())
            .await
            .with_context(|| format!("opening data dir {}", cli.data_dir.display()))?,
    );
    persistence.delete_all().await?;

    let multicast: Option<Arc<dyn MulticastTarget>> = cli.functions_host.as_deref().map(|host| {
        info!(host, "functions emulator triggers enabled");
        Arc::new(FunctionsEmulatorClient::from_host(host)) as Arc<dyn MulticastTarget>
    });
    let functions = StorageCloudFunctions::new(multicast, cli.project.clone(), base_url.clone());

    let runtime = if cli.no_rules {
        warn!("rules evaluation disabled, every request is allowed");
        None
    } else {
        let fetcher: Option<Arc<dyn DocumentFetcher>> = cli.firestore_host.as_deref().map(|host| {
            Arc::new(FirestoreEmulatorClient::from_host(host)) as Arc<dyn DocumentFetcher>
        });
        let runtime = StorageRulesRuntime::new(RuntimeConfig::from_env(), fetcher);
        runtime
            .start()
            .await
            .context("starting the storage rules evaluator")?;
        Some(runtime)
    };

    let rules: Arc<dyn RulesValidator> = match &runtime {
        Some(runtime) => {
            let manager = RulesManager::new(runtime.clone());
            if let Some(path) = &cli.rules {
                manager
                    .load_from_file(path, None)
                    .await
                    .with_context(|| format!("loading rules from {}", path.display()))?;
            } else {
                warn!("no rules file given, Firebase requests will be denied");
            }
            Arc::new(FirebaseRulesValidator::new(manager, cli.project.clone()))
        }
        None => Arc::new(AllowAllRules),
    };

    let admin_layer = StorageLayer::new(cli.project.clone(), persistence.clone(), functions)
        .with_admin_config(Arc::new(StaticAdminSdkConfig::new(cli.default_bucket.clone())));
    let firebase_layer = admin_layer
        .clone()
        .with_rules_validator(rules)
        .with_admin_validator(Arc::new(AdminCredentialValidator));

    if let Some(dir) = &cli.import {
        admin_layer
            .import(dir)
            .await
            .with_context(|| format!("importing storage from {}", dir.display()))?;
    }

    let buckets = firebase_layer.list_buckets().await;
    info!(
        project = %cli.project,
        base_url = %base_url,
        data_dir = %persistence.dir_path().display(),
        buckets = buckets.len(),
        "storage emulator ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(dir) = &cli.export_on_exit {
        admin_layer
            .export(dir)
            .await
            .with_context(|| format!("exporting storage to {}", dir.display()))?;
    }
    if let Some(runtime) = runtime {
        runtime.stop().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clearing_data_dir_reports_removed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let persistence = DiskPersistence::new(data_dir.clone()).await.unwrap();
        assert_eq!(clear_data_dir(&persistence).await.unwrap(), 0);

        std::fs::write(data_dir.join("left-over"), b"x").unwrap();
        std::fs::create_dir(data_dir.join("nested")).unwrap();
        assert_eq!(clear_data_dir(&persistence).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(&data_dir).unwrap().count(), 0);
    }

    #[test]
    fn base_url_adds_scheme_once() {
        assert_eq!(base_url("127.0.0.1:9199"), "http://127.0.0.1:9199");
        assert_eq!(base_url("https://example.test/"), "https://example.test");
    }
}
