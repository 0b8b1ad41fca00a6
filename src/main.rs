use std::{process, sync::Arc};

use tavola::{
    application::{
        error::AppError,
        scheduler::{KeyedCoalescingScheduler, KeyedTaskFn},
        tables::TableService,
    },
    config,
    domain::types::Table,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        notify::ValidationHub,
        telemetry,
        validator::{CommandValidator, ValidationTask},
    },
};
use tokio::fs;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let store = Arc::new(tavola::infra::providers::JsonFileStore::new(
        settings.data.root.clone(),
    ));

    let hub = ValidationHub::new(64);
    let scheduler = KeyedCoalescingScheduler::new(
        settings.validator.slots.get(),
        validation_task(&settings),
        hub.sender(),
    );

    let seed = load_snapshot(&settings.data.snapshot_file).await?;
    let tables = Arc::new(TableService::new(
        store.clone(),
        store,
        scheduler,
        settings.cache.table_limit.get(),
        settings.cache.default_page_limit,
        seed,
    ));

    spawn_outcome_logger(&hub);
    spawn_snapshot_handler(tables.clone(), settings.data.snapshot_file.clone())?;

    serve_http(&settings, tables).await
}

/// Wrap the configured checker command as the scheduler's task. The payload
/// is the revision that admitted the run; it only matters for logging, since
/// the checker always reads the newest on-disk state.
fn validation_task(settings: &config::Settings) -> KeyedTaskFn<u64> {
    let validator: Arc<dyn ValidationTask> = Arc::new(CommandValidator::new(
        settings.validator.command.clone(),
        settings.data.root.clone(),
    ));

    Arc::new(move |resource, revision| {
        let validator = Arc::clone(&validator);
        Box::pin(async move {
            debug!(resource, revision, "validation run starting");
            validator.check(&resource).await
        })
    })
}

async fn load_snapshot(path: &std::path::Path) -> Result<Vec<Table>, AppError> {
    match fs::read(path).await {
        Ok(bytes) => {
            let tables: Vec<Table> = serde_json::from_slice(&bytes).map_err(|err| {
                InfraError::serialization(format!("snapshot file unreadable: {err}"))
            })?;
            info!(path = %path.display(), tables = tables.len(), "cache seeded from snapshot");
            Ok(tables)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(InfraError::Io(err).into()),
    }
}

fn spawn_outcome_logger(hub: &ValidationHub) {
    let mut outcomes = hub.subscribe();
    tokio::spawn(async move {
        while let Ok(outcome) = outcomes.recv().await {
            match outcome.result {
                Ok(diagnostics) if diagnostics.is_empty() => {
                    info!(resource = outcome.key, "validation clean");
                }
                Ok(diagnostics) => {
                    warn!(resource = outcome.key, %diagnostics, "validation found problems");
                }
                Err(reason) => {
                    error!(resource = outcome.key, %reason, "validation failed to run");
                }
            }
        }
    });
}

/// On SIGUSR2, hand the cache off to disk so a restarted process can seed
/// from it.
#[cfg(unix)]
fn spawn_snapshot_handler(
    tables: Arc<TableService>,
    path: std::path::PathBuf,
) -> Result<(), AppError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut stream = signal(SignalKind::user_defined2())
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            let snapshot = match tables.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    error!(error = %err, "snapshot request failed");
                    continue;
                }
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(bytes) => {
                    if let Err(err) = fs::write(&path, bytes).await {
                        error!(error = %err, path = %path.display(), "snapshot write failed");
                    } else {
                        info!(path = %path.display(), tables = snapshot.len(), "snapshot written");
                    }
                }
                Err(err) => error!(error = %err, "snapshot serialization failed"),
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn spawn_snapshot_handler(
    _tables: Arc<TableService>,
    _path: std::path::PathBuf,
) -> Result<(), AppError> {
    Ok(())
}

async fn serve_http(
    settings: &config::Settings,
    tables: Arc<TableService>,
) -> Result<(), AppError> {
    let router = http::build_router(HttpState { tables });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(addr = %settings.server.addr, "listening");

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
