use std::{process, sync::Arc};

use keel::{
    assembly::{self, ModuleRegistry},
    config,
    error::AppError,
    http::{self, AppState, middleware::RequestLogConfig},
    logging::{Masker, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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
    // Serve is the only command; its overrides are already folded into the
    // settings by `load_with_cli`.
    let (_cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    // Loader order matters here: secret-store first, then the rest. After
    // this point the settings are immutable.
    let settings = assembly::run_loaders(settings).await?;

    let registry = ModuleRegistry::builtin();
    let services = Arc::new(registry.assemble(&settings).await?);
    info!(
        target: "keel::startup",
        modules = ?services.active_modules,
        "services assembled",
    );

    serve(settings, services).await
}

async fn serve(
    settings: config::Settings,
    services: Arc<assembly::AssembledServices>,
) -> Result<(), AppError> {
    let log_config = Arc::new(RequestLogConfig {
        masker: Masker::new(settings.logging.sensitive_fields.clone()),
        exclude_paths: settings.logging.exclude_paths.clone(),
    });

    let state = AppState { services };
    let router = http::build_router(axum::Router::new(), state, log_config);

    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(target: "keel::startup", addr = %settings.server.addr, "listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(target: "keel::startup", "shutdown signal received");
    }
}
