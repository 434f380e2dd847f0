use std::{process, sync::Arc};

use lazypress::{
    application::{
        convert::ConversionService,
        error::AppError,
        render::{ChromeLauncher, LaunchSettings, RenderCoordinator},
        sanitize::Sanitizer,
        sink::SinkSelector,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::io::AsyncReadExt;
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

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) =
        config::load_with_cli().map_err(|err| AppError::from(InfraError::from(err)))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Convert(args) => run_convert(settings, *args).await,
    }
}

fn build_conversion_service(settings: &config::Settings) -> ConversionService {
    let launcher = ChromeLauncher::new(LaunchSettings {
        executable: settings.browser.executable.clone(),
        sandboxed_host: settings.browser.sandboxed_host,
        idle_timeout: settings.browser.idle_timeout,
    });

    ConversionService::new(
        RenderCoordinator::new(Arc::new(launcher), settings.browser.render_timeout),
        Sanitizer::new(),
        SinkSelector::new(settings.output.directory.clone()),
    )
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = HttpState {
        conversions: Arc::new(build_conversion_service(&settings)),
    };
    let router = http::build_router(state, settings.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "lazypress::serve",
        addr = %settings.server.addr,
        executable = ?settings.browser.executable,
        sandboxed_host = settings.browser.sandboxed_host,
        "Listening for conversion requests"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "lazypress::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(
            target = "lazypress::serve",
            error = %err,
            "failed to listen for shutdown signal"
        );
    }
}

async fn run_convert(settings: config::Settings, args: config::ConvertArgs) -> Result<(), AppError> {
    let html = if args.reads_stdin() {
        let mut buffer = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buffer)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?;
        buffer
    } else {
        tokio::fs::read(&args.input)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?
    };

    let service = build_conversion_service(&settings);
    let outcome = service.convert(&args.param_map(), html, None).await?;

    if let Some(path) = outcome.file_path {
        info!(
            target = "lazypress::convert",
            file = %path.display(),
            bytes = outcome.bytes,
            "PDF written"
        );
    }

    Ok(())
}
