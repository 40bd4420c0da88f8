#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::Stream;
use identity_core::proto::{FILE_DESCRIPTOR_SET, identity_service_server::IdentityServiceServer};
use server::config::{CliArgs, ServerConfig};
use server::database::{bootstrap::run_bootstrap, manager::ConnectionManager, seed::SeedSpec};
use server::interceptor::unary::UnaryInterceptor;
use server::service::{handler::IdentityHandler, intercepted::Intercepted};
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

type IdentityServer = IdentityServiceServer<Intercepted<IdentityHandler>>;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(&config.log)?;
    let manager = Arc::new(ConnectionManager::new(config.connection.clone()));

    let result = bootstrap_and_serve(&manager, config).await;
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "Server exited with an error");
    }

    manager.close().await;
    providers.shutdown();
    result
}

async fn bootstrap_and_serve(
    manager: &Arc<ConnectionManager>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let spec = match &config.seed_file {
        Some(path) => SeedSpec::load(path)?,
        None => SeedSpec::builtin(),
    };
    let span = tracing::info_span!(
        "bootstrap",
        server_name = %config.interceptor.server_name,
        environment = ?config.environment,
    );
    run_bootstrap(
        manager,
        &config.dsn,
        config.retry,
        &spec,
        config.bootstrap_timeout,
    )
    .instrument(span)
    .await?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(incoming, manager, config).await;
            // TODO: Best effort to clean up the socket file although a panic
            // might leave it behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(incoming, manager, config).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    incoming: I,
    manager: &Arc<ConnectionManager>,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter.set_serving::<IdentityServer>().await;

    let service = Intercepted::new(
        IdentityHandler::new(Arc::clone(manager)),
        UnaryInterceptor::new(config.interceptor),
    );

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_identity_service(service))
        .serve_with_incoming_shutdown(incoming, shutdown_signal(health_reporter))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting identity service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            environment = ?config.environment,
            server_name = %config.interceptor.server_name,
            "Starting identity service on {}",
            addr
        );
    }
}

fn build_identity_service(service: Intercepted<IdentityHandler>) -> IdentityServer {
    IdentityServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(health_reporter: HealthReporter) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    health_reporter.set_not_serving::<IdentityServer>().await;
}
