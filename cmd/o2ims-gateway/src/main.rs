use std::sync::Arc;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser;
use prometheus_client::registry::Registry;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use gateway_core::config::GatewayConfig;
use gateway_core::delivery::{DeliveryConfig, PrimaryWorkerPool};
use gateway_core::emitter::{Emitter, PRIMARY_STREAM_KEY};
use gateway_core::federation::{
    DefaultFederationTransform, FederationConfig, FederationPublisher, QueryExpressionMatcher,
};
use gateway_core::log::RedisEventLog;
use gateway_core::metrics::DeliveryMetrics;
use gateway_core::store::{RedisHubStore, RedisSubscriptionStore};
use gateway_core::telemetry;
use gateway_core::watch::fake::FakeWatchSource;
use gateway_core::watch::WatchSource;

#[derive(Parser, Debug)]
#[command(
    name = "o2ims-gateway",
    about = "O2IMS event-notification gateway",
    version
)]
struct Cli {
    /// Listen port for /health and /metrics.
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    #[command(flatten)]
    gateway: GatewayConfig,
}

struct AppState {
    metrics: Arc<DeliveryMetrics>,
}

#[get("/metrics")]
async fn metrics(state: Data<AppState>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(state.metrics.encode())
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init(
        &cli.log_filter,
        cli.log_format,
        cli.tracing_url.as_deref(),
        cli.sample_ratio,
    )
    .await?;

    let config = cli.gateway;
    let registry = Registry::with_prefix("o2ims_gateway");
    let client = redis::Client::open(config.redis_url.clone())?;
    let conn = ConnectionManager::new(client).await?;

    let log: Arc<dyn gateway_core::log::DurableEventLog> =
        Arc::new(RedisEventLog::new(conn.clone(), PRIMARY_STREAM_KEY));
    let subscriptions: Arc<dyn gateway_core::store::SubscriptionStore> = Arc::new(
        RedisSubscriptionStore::new(conn.clone(), config.allow_insecure_callbacks, config.tenant_subscription_quota),
    );
    let hubs: Arc<dyn gateway_core::store::HubStore> = Arc::new(RedisHubStore::new(conn.clone()));
    let delivery_metrics = Arc::new(DeliveryMetrics::default());
    let http_client = reqwest::Client::new();

    // Real cluster connectivity is out of scope; the fake watch source keeps
    // the pipeline runnable end-to-end pending a production informer.
    let watch_source = Arc::new(FakeWatchSource::new(vec![]));
    let emitter = Emitter::spawn(log.clone(), config.max_stream_length);
    let watch_cancel = CancellationToken::new();
    let watch_handle = {
        let watch_source = watch_source.clone();
        let resync_period = config.informer_resync_period();
        let watch_cancel = watch_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = watch_source.run(emitter, resync_period, std::time::Duration::from_secs(30)) => {
                    if let Err(e) = result {
                        tracing::error!(%e, "watch source exited with error");
                    }
                }
                _ = watch_cancel.cancelled() => {}
            }
        })
    };

    let worker_pool = PrimaryWorkerPool::spawn(
        log.clone(),
        subscriptions,
        delivery_metrics.clone(),
        http_client.clone(),
        DeliveryConfig::from(&config),
    )
    .await?;

    let federation = FederationPublisher::spawn(
        log.clone(),
        hubs,
        Arc::new(DefaultFederationTransform),
        Arc::new(QueryExpressionMatcher),
        delivery_metrics.clone(),
        http_client,
        FederationConfig::from(&config),
    )
    .await?;

    let app_state = Data::new(AppState {
        metrics: delivery_metrics,
    });
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", cli.port))?
    .shutdown_timeout(5);

    let server_handle = server.run();
    tokio::select! {
        result = server_handle => { result?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    watch_cancel.cancel();
    let _ = watch_handle.await;
    worker_pool.shutdown().await;
    federation.shutdown().await;
    Ok(())
}
