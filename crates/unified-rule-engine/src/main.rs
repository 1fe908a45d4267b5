//! 统一规则引擎服务
//!
//! 提供规则管理、事件触发与统计的 REST 接口，并在后台运行定时规则调度。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use automation_shared::{
    config::{AppConfig, EngineConfig, StorageBackend},
    database::Database,
    observability,
};
use axum::{Json, Router, http::HeaderValue, http::StatusCode, routing::get};
use rule_engine::{
    ActionExecutor, CapabilityRegistry, ExecutionLedger, FailurePolicy, RuleCompiler, RuleStore,
    ScheduleTicker, StatsAggregator, TriggerDispatcher,
    api::{self, AppState},
    capability::{LoggingEffectSink, NoopClassifier},
    repository::{
        LedgerRepository, MemoryStore, PgLedgerRepository, PgRuleRepository, RuleRepository,
    },
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const SERVICE_NAME: &str = "rule-engine";

#[tokio::main]
async fn main() -> Result<()> {
    // 配置：config/default.toml → config/{env}.toml → config/rule-engine.toml → 环境变量
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let service_name = if config.service_name.is_empty() {
        SERVICE_NAME
    } else {
        config.service_name.as_str()
    };
    let obs_config = config.observability.clone().with_service_name(service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        storage = ?config.engine.storage,
        failure_policy = ?config.engine.failure_policy,
        "Starting {} on {}",
        service_name,
        config.server_addr()
    );

    let (rules, ledger_repo, db) = open_storage(&config).await?;
    let engine = &config.engine;

    let registry = Arc::new(CapabilityRegistry::with_defaults(
        Arc::new(LoggingEffectSink),
        Arc::new(NoopClassifier),
        Duration::from_millis(engine.webhook_timeout_ms),
    )?);

    let dispatcher = Arc::new(build_dispatcher(
        engine,
        rules.clone(),
        ledger_repo.clone(),
        registry,
    ));

    // 定时规则调度
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = ScheduleTicker::new(
        dispatcher.clone(),
        Duration::from_secs(engine.scheduler_poll_secs.max(1)),
    );
    let ticker_handle = tokio::spawn(async move { ticker.run(shutdown_rx).await });

    let state = AppState::new(
        dispatcher,
        StatsAggregator::new(rules, ledger_repo),
        chrono::Duration::hours(engine.stats_window_hours as i64),
    );

    let app = Router::new()
        .merge(api::router(
            state,
            Duration::from_secs(config.server.request_timeout_seconds),
        ))
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db = db.clone();
                move || readiness_check(db.clone())
            }),
        )
        .layer(cors_layer());

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接，等待已有请求与调度循环结束
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = ticker_handle.await {
        warn!(error = %e, "定时规则调度任务异常退出");
    }
    if let Some(db) = db {
        db.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

type Storage = (
    Arc<dyn RuleRepository>,
    Arc<dyn LedgerRepository>,
    Option<Arc<Database>>,
);

/// 按配置打开存储后端
async fn open_storage(config: &AppConfig) -> Result<Storage> {
    match config.engine.storage {
        StorageBackend::Memory => {
            warn!("使用内存存储，服务重启后规则与执行记录将丢失");
            let store = MemoryStore::new();
            Ok((Arc::new(store.clone()), Arc::new(store), None))
        }
        StorageBackend::Postgres => {
            let db = Database::connect_with_retry(&config.database).await?;

            sqlx::migrate!("./migrations").run(db.pool()).await?;
            info!("Database migrations applied");

            let pool = db.pool().clone();
            Ok((
                Arc::new(PgRuleRepository::new(pool.clone())),
                Arc::new(PgLedgerRepository::new(pool)),
                Some(Arc::new(db)),
            ))
        }
    }
}

fn build_dispatcher(
    engine: &EngineConfig,
    rules: Arc<dyn RuleRepository>,
    ledger_repo: Arc<dyn LedgerRepository>,
    registry: Arc<CapabilityRegistry>,
) -> TriggerDispatcher {
    let store = RuleStore::new(rules, RuleCompiler::with_registry(registry.clone()));
    let ledger = ExecutionLedger::new(
        ledger_repo,
        FailurePolicy::from(engine.failure_policy.clone()),
        chrono::Duration::seconds(engine.dedup_window_secs as i64),
    );
    let executor = ActionExecutor::new(registry, Duration::from_millis(engine.action_timeout_ms));

    TriggerDispatcher::new(
        store,
        Arc::new(ledger),
        executor,
        Duration::from_millis(engine.dispatch_timeout_ms),
    )
}

/// CORS 配置：通过 AUTOMATION_CORS_ORIGINS 环境变量控制允许的来源
fn cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("AUTOMATION_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    if allowed_origins == "*" {
        info!("CORS allowed_origins: * (all origins)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：Postgres 后端时检查数据库连接
async fn readiness_check(db: Option<Arc<Database>>) -> (StatusCode, Json<serde_json::Value>) {
    let Some(db) = db else {
        return (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ready", "storage": "memory"})),
        );
    };

    match db.ping().await {
        Ok(latency) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "storage": "postgres",
                "latencyMs": latency.as_millis() as u64
            })),
        ),
        Err(e) => {
            warn!(error = %e, "数据库健康检查失败");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "not_ready", "storage": "postgres"})),
            )
        }
    }
}
