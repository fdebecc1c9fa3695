//! WeCarry API 服务
//!
//! 装配存储、通知渠道、模板、后台 Worker、核心服务和身份提供方后对外提供 HTTP API。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wecarry_auth::{AzureAdV2Provider, Providers};
use wecarry_core::api::{self, AppState};
use wecarry_core::notification::{TemplateRegistry, build_senders};
use wecarry_core::repository::MemoryStore;
use wecarry_core::worker::{JobQueue, SenderIdentity};
use wecarry_core::{Core, Repositories, build_worker};
use wecarry_shared::config::{AppConfig, StorageBackend};
use wecarry_shared::database::Database;
use wecarry_shared::observability;
use wecarry_shared::reporting::build_reporter;

const SERVICE_NAME: &str = "wecarry-api";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.observability, &config.service_name).await?;

    info!(
        addr = %config.server_addr(),
        environment = %config.environment,
        commit = %config.commit,
        "Starting wecarry-api"
    );

    let (repos, database) = match config.database.storage {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.health_check().await?;
            sqlx::migrate!("./migrations").run(db.pool()).await?;
            info!("数据库迁移完成");
            (Repositories::postgres(db.pool().clone()), Some(db))
        }
        StorageBackend::Memory => {
            warn!("使用进程内存储，重启后数据丢失");
            (Repositories::memory(Arc::new(MemoryStore::default())), None)
        }
    };

    let reporter = build_reporter(&config.rollbar, &config.commit)?;

    // 模板在启动时校验，缺失或覆盖键未知时直接退出
    let mut templates = TemplateRegistry::with_defaults(config.notification.default_locale.as_str())?;
    templates.apply_overrides(&config.notification.template_overrides)?;
    let templates = Arc::new(templates);

    let senders = build_senders(&config.email, &config.mobile)?;
    let identity = SenderIdentity {
        email_from: config.email.from_address.clone(),
        mobile_from: config.mobile.from.clone(),
    };
    let worker = Arc::new(build_worker(
        &repos,
        senders,
        identity,
        &config.worker,
        reporter.clone(),
    ));
    info!(jobs = ?worker.registered(), pool_size = config.worker.pool_size, "后台 Worker 已启动");

    let queue: Arc<dyn JobQueue> = worker.clone();
    let core = Arc::new(Core::new(
        repos,
        templates,
        queue,
        reporter,
        &config.notification.ui_url,
    )?);

    let mut providers = Providers::new();
    if let Some(azure) = config.auth.azure_ad_v2.as_deref() {
        providers.register(Arc::new(AzureAdV2Provider::from_json(
            azure,
            config.auth.callback_url.clone(),
        )?));
    }
    info!(providers = ?providers.names(), "身份提供方已加载");

    let state = AppState::new(core, providers, &config.notification.default_locale);
    let app = api::router(state);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            api::server::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    api::server::serve(&config.server, &config.server_addr(), app, shutdown).await?;

    worker.shutdown().await;
    if let Some(db) = database {
        db.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}
