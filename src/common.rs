use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wordcard_core::{config::AppConfig, config::ObservabilityConfig, models::CommandKind};

use crate::app::{AppMode, Application};
use crate::handlers::{CommandHandlers, DeckStore};
use crate::shutdown::ShutdownManager;

/// 命令行给出的启动参数
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub mode: AppMode,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub kind: Option<CommandKind>,
    pub limit: usize,
    pub expiration: Option<Duration>,
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 按配置启动 Prometheus 指标导出
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let address: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("启动Prometheus指标导出失败")?;

    info!("Prometheus指标导出监听 {}", address);
    Ok(())
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref())?;

    if let Some(ref level) = startup_config.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(ref format) = startup_config.log_format {
        config.observability.log_format = format.clone();
    }
    config.validate()?;

    Ok(config)
}

/// 启动应用程序
pub async fn start_application(startup_config: StartupConfig) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    init_metrics(&config.observability)?;

    info!("启动单词卡片命令处理管道");
    if let Some(ref path) = startup_config.config_path {
        info!("配置文件: {path}");
    }
    info!("运行模式: {:?}", startup_config.mode);

    let store = DeckStore::new();
    let app = Application::new(
        config,
        startup_config.mode,
        CommandHandlers::in_memory(store),
    )
    .await?;

    if startup_config.mode == AppMode::Replay {
        let replayed = app
            .replay(
                startup_config.kind,
                startup_config.limit,
                startup_config.expiration,
            )
            .await?;
        info!("重放完成，共 {} 条消息", replayed);
        return Ok(());
    }

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        result = &mut app_handle => {
            // 拓扑冲突等启动错误会让应用提前结束
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常结束: {e}")),
            };
        }
    }

    shutdown_manager.shutdown().await;
    if shutdown_manager.drain(app_handle).await {
        info!("应用已优雅关闭");
    } else {
        error!("应用关闭超时，强制退出");
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
