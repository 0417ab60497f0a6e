//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式)
//! - Prometheus 指标导出
//! - Sender 指标快照导出与区间吞吐统计
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{init, metrics};
//!
//! // 初始化
//! observability::init()?;
//!
//! // 周期性导出 sender 指标
//! metrics::record_sender_metrics(sender.name(), &sender.metrics());
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::metrics::{record_sender_metrics, IntervalSummary, ThroughputTracker};

/// 初始化可观测性（Tracing + Prometheus）
///
/// - Tracing: JSON 格式，支持 RUST_LOG 环境变量
/// - Prometheus: 默认关闭
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// 默认日志级别 (RUST_LOG 未设置时生效)
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(anyhow::anyhow!("unknown log format '{}'", other)),
        }
    }
}

/// 使用自定义配置初始化
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    // 1. Tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));

    // sender 的 ack 线程按 "<sender>-<stream>-ack" 命名，JSON 输出带线程名
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    // 2. Prometheus Exporter (可选)
    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );

    Ok(())
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}
