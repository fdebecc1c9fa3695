//! 日志初始化
//!
//! `RUST_LOG` 优先于配置中的 log_level；支持 json / pretty 两种格式，
//! 输出到 stdout 或 stderr。

use anyhow::{Result, bail};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 日志输出目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
}

impl LogTarget {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "stdout" | "" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            other => bail!("不支持的日志输出目标: {other}"),
        }
    }
}

/// 构建环境过滤器
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化 tracing 订阅者
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let target = LogTarget::parse(&config.log_target)?;
    let json = config.log_format.eq_ignore_ascii_case("json");

    let fmt_layer = match (json, target) {
        (true, LogTarget::Stdout) => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        (true, LogTarget::Stderr) => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .boxed(),
        (false, LogTarget::Stdout) => fmt::layer().with_target(true).with_ansi(true).boxed(),
        (false, LogTarget::Stderr) => fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_target_parse() {
        assert_eq!(LogTarget::parse("stdout").unwrap(), LogTarget::Stdout);
        assert_eq!(LogTarget::parse("STDERR").unwrap(), LogTarget::Stderr);
        assert_eq!(LogTarget::parse("").unwrap(), LogTarget::Stdout);
        assert!(LogTarget::parse("syslog").is_err());
    }

    #[test]
    fn test_env_filter_falls_back_on_bad_level() {
        let config = ObservabilityConfig {
            log_level: "not a [valid filter".to_string(),
            ..Default::default()
        };
        // 非法的过滤表达式不应 panic
        let _ = env_filter(&config);
    }
}
