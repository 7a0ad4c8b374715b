use tracing_subscriber::EnvFilter;

/// 安装全局 tracing subscriber，`RUST_LOG` 优先于配置的级别。
/// 重复调用不会报错。
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
