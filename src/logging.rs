use env_logger::Env;
use std::sync::OnceLock;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Installs the process logger once. Filter comes from `RUST_LOG`, default `info`.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        if let Err(e) = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .try_init()
        {
            eprintln!("failed to initialize logging: {}", e);
        }
    });
}
