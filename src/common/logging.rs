use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Install the env_logger backend once per process. Safe to call from every
/// test; later calls are no-ops.
pub fn init() {
    INIT.get_or_init(|| {
        let _ = env_logger::Builder::from_default_env()
            .format_timestamp_millis()
            .try_init();
    });
}
