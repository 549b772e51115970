use log::LevelFilter;

/// Install the global logger. `RUST_LOG` overrides `level` when set.
pub fn init(level: LevelFilter) {
   let env = env_logger::Env::default().default_filter_or(level.as_str().to_ascii_lowercase());
   let _ = env_logger::Builder::from_env(env)
      .format_timestamp_millis()
      .format_target(false)
      .try_init();
}
