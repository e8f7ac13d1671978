use {
    anyhow::Result,
    hushsync_protocol::util::log_writer,
    std::{
        path::{Path, PathBuf},
        sync::Mutex,
    },
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

pub const CONFIG_FILE_NAME: &str = "hushsync-server.json5";

#[cfg(target_os = "linux")]
#[inline]
pub fn default_config_dir() -> Result<PathBuf> {
    Ok("/etc".into())
}

// Windows: %APPDATA% (%USERPROFILE%\AppData\Roaming);
// macOS: $HOME/Library/Application Support
#[cfg(not(target_os = "linux"))]
#[inline]
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir().ok_or_else(|| anyhow::format_err!("failed to get config dir"))
}

#[inline]
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Installs the global subscriber writing to `log_file`, or to stdout if it's not set.
#[inline]
pub fn setup_logger(log_file: Option<&Path>, log_filter: &str) -> Result<()> {
    let fmt_layer = fmt::layer().with_writer(Mutex::new(log_writer(log_file)?));
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_new(log_filter)?)
        .try_init()?;
    Ok(())
}
