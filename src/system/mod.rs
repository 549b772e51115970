pub mod bootloader;
pub mod locks;
pub mod privileged;
pub mod settings;

pub use bootloader::{ApplyReport, BootloaderPatcher};
pub use privileged::{ElevatedRunner, PrivilegedOutput, PrivilegedRunner, PrivilegedStatus};
pub use settings::{GsettingsStore, PreferenceKey, PreferenceStore, SettingsApplier};

use crate::error::{ThemeError, ThemeResult};

/// Run filesystem or subprocess work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> ThemeResult<T>
where
   F: FnOnce() -> ThemeResult<T> + Send + 'static,
   T: Send + 'static,
{
   tokio::task::spawn_blocking(work)
      .await
      .map_err(|e| ThemeError::Io(std::io::Error::other(e)))?
}
