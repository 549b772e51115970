use crate::error::{ThemeError, ThemeResult};
use serde::{Deserialize, Serialize};
use std::{
   fs,
   path::{Path, PathBuf},
   time::Duration,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub paths: PathsConfig,
   pub download: DownloadConfig,
   pub privileged: PrivilegedConfig,
   pub bootloader: BootloaderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
   /// Overrides the user's home directory for every user-scoped destination.
   pub home: Option<PathBuf>,
   /// Root for temporary extraction and download directories.
   pub work_dir: Option<PathBuf>,
   pub bootloader_themes_dir: PathBuf,
   pub bootloader_config: PathBuf,
   pub plymouth_themes_dir: PathBuf,
   pub system_themes_dirs: Vec<PathBuf>,
   pub system_icons_dirs: Vec<PathBuf>,
}

impl Default for PathsConfig {
   fn default() -> Self {
      Self {
         home: None,
         work_dir: None,
         bootloader_themes_dir: PathBuf::from("/boot/grub/themes"),
         bootloader_config: PathBuf::from("/etc/default/grub"),
         plymouth_themes_dir: PathBuf::from("/usr/share/plymouth/themes"),
         system_themes_dirs: vec![PathBuf::from("/usr/share/themes")],
         system_icons_dirs: vec![PathBuf::from("/usr/share/icons")],
      }
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
   pub max_attempts: u32,
   pub base_delay_ms: u64,
   pub jitter_ms: u64,
   pub rate_limit_cooldown_secs: u64,
   pub request_timeout_secs: u64,
   pub user_agent: String,
}

impl Default for DownloadConfig {
   fn default() -> Self {
      Self {
         max_attempts: 3,
         base_delay_ms: 2000,
         jitter_ms: 1000,
         rate_limit_cooldown_secs: 30,
         request_timeout_secs: 15,
         user_agent: format!("theme-loader/{}", env!("CARGO_PKG_VERSION")),
      }
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegedConfig {
   /// Elevation helper prepended to every privileged argv. Empty runs commands directly.
   pub elevator: String,
   pub timeout_secs: Option<u64>,
}

impl Default for PrivilegedConfig {
   fn default() -> Self {
      Self {
         elevator: "pkexec".to_string(),
         timeout_secs: None,
      }
   }
}

impl PrivilegedConfig {
   pub fn timeout(&self) -> Option<Duration> {
      self.timeout_secs.map(Duration::from_secs)
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootloaderConfig {
   /// Tried in order; the first whose program exists is used.
   pub regeneration_commands: Vec<Vec<String>>,
}

impl Default for BootloaderConfig {
   fn default() -> Self {
      let argv = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();
      Self {
         regeneration_commands: vec![
            argv(&["/usr/sbin/update-grub"]),
            argv(&["/sbin/update-grub"]),
            argv(&["update-grub"]),
            argv(&["grub-mkconfig", "-o", "/boot/grub/grub.cfg"]),
            argv(&["grub2-mkconfig", "-o", "/boot/grub2/grub.cfg"]),
         ],
      }
   }
}

impl Config {
   pub fn default_path() -> Option<PathBuf> {
      dirs::config_dir().map(|dir| dir.join("theme-loader").join("config.toml"))
   }

   /// Load the configuration at `path`; a missing file yields the defaults.
   pub fn load(path: &Path) -> ThemeResult<Self> {
      if !path.exists() {
         log::debug!("No configuration at {:?}, using defaults", path);
         return Ok(Self::default());
      }

      let raw = fs::read_to_string(path)?;
      let config: Config = toml::from_str(&raw)
         .map_err(|e| ThemeError::Config(format!("{}: {}", path.display(), e)))?;
      config.validate()?;

      log::info!("Loaded configuration from {:?}", path);
      Ok(config)
   }

   pub fn load_default() -> ThemeResult<Self> {
      match Self::default_path() {
         Some(path) => Self::load(&path),
         None => Ok(Self::default()),
      }
   }

   fn validate(&self) -> ThemeResult<()> {
      if self.download.max_attempts == 0 {
         return Err(ThemeError::Config(
            "download.max_attempts must be at least 1".into(),
         ));
      }
      if self.bootloader.regeneration_commands.iter().any(|argv| argv.is_empty()) {
         return Err(ThemeError::Config(
            "bootloader.regeneration_commands contains an empty command".into(),
         ));
      }
      Ok(())
   }

   /// Resolved home directory: the configured override, else the real one.
   pub fn home_dir(&self) -> ThemeResult<PathBuf> {
      self
         .paths
         .home
         .clone()
         .or_else(dirs::home_dir)
         .ok_or_else(|| ThemeError::Config("could not determine the home directory".into()))
   }
}
