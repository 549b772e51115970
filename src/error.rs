use serde::Serialize;
use std::{fmt, path::PathBuf};
use thiserror::Error;

pub type ThemeResult<T> = Result<T, ThemeError>;

/// Sub-step of a bootloader operation, reported so a human can resume by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootloaderStep {
   CreateThemesDir,
   Copy,
   Read,
   Write,
   Regenerate,
   Remove,
}

impl fmt::Display for BootloaderStep {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         Self::CreateThemesDir => "create themes directory",
         Self::Copy => "copy",
         Self::Read => "read",
         Self::Write => "write",
         Self::Regenerate => "regenerate",
         Self::Remove => "remove",
      };
      f.write_str(name)
   }
}

#[derive(Debug, Error)]
pub enum ThemeError {
   #[error("unrecognized install-protocol scheme in '{0}'")]
   InvalidProtocolScheme(String),

   #[error("install-protocol URL has no download URL")]
   MissingDownloadUrl,

   #[error("download URL '{0}' is not an absolute http(s) URL")]
   InvalidDownloadUrl(String),

   #[error("unsupported install-protocol command '{0}'")]
   UnsupportedCommand(String),

   #[error("unsupported archive format: {}", .0.display())]
   UnsupportedArchiveFormat(PathBuf),

   #[error("no recognizable theme found in {}", .0.display())]
   UnrecognizedThemeContent(PathBuf),

   #[error("download of {url} failed after {attempts} attempts: {last_error}")]
   DownloadExhausted {
      url: String,
      attempts: u32,
      last_error: String,
   },

   #[error("download of {url} rejected with HTTP {status}")]
   DownloadRejected { url: String, status: u16 },

   #[error("bootloader theme '{0}' already exists")]
   ThemeAlreadyExists(String),

   #[error("bootloader theme '{0}' is not staged or has no theme.txt")]
   ThemeNotStaged(String),

   #[error("theme '{0}' not found")]
   ThemeNotFound(String),

   #[error("theme '{name}' is installed system-wide at {}", .path.display())]
   SystemThemeReadOnly { name: String, path: PathBuf },

   #[error("invalid theme name '{name}': {reason}")]
   InvalidThemeName { name: String, reason: String },

   #[error("{} does not contain a bootloader theme descriptor", .0.display())]
   InvalidBootloaderTheme(PathBuf),

   #[error("privileged {step} command `{command}` was refused or is unavailable: {output}")]
   PrivilegeDenied {
      step: BootloaderStep,
      command: String,
      output: String,
   },

   #[error("placing into system directory failed, `{command}`: {output}")]
   SystemPlacementFailed {
      command: String,
      output: String,
      hint: String,
   },

   #[error(
      "configuration {} was patched but no regeneration tool was found",
      .config_path.display()
   )]
   NoRegenerationToolFound {
      config_path: PathBuf,
      config_patched: bool,
      hint: String,
   },

   #[error("bootloader {step} step failed: {output}")]
   BootloaderStep {
      step: BootloaderStep,
      output: String,
      hint: String,
   },

   #[error("could not apply {subsystem} theme '{name}'")]
   SettingsApplyFailed { subsystem: String, name: String },

   #[error("archive error: {0}")]
   Archive(String),

   #[error("configuration error: {0}")]
   Config(String),

   #[error(transparent)]
   Io(#[from] std::io::Error),
}

impl ThemeError {
   /// Manual follow-up for the user, when one exists.
   pub fn remediation(&self) -> Option<&str> {
      match self {
         Self::NoRegenerationToolFound { hint, .. }
         | Self::BootloaderStep { hint, .. }
         | Self::SystemPlacementFailed { hint, .. } => Some(hint.as_str()),
         Self::PrivilegeDenied { .. } => Some(
            "install a polkit authentication agent (e.g. policykit-1-gnome) or run the command with sudo",
         ),
         Self::SystemThemeReadOnly { .. } => {
            Some("system-wide themes belong to the distribution package manager")
         }
         _ => None,
      }
   }

   /// Network failures that a later retry might cure.
   pub fn is_network(&self) -> bool {
      matches!(
         self,
         Self::DownloadExhausted { .. } | Self::DownloadRejected { .. }
      )
   }
}

impl From<zip::result::ZipError> for ThemeError {
   fn from(e: zip::result::ZipError) -> Self {
      Self::Archive(e.to_string())
   }
}

impl From<walkdir::Error> for ThemeError {
   fn from(e: walkdir::Error) -> Self {
      Self::Io(e.into())
   }
}
