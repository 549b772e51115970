use crate::protocol::InstallType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf};

/// Visual theme categories the classifier can recognise, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeKind {
   Style,
   Shell,
   Icons,
   Cursors,
   Bootloader,
}

impl ThemeKind {
   pub const PRECEDENCE: [ThemeKind; 5] = [
      ThemeKind::Style,
      ThemeKind::Shell,
      ThemeKind::Icons,
      ThemeKind::Cursors,
      ThemeKind::Bootloader,
   ];

   pub fn install_type(self) -> InstallType {
      match self {
         Self::Style => InstallType::Style,
         Self::Shell => InstallType::Shell,
         Self::Icons => InstallType::Icons,
         Self::Cursors => InstallType::Cursors,
         Self::Bootloader => InstallType::Bootloader,
      }
   }

   pub fn from_install_type(install_type: InstallType) -> Option<Self> {
      match install_type {
         InstallType::Style => Some(Self::Style),
         InstallType::Shell => Some(Self::Shell),
         InstallType::Icons => Some(Self::Icons),
         InstallType::Cursors => Some(Self::Cursors),
         InstallType::Bootloader => Some(Self::Bootloader),
         _ => None,
      }
   }

   /// Live desktop setting affected by this kind, if any.
   pub fn subsystem(self) -> Option<Subsystem> {
      match self {
         Self::Style => Some(Subsystem::Style),
         Self::Shell => Some(Subsystem::Shell),
         Self::Icons => Some(Subsystem::Icons),
         Self::Cursors => Some(Subsystem::Cursors),
         Self::Bootloader => None,
      }
   }

   pub fn as_str(self) -> &'static str {
      match self {
         Self::Style => "style",
         Self::Shell => "shell",
         Self::Icons => "icons",
         Self::Cursors => "cursors",
         Self::Bootloader => "bootloader",
      }
   }

   pub fn parse(name: &str) -> Option<Self> {
      Self::from_install_type(InstallType::resolve(name))
   }
}

impl fmt::Display for ThemeKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
   Style,
   Shell,
   Icons,
   Cursors,
}

impl Subsystem {
   pub const ALL: [Subsystem; 4] = [
      Subsystem::Style,
      Subsystem::Shell,
      Subsystem::Icons,
      Subsystem::Cursors,
   ];

   pub fn kind(self) -> ThemeKind {
      match self {
         Self::Style => ThemeKind::Style,
         Self::Shell => ThemeKind::Shell,
         Self::Icons => ThemeKind::Icons,
         Self::Cursors => ThemeKind::Cursors,
      }
   }
}

impl fmt::Display for Subsystem {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.kind().as_str())
   }
}

/// A marker-bearing directory found inside an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemePackage {
   pub name: String,
   pub kind: ThemeKind,
   pub root_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeSource {
   User,
   System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThemeMetadata {
   Style { engine_versions: Vec<String> },
   Shell { has_dark_variant: bool },
   Icons { directories: Vec<String> },
   Cursors { cursor_count: usize },
   Bootloader { title: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledThemeEntry {
   pub name: String,
   pub kind: ThemeKind,
   pub path: PathBuf,
   pub source: ThemeSource,
   pub size_bytes: u64,
   pub file_count: usize,
   pub modified: Option<DateTime<Utc>>,
   pub metadata: ThemeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallProgress {
   pub subject: String,
   pub status: InstallStatus,
   pub progress: f32, // 0.0 to 1.0
   pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstallStatus {
   Parsing,
   Downloading,
   Extracting,
   Classifying,
   Installing,
   Applying,
   Staging,
   Scanning,
   Completed,
   Failed { error: String },
}

/// Receives progress events from long-running operations.
pub trait ProgressSink: Send + Sync {
   fn emit(&self, event: InstallProgress);
}

impl<F> ProgressSink for F
where
   F: Fn(InstallProgress) + Send + Sync,
{
   fn emit(&self, event: InstallProgress) {
      self(event)
   }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
   fn emit(&self, _event: InstallProgress) {}
}

pub(crate) fn report(
   sink: &dyn ProgressSink,
   subject: &str,
   status: InstallStatus,
   progress: f32,
   message: impl Into<String>,
) {
   sink.emit(InstallProgress {
      subject: subject.to_string(),
      status,
      progress,
      message: message.into(),
   });
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryFailureKind {
   Placement,
   SettingsApply,
   Staging,
}

/// Non-fatal failure attached to one installed entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
   pub name: String,
   pub kind: ThemeKind,
   pub failure: EntryFailureKind,
   pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
   pub installed: Vec<InstalledThemeEntry>,
   /// Names applied to live settings, in install order.
   pub applied: Vec<String>,
   /// Bootloader themes copied into place but not activated.
   pub staged: Vec<String>,
   /// Files or directories placed for non-theme install types.
   pub placed: Vec<PathBuf>,
   pub failures: Vec<EntryFailure>,
   /// Inventory of every kind touched by the install, re-scanned afterwards.
   pub inventory: BTreeMap<ThemeKind, Vec<InstalledThemeEntry>>,
}

impl InstallReport {
   pub fn is_clean(&self) -> bool {
      self.failures.is_empty()
   }
}
