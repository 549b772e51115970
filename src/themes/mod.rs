pub mod archive;
pub mod classifier;
pub mod installer;
pub mod scanner;
pub mod types;

pub use installer::ThemeInstaller;
pub use scanner::ThemeScanner;
pub use types::{
   EntryFailure, EntryFailureKind, InstallProgress, InstallReport, InstallStatus,
   InstalledThemeEntry, NoProgress, ProgressSink, Subsystem, ThemeKind, ThemeMetadata,
   ThemePackage, ThemeSource,
};
