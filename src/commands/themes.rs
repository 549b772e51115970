use crate::{
   config::Config,
   downloader::Downloader,
   error::{ThemeError, ThemeResult},
   protocol::{self, DestinationResolver},
   system::{
      ApplyReport, BootloaderPatcher, ElevatedRunner, GsettingsStore, PreferenceStore,
      PrivilegedRunner, SettingsApplier, run_blocking, settings,
   },
   themes::{
      InstallReport, InstallStatus, InstalledThemeEntry, ProgressSink, Subsystem, ThemeInstaller,
      ThemeKind, ThemeScanner, ThemeSource, types::report,
   },
};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path, sync::Arc};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "target", rename_all = "lowercase")]
pub enum ApplyOutcome {
   Settings { subsystem: Subsystem, name: String },
   Bootloader(ApplyReport),
}

/// Installed themes of one kind plus the one currently in use.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledListing {
   pub kind: ThemeKind,
   pub active: Option<String>,
   pub entries: Vec<InstalledThemeEntry>,
}

/// Public operations consumed by a front end.
pub struct ThemeLoader {
   downloader: Downloader,
   installer: ThemeInstaller,
   scanner: ThemeScanner,
   settings: SettingsApplier,
   bootloader: Arc<BootloaderPatcher>,
}

impl ThemeLoader {
   /// Wire the real backends: `gsettings` and the configured elevation helper.
   pub fn new(config: &Config) -> ThemeResult<Self> {
      Self::with_backends(
         config,
         Arc::new(GsettingsStore),
         Arc::new(ElevatedRunner::from_config(&config.privileged)),
      )
   }

   pub fn with_backends(
      config: &Config,
      store: Arc<dyn PreferenceStore>,
      runner: Arc<dyn PrivilegedRunner>,
   ) -> ThemeResult<Self> {
      let work_dir = config.paths.work_dir.clone();
      let settings = SettingsApplier::new(store);
      let bootloader = Arc::new(BootloaderPatcher::from_config(runner.clone(), config));
      let installer = ThemeInstaller::new(
         DestinationResolver::from_config(config)?,
         settings.clone(),
         bootloader.clone(),
         runner,
         work_dir.clone(),
      );

      Ok(Self {
         downloader: Downloader::from_config(&config.download, work_dir)?,
         installer,
         scanner: ThemeScanner::from_config(config)?,
         settings,
         bootloader,
      })
   }

   pub fn bootloader(&self) -> &BootloaderPatcher {
      &self.bootloader
   }

   pub async fn install_from_archive(
      &self,
      archive_path: &Path,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      let subject = archive_path.display().to_string();
      let result = self.installer.install_from_archive(archive_path, sink).await;
      self.finish(&subject, result, sink)
   }

   /// Parse an install-protocol link, download its target and install it.
   ///
   /// Visual theme types go through the archive installer. Bootloader links only
   /// stage the theme; activating it needs a separate [`ThemeLoader::apply_theme`].
   /// Other types are placed into their destination directory.
   pub async fn install_from_protocol_url(
      &self,
      link: &str,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      let result = self.install_from_protocol_url_inner(link, sink).await;
      self.finish(link, result, sink)
   }

   async fn install_from_protocol_url_inner(
      &self,
      link: &str,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      report(sink, link, InstallStatus::Parsing, 0.0, "Reading install link...");
      let request = protocol::parse(link)?;
      if !request.is_install() {
         return Err(ThemeError::UnsupportedCommand(request.command));
      }
      log::info!(
         "Install request for {} as '{}' ({})",
         request.download_url,
         request.requested_type,
         request.install_type
      );

      report(
         sink,
         link,
         InstallStatus::Downloading,
         0.05,
         format!("Downloading {}", request.download_url),
      );
      let download = self
         .downloader
         .fetch(&request.download_url, request.filename.as_deref())
         .await?;
      log::info!(
         "Downloaded {} to {:?} after {} attempt(s)",
         request.download_url,
         download.path(),
         download.attempts
      );

      match ThemeKind::from_install_type(request.install_type) {
         Some(ThemeKind::Bootloader) => {
            self
               .installer
               .stage_bootloader_archive(download.path(), sink)
               .await
         }
         Some(_) => self.installer.install_from_archive(download.path(), sink).await,
         None => {
            self
               .installer
               .place_download(download.path(), request.install_type, sink)
               .await
         }
      }
   }

   /// Re-scan every kind the install touched and attach the result to the report.
   fn finish(
      &self,
      subject: &str,
      mut result: ThemeResult<InstallReport>,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      match &mut result {
         Ok(install) => {
            let mut kinds: Vec<ThemeKind> = install.installed.iter().map(|e| e.kind).collect();
            kinds.sort();
            kinds.dedup();
            for kind in kinds {
               report(
                  sink,
                  subject,
                  InstallStatus::Scanning,
                  1.0,
                  format!("Refreshing {} inventory", kind),
               );
               let entries = self.scanner.scan(kind);
               log::debug!("{} {} theme(s) now installed", entries.len(), kind);
               install.inventory.insert(kind, entries);
            }
         }
         Err(e) => {
            log::error!("Install of {} failed: {}", subject, e);
            report(
               sink,
               subject,
               InstallStatus::Failed {
                  error: e.to_string(),
               },
               1.0,
               e.remediation().unwrap_or("Installation failed"),
            );
         }
      }
      result
   }

   /// Activate an installed theme. Bootloader themes must already be staged.
   pub async fn apply_theme(&self, kind: ThemeKind, name: &str) -> ThemeResult<ApplyOutcome> {
      let Some(subsystem) = kind.subsystem() else {
         return Ok(ApplyOutcome::Bootloader(self.bootloader.apply(name).await?));
      };

      if self.scanner.find(kind, name).is_none() {
         return Err(ThemeError::ThemeNotFound(name.to_string()));
      }
      let settings = self.settings.clone();
      let value = name.to_string();
      if !run_blocking(move || Ok(settings.apply(subsystem, &value))).await? {
         return Err(ThemeError::SettingsApplyFailed {
            subsystem: subsystem.to_string(),
            name: name.to_string(),
         });
      }
      Ok(ApplyOutcome::Settings {
         subsystem,
         name: name.to_string(),
      })
   }

   pub fn scan_installed(&self, kind: ThemeKind) -> Vec<InstalledThemeEntry> {
      self.scanner.scan(kind)
   }

   pub fn scan_all(&self) -> BTreeMap<ThemeKind, Vec<InstalledThemeEntry>> {
      self.scanner.scan_all()
   }

   pub fn list_installed(&self, kind: ThemeKind) -> InstalledListing {
      let active = match kind.subsystem() {
         Some(subsystem) => self.settings.current(subsystem),
         None => self.bootloader.active_theme(),
      };
      InstalledListing {
         kind,
         active: active.filter(|name| !name.is_empty()),
         entries: self.scanner.scan(kind),
      }
   }

   /// Remove an installed theme. System-wide visual themes are refused.
   pub async fn remove_theme(&self, kind: ThemeKind, name: &str) -> ThemeResult<()> {
      if kind == ThemeKind::Bootloader {
         return self.bootloader.remove(name).await;
      }
      match self.scanner.find(kind, name) {
         Some(entry) if entry.source == ThemeSource::System => {
            Err(ThemeError::SystemThemeReadOnly {
               name: name.to_string(),
               path: entry.path,
            })
         }
         _ => self.installer.remove_theme(kind, name).map(|_| ()),
      }
   }

   pub fn apply_combo(&self, themes: &[(Subsystem, String)]) -> BTreeMap<Subsystem, bool> {
      self.settings.apply_combo(themes)
   }

   pub fn reset_to_defaults(&self) -> BTreeMap<Subsystem, bool> {
      self.settings.reset_to_defaults()
   }

   /// Rebuild the icon cache of an installed icon or cursor theme.
   pub fn refresh_icon_cache(&self, kind: ThemeKind, name: &str) -> ThemeResult<bool> {
      let entry = self
         .scanner
         .find(kind, name)
         .ok_or_else(|| ThemeError::ThemeNotFound(name.to_string()))?;
      Ok(settings::refresh_icon_cache(&entry.path))
   }

   pub fn build_protocol_url(download_url: &str, install_type: &str, filename: Option<&str>) -> String {
      protocol::build_with_type(download_url, install_type, filename)
   }
}
