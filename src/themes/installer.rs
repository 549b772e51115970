//! Placement engine: extract, classify, move into place, then apply.
//!
//! When an entry with the same name already exists at the destination it is
//! deleted and replaced (last install wins). Two concurrent installs of the
//! same name race on that delete-then-move; no lock is taken for user-scoped
//! destinations.

use super::{
   archive::{self, ArchiveFormat},
   classifier::{self, matches_kind},
   scanner::describe,
   types::{
      EntryFailure, EntryFailureKind, InstallReport, InstallStatus, InstalledThemeEntry,
      ProgressSink, Subsystem, ThemeKind, ThemePackage, ThemeSource, report,
   },
};
use crate::{
   error::{BootloaderStep, ThemeError, ThemeResult},
   protocol::{DestinationResolver, InstallType, Scope},
   system::{
      BootloaderPatcher, PrivilegedRunner, PrivilegedStatus, SettingsApplier, locks,
      privileged::{argv, manual_command},
      run_blocking,
   },
};
use std::{
   ffi::{OsStr, OsString},
   fs, io,
   path::{Path, PathBuf},
   sync::Arc,
};
use tempfile::TempDir;
use walkdir::WalkDir;

const EXTENSION_METADATA: &str = "metadata.json";

pub struct ThemeInstaller {
   resolver: DestinationResolver,
   settings: SettingsApplier,
   bootloader: Arc<BootloaderPatcher>,
   runner: Arc<dyn PrivilegedRunner>,
   work_dir: Option<PathBuf>,
}

impl ThemeInstaller {
   pub fn new(
      resolver: DestinationResolver,
      settings: SettingsApplier,
      bootloader: Arc<BootloaderPatcher>,
      runner: Arc<dyn PrivilegedRunner>,
      work_dir: Option<PathBuf>,
   ) -> Self {
      Self {
         resolver,
         settings,
         bootloader,
         runner,
         work_dir,
      }
   }

   fn temp_dir(&self) -> ThemeResult<TempDir> {
      let mut builder = tempfile::Builder::new();
      builder.prefix("theme-loader-extract-");
      let dir = match &self.work_dir {
         Some(work_dir) => {
            fs::create_dir_all(work_dir)?;
            builder.tempdir_in(work_dir)?
         }
         None => builder.tempdir()?,
      };
      Ok(dir)
   }

   /// Extract into a fresh temporary directory. The directory is removed when the
   /// returned handle drops, whichever way the caller exits.
   async fn extract_to_temp(
      &self,
      archive_path: &Path,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<(TempDir, ArchiveFormat)> {
      let subject = archive_path.display().to_string();
      let format = ArchiveFormat::detect(archive_path)
         .ok_or_else(|| ThemeError::UnsupportedArchiveFormat(archive_path.to_path_buf()))?;

      report(sink, &subject, InstallStatus::Extracting, 0.1, "Extracting files...");
      let temp = self.temp_dir()?;
      let (source, target) = (archive_path.to_path_buf(), temp.path().to_path_buf());
      run_blocking(move || archive::extract(&source, &target)).await?;
      Ok((temp, format))
   }

   async fn classify_extracted(
      &self,
      archive_path: &Path,
      root: &Path,
      format: ArchiveFormat,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<Vec<ThemePackage>> {
      let subject = archive_path.display().to_string();
      report(sink, &subject, InstallStatus::Classifying, 0.3, "Detecting theme types...");

      let stem = format.stem(archive_path);
      let root = root.to_path_buf();
      let packages = run_blocking(move || classifier::classify(&root, stem.as_deref())).await?;

      if packages.is_empty() {
         log::warn!("No theme markers found in {:?}", archive_path);
         return Err(ThemeError::UnrecognizedThemeContent(archive_path.to_path_buf()));
      }
      log::info!("Found {} theme(s) in {:?}", packages.len(), archive_path);
      Ok(packages)
   }

   /// Install every theme found in a local archive.
   ///
   /// Visual themes are placed under their user destination and applied in
   /// classification order. A failed placement or apply is recorded on the report
   /// and never stops the other entries. Bootloader themes are staged but not activated.
   pub async fn install_from_archive(
      &self,
      archive_path: &Path,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      log::info!("Installing themes from {:?}", archive_path);
      let subject = archive_path.display().to_string();

      let (temp, format) = self.extract_to_temp(archive_path, sink).await?;
      let packages = self
         .classify_extracted(archive_path, temp.path(), format, sink)
         .await?;

      for package in packages.iter().filter(|p| p.kind != ThemeKind::Bootloader) {
         validate_entry_name(&package.name)?;
      }

      let mut result = InstallReport::default();
      let total = packages.len() as f32;
      for (index, package) in packages.iter().enumerate() {
         let progress = 0.4 + 0.6 * (index as f32 / total);
         if package.kind == ThemeKind::Bootloader {
            self.stage_entry(package, &subject, progress, sink, &mut result).await;
            continue;
         }

         report(
            sink,
            &subject,
            InstallStatus::Installing,
            progress,
            format!("Installing {} theme '{}'", package.kind, package.name),
         );
         match self.place_package(package).await {
            Ok(entry) => result.installed.push(entry),
            Err(e) => {
               log::error!("Failed to place {} theme '{}': {}", package.kind, package.name, e);
               result.failures.push(EntryFailure {
                  name: package.name.clone(),
                  kind: package.kind,
                  failure: EntryFailureKind::Placement,
                  message: e.to_string(),
               });
               continue;
            }
         }

         if let Some(subsystem) = package.kind.subsystem() {
            report(
               sink,
               &subject,
               InstallStatus::Applying,
               progress,
               format!("Applying {} theme '{}'", subsystem, package.name),
            );
            if self.apply_setting(subsystem, &package.name).await {
               result.applied.push(package.name.clone());
            } else {
               result.failures.push(EntryFailure {
                  name: package.name.clone(),
                  kind: package.kind,
                  failure: EntryFailureKind::SettingsApply,
                  message: ThemeError::SettingsApplyFailed {
                     subsystem: subsystem.to_string(),
                     name: package.name.clone(),
                  }
                  .to_string(),
               });
            }
         }
      }

      report(sink, &subject, InstallStatus::Completed, 1.0, "Installation completed!");
      log::info!(
         "Installed {} theme(s) from {:?} ({} failure(s))",
         result.installed.len(),
         archive_path,
         result.failures.len()
      );
      Ok(result)
   }

   async fn apply_setting(&self, subsystem: Subsystem, name: &str) -> bool {
      let settings = self.settings.clone();
      let name = name.to_string();
      run_blocking(move || Ok(settings.apply(subsystem, &name)))
         .await
         .unwrap_or(false)
   }

   async fn stage_entry(
      &self,
      package: &ThemePackage,
      subject: &str,
      progress: f32,
      sink: &dyn ProgressSink,
      result: &mut InstallReport,
   ) {
      report(
         sink,
         subject,
         InstallStatus::Staging,
         progress,
         format!("Staging bootloader theme '{}'", package.name),
      );
      match self.bootloader.stage(&package.name, &package.root_path).await {
         Ok(path) => {
            result.staged.push(package.name.clone());
            result
               .installed
               .push(describe(&path, ThemeKind::Bootloader, ThemeSource::System));
         }
         Err(e) => {
            log::error!("Failed to stage bootloader theme '{}': {}", package.name, e);
            result.failures.push(EntryFailure {
               name: package.name.clone(),
               kind: ThemeKind::Bootloader,
               failure: EntryFailureKind::Staging,
               message: e.to_string(),
            });
         }
      }
   }

   /// Stage the bootloader themes of an archive without activating any of them.
   /// Any staging failure aborts the operation.
   pub async fn stage_bootloader_archive(
      &self,
      archive_path: &Path,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      log::info!("Staging bootloader themes from {:?}", archive_path);
      let subject = archive_path.display().to_string();

      let (temp, format) = self.extract_to_temp(archive_path, sink).await?;
      let packages: Vec<ThemePackage> = self
         .classify_extracted(archive_path, temp.path(), format, sink)
         .await?
         .into_iter()
         .filter(|p| {
            p.kind == ThemeKind::Bootloader || matches_kind(&p.root_path, ThemeKind::Bootloader)
         })
         .collect();
      if packages.is_empty() {
         return Err(ThemeError::UnrecognizedThemeContent(archive_path.to_path_buf()));
      }

      let mut result = InstallReport::default();
      for package in &packages {
         report(
            sink,
            &subject,
            InstallStatus::Staging,
            0.6,
            format!("Staging bootloader theme '{}'", package.name),
         );
         let path = self.bootloader.stage(&package.name, &package.root_path).await?;
         result.staged.push(package.name.clone());
         result
            .installed
            .push(describe(&path, ThemeKind::Bootloader, ThemeSource::System));
      }

      report(
         sink,
         &subject,
         InstallStatus::Completed,
         1.0,
         "Staged; apply the bootloader theme to activate it",
      );
      Ok(result)
   }

   /// Place a downloaded file for a non-theme install type.
   ///
   /// Supported archives are unpacked into the destination, other files are
   /// copied verbatim. A shell-extension archive carrying `metadata.json` at
   /// its root is placed under the extension's uuid. System-scoped destinations
   /// are written through the privileged runner.
   pub async fn place_download(
      &self,
      file: &Path,
      install_type: InstallType,
      sink: &dyn ProgressSink,
   ) -> ThemeResult<InstallReport> {
      let subject = file.display().to_string();
      let resolver = self.resolver.clone();
      let dest_dir = run_blocking(move || resolver.resolve(install_type)).await?;
      log::info!("Placing {:?} into {:?} ({})", file, dest_dir, install_type);

      // The extraction directory stays alive until placement finishes.
      let (entries, _extracted) = if ArchiveFormat::detect(file).is_some() {
         let (temp, _) = self.extract_to_temp(file, sink).await?;
         report(sink, &subject, InstallStatus::Installing, 0.6, "Placing files...");
         let root = temp.path().to_path_buf();
         let entries = run_blocking(move || extracted_entries(&root, install_type)).await?;
         (entries, Some(temp))
      } else {
         report(sink, &subject, InstallStatus::Installing, 0.6, "Copying file...");
         let name = file
            .file_name()
            .ok_or_else(|| ThemeError::InvalidThemeName {
               name: subject.clone(),
               reason: "path has no file name".to_string(),
            })?;
         (vec![(file.to_path_buf(), name.to_os_string())], None)
      };

      let mut result = InstallReport::default();
      if install_type.scope() == Scope::System {
         for (source, name) in &entries {
            result
               .placed
               .push(self.place_privileged(source, &dest_dir, name).await?);
         }
      } else {
         let target = dest_dir.clone();
         result.placed = run_blocking(move || {
            entries
               .into_iter()
               .map(|(source, name)| -> ThemeResult<PathBuf> {
                  let dest = target.join(name);
                  if source.is_dir() {
                     move_into_place(&source, &dest)?;
                  } else {
                     remove_existing(&dest)?;
                     fs::copy(&source, &dest)?;
                  }
                  Ok(dest)
               })
               .collect()
         })
         .await?;
      }

      report(sink, &subject, InstallStatus::Completed, 1.0, "Installation completed!");
      log::info!("Placed {} item(s) into {:?}", result.placed.len(), dest_dir);
      Ok(result)
   }

   /// Replace `dest_dir/name` with `source` using elevated commands.
   async fn place_privileged(
      &self,
      source: &Path,
      dest_dir: &Path,
      name: &OsStr,
   ) -> ThemeResult<PathBuf> {
      let dest = dest_dir.join(name);
      let _guard = locks::lock_path(&dest).await;
      log::info!("Placing {:?} into system directory {:?}", source, dest);

      let commands = [
         argv(["mkdir".to_string(), "-p".to_string(), dest_dir.display().to_string()]),
         argv(["rm".to_string(), "-rf".to_string(), dest.display().to_string()]),
         argv([
            "cp".to_string(),
            "-r".to_string(),
            source.display().to_string(),
            dest.display().to_string(),
         ]),
      ];
      for command in &commands {
         let result = self.runner.run(command, None).await;
         match result.status {
            PrivilegedStatus::Success => {}
            PrivilegedStatus::Denied => {
               return Err(ThemeError::PrivilegeDenied {
                  step: BootloaderStep::Copy,
                  command: command.join(" "),
                  output: result.output,
               });
            }
            PrivilegedStatus::Failed(_) | PrivilegedStatus::TimedOut => {
               return Err(ThemeError::SystemPlacementFailed {
                  command: command.join(" "),
                  output: result.output,
                  hint: format!("Run manually: {}", manual_command(command)),
               });
            }
         }
      }
      Ok(dest)
   }

   async fn place_package(&self, package: &ThemePackage) -> ThemeResult<InstalledThemeEntry> {
      let resolver = self.resolver.clone();
      let package = package.clone();
      run_blocking(move || {
         let dest = resolver
            .resolve(package.kind.install_type())?
            .join(&package.name);
         move_into_place(&package.root_path, &dest)?;
         log::info!(
            "{} theme '{}' installed to {:?}",
            package.kind,
            package.name,
            dest
         );
         Ok(describe(&dest, package.kind, ThemeSource::User))
      })
      .await
   }

   /// Delete a user-scoped installed theme of `kind`.
   pub fn remove_theme(&self, kind: ThemeKind, name: &str) -> ThemeResult<PathBuf> {
      validate_entry_name(name)?;
      let found = self
         .resolver
         .user_search_paths(kind.install_type())
         .into_iter()
         .map(|base| base.join(name))
         .find(|path| path.is_dir() && matches_kind(path, kind))
         .ok_or_else(|| ThemeError::ThemeNotFound(name.to_string()))?;

      log::info!("Removing {} theme '{}' from {:?}", kind, name, found);
      fs::remove_dir_all(&found)?;
      Ok(found)
   }
}

/// Reject names that would escape or alias the destination directory.
pub fn validate_entry_name(name: &str) -> ThemeResult<()> {
   let reason = if name.is_empty() {
      Some("name is empty")
   } else if name == "." || name == ".." {
      Some("name is a relative path component")
   } else if name.contains('/') || name.contains('\\') || name.contains('\0') {
      Some("name contains a path separator")
   } else {
      None
   };
   match reason {
      Some(reason) => Err(ThemeError::InvalidThemeName {
         name: name.to_string(),
         reason: reason.to_string(),
      }),
      None => Ok(()),
   }
}

/// Top-level items of an extraction root paired with their destination names.
fn extracted_entries(root: &Path, install_type: InstallType) -> ThemeResult<Vec<(PathBuf, OsString)>> {
   if install_type == InstallType::ShellExtension
      && let Some(uuid) = extension_uuid(root)
   {
      validate_entry_name(&uuid)?;
      return Ok(vec![(root.to_path_buf(), OsString::from(uuid))]);
   }

   let mut entries: Vec<(PathBuf, OsString)> = fs::read_dir(root)?
      .filter_map(|entry| entry.ok())
      .map(|entry| (entry.path(), entry.file_name()))
      .collect();
   entries.sort();
   Ok(entries)
}

fn extension_uuid(root: &Path) -> Option<String> {
   let content = fs::read_to_string(root.join(EXTENSION_METADATA)).ok()?;
   let metadata: serde_json::Value = serde_json::from_str(&content)
      .inspect_err(|e| log::warn!("Ignoring unreadable {}: {}", EXTENSION_METADATA, e))
      .ok()?;
   metadata
      .get("uuid")
      .and_then(|uuid| uuid.as_str())
      .map(String::from)
}

fn remove_existing(dest: &Path) -> ThemeResult<()> {
   let Ok(metadata) = fs::symlink_metadata(dest) else {
      return Ok(());
   };
   log::info!("Replacing existing {:?}", dest);
   if metadata.is_dir() {
      fs::remove_dir_all(dest)?;
   } else {
      fs::remove_file(dest)?;
   }
   Ok(())
}

/// Delete whatever occupies `dest`, then move `src` there.
fn move_into_place(src: &Path, dest: &Path) -> ThemeResult<()> {
   remove_existing(dest)?;
   match fs::rename(src, dest) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
         log::debug!("Rename across filesystems, copying {:?} to {:?}", src, dest);
         copy_tree(src, dest)
      }
      Err(e) => Err(e.into()),
   }
}

fn copy_tree(src: &Path, dest: &Path) -> ThemeResult<()> {
   if !src.is_dir() {
      fs::copy(src, dest)?;
      return Ok(());
   }
   for entry in WalkDir::new(src) {
      let entry = entry?;
      let Ok(relative) = entry.path().strip_prefix(src) else {
         continue;
      };
      let target = dest.join(relative);
      let file_type = entry.file_type();
      if file_type.is_dir() {
         fs::create_dir_all(&target)?;
      } else if file_type.is_symlink() {
         std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
      } else {
         fs::copy(entry.path(), &target)?;
      }
   }
   Ok(())
}
