//! Marker-file heuristics deciding which theme kind a directory holds.
//!
//! The same predicates back both install-time classification and the
//! inventory scanner, so an entry is listed under a kind exactly when it
//! would have been installed as that kind.

use super::types::{ThemeKind, ThemePackage};
use crate::error::ThemeResult;
use std::{
   fs,
   path::{Path, PathBuf},
};

pub const STYLE_ENGINE_DIRS: [&str; 3] = ["gtk-2.0", "gtk-3.0", "gtk-4.0"];
pub const SHELL_DIR: &str = "gnome-shell";
pub const ICON_INDEX: &str = "index.theme";
pub const SCALABLE_DIR: &str = "scalable";
pub const CURSOR_DIR: &str = "cursors";
pub const BOOTLOADER_DESCRIPTOR: &str = "theme.txt";

/// Structural rule for a single kind.
pub fn matches_kind(dir: &Path, kind: ThemeKind) -> bool {
   match kind {
      ThemeKind::Style => STYLE_ENGINE_DIRS
         .iter()
         .any(|engine| dir.join(engine).is_dir()),
      ThemeKind::Shell => dir.join(SHELL_DIR).is_dir(),
      ThemeKind::Icons => dir.join(SCALABLE_DIR).is_dir() || icon_directories(dir).is_some(),
      ThemeKind::Cursors => dir.join(CURSOR_DIR).is_dir(),
      ThemeKind::Bootloader => dir.join(BOOTLOADER_DESCRIPTOR).is_file(),
   }
}

/// First kind in precedence order whose rule matches, or `None`.
pub fn detect_kind(dir: &Path) -> Option<ThemeKind> {
   ThemeKind::PRECEDENCE
      .into_iter()
      .find(|kind| matches_kind(dir, *kind))
}

/// `Directories` listed under `[Icon Theme]` in `index.theme`.
///
/// Cursor themes ship an `index.theme` too, but only to declare inheritance;
/// requiring `Directories` keeps them out of the icon category.
pub fn icon_directories(dir: &Path) -> Option<Vec<String>> {
   let content = fs::read_to_string(dir.join(ICON_INDEX)).ok()?;
   let mut in_section = false;

   for line in content.lines() {
      let line = line.trim();
      if line.starts_with('[') {
         in_section = line == "[Icon Theme]";
         continue;
      }
      if !in_section {
         continue;
      }
      if let Some((key, value)) = line.split_once('=')
         && key.trim() == "Directories"
      {
         return Some(
            value
               .split(',')
               .map(str::trim)
               .filter(|d| !d.is_empty())
               .map(String::from)
               .collect(),
         );
      }
   }
   None
}

fn is_ignored(name: &str) -> bool {
   name.starts_with('.') || name == "__MACOSX"
}

fn subdirectories(dir: &Path) -> ThemeResult<Vec<PathBuf>> {
   let mut dirs = Vec::new();
   for entry in fs::read_dir(dir)? {
      let entry = entry?;
      let name = entry.file_name();
      if is_ignored(&name.to_string_lossy()) {
         continue;
      }
      if entry.file_type()?.is_dir() {
         dirs.push(entry.path());
      }
   }
   dirs.sort();
   Ok(dirs)
}

fn package_for(dir: &Path, name: Option<&str>) -> Option<ThemePackage> {
   let kind = detect_kind(dir)?;
   let name = match name {
      Some(name) => name.to_string(),
      None => dir.file_name()?.to_string_lossy().into_owned(),
   };
   Some(ThemePackage {
      name,
      kind,
      root_path: dir.to_path_buf(),
   })
}

/// Classify the contents of an extraction root.
///
/// Every top-level directory is inspected. When there is exactly one
/// top-level directory and it is not a theme itself (a "pack" wrapper), its
/// children are inspected too. Loose files beside that directory do not
/// count. When nothing matched and the root itself carries markers, the
/// root is returned under `root_name`.
pub fn classify(root: &Path, root_name: Option<&str>) -> ThemeResult<Vec<ThemePackage>> {
   let top_level = subdirectories(root)?;
   let mut packages: Vec<ThemePackage> = top_level
      .iter()
      .filter_map(|dir| package_for(dir, None))
      .collect();

   if let [lone] = top_level.as_slice()
      && packages.is_empty()
   {
      for dir in subdirectories(lone)? {
         if let Some(package) = package_for(&dir, None) {
            packages.push(package);
         }
      }
   }

   if packages.is_empty()
      && let Some(name) = root_name
      && let Some(package) = package_for(root, Some(name))
   {
      packages.push(package);
   }

   for package in &packages {
      log::debug!(
         "Classified {:?} as {} theme '{}'",
         package.root_path,
         package.kind,
         package.name
      );
   }
   Ok(packages)
}
