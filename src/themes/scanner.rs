use super::{
   classifier::{
      self, BOOTLOADER_DESCRIPTOR, CURSOR_DIR, SHELL_DIR, STYLE_ENGINE_DIRS, matches_kind,
   },
   types::{InstalledThemeEntry, ThemeKind, ThemeMetadata, ThemeSource},
};
use crate::{config::Config, error::ThemeResult, protocol::DestinationResolver};
use chrono::{DateTime, Utc};
use std::{
   collections::{BTreeMap, HashSet},
   fs,
   path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Read-only inventory of installed themes.
#[derive(Debug, Clone)]
pub struct ThemeScanner {
   resolver: DestinationResolver,
   system_themes_dirs: Vec<PathBuf>,
   system_icons_dirs: Vec<PathBuf>,
   bootloader_themes_dir: PathBuf,
}

impl ThemeScanner {
   pub fn new(
      resolver: DestinationResolver,
      system_themes_dirs: Vec<PathBuf>,
      system_icons_dirs: Vec<PathBuf>,
      bootloader_themes_dir: PathBuf,
   ) -> Self {
      Self {
         resolver,
         system_themes_dirs,
         system_icons_dirs,
         bootloader_themes_dir,
      }
   }

   pub fn from_config(config: &Config) -> ThemeResult<Self> {
      Ok(Self::new(
         DestinationResolver::from_config(config)?,
         config.paths.system_themes_dirs.clone(),
         config.paths.system_icons_dirs.clone(),
         config.paths.bootloader_themes_dir.clone(),
      ))
   }

   /// Directories searched for `kind`, user-scoped first.
   pub fn search_paths(&self, kind: ThemeKind) -> Vec<(PathBuf, ThemeSource)> {
      let user = self
         .resolver
         .user_search_paths(kind.install_type())
         .into_iter()
         .map(|p| (p, ThemeSource::User));
      let system: Vec<PathBuf> = match kind {
         ThemeKind::Style | ThemeKind::Shell => self.system_themes_dirs.clone(),
         ThemeKind::Icons | ThemeKind::Cursors => self.system_icons_dirs.clone(),
         ThemeKind::Bootloader => vec![self.bootloader_themes_dir.clone()],
      };
      match kind {
         ThemeKind::Bootloader => system.into_iter().map(|p| (p, ThemeSource::System)).collect(),
         _ => user
            .chain(system.into_iter().map(|p| (p, ThemeSource::System)))
            .collect(),
      }
   }

   /// Valid installed themes of one kind; a user entry shadows a system entry of the same name.
   pub fn scan(&self, kind: ThemeKind) -> Vec<InstalledThemeEntry> {
      let mut seen = HashSet::new();
      let mut entries = Vec::new();

      for (base, source) in self.search_paths(kind) {
         let Ok(read_dir) = fs::read_dir(&base) else {
            continue;
         };
         let mut candidates: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
               path
                  .file_name()
                  .is_some_and(|n| !n.to_string_lossy().starts_with('.'))
            })
            .collect();
         candidates.sort();

         for path in candidates {
            let name = path
               .file_name()
               .map(|n| n.to_string_lossy().into_owned())
               .unwrap_or_default();
            if seen.contains(&name) || !matches_kind(&path, kind) {
               continue;
            }
            seen.insert(name);
            entries.push(describe(&path, kind, source));
         }
      }

      log::debug!("Found {} {} themes", entries.len(), kind);
      entries
   }

   pub fn scan_all(&self) -> BTreeMap<ThemeKind, Vec<InstalledThemeEntry>> {
      ThemeKind::PRECEDENCE
         .into_iter()
         .map(|kind| (kind, self.scan(kind)))
         .collect()
   }

   /// Installed entry called `name`, if it is valid for `kind`.
   pub fn find(&self, kind: ThemeKind, name: &str) -> Option<InstalledThemeEntry> {
      self.scan(kind).into_iter().find(|entry| entry.name == name)
   }
}

/// Build the inventory record for one theme directory.
pub fn describe(path: &Path, kind: ThemeKind, source: ThemeSource) -> InstalledThemeEntry {
   let (size_bytes, file_count) = directory_stats(path);
   InstalledThemeEntry {
      name: path
         .file_name()
         .map(|n| n.to_string_lossy().into_owned())
         .unwrap_or_default(),
      kind,
      path: path.to_path_buf(),
      source,
      size_bytes,
      file_count,
      modified: fs::metadata(path)
         .and_then(|m| m.modified())
         .ok()
         .map(DateTime::<Utc>::from),
      metadata: metadata_for(path, kind),
   }
}

fn directory_stats(path: &Path) -> (u64, usize) {
   WalkDir::new(path)
      .into_iter()
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_type().is_file())
      .fold((0, 0), |(size, count), entry| {
         let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
         (size + len, count + 1)
      })
}

fn metadata_for(path: &Path, kind: ThemeKind) -> ThemeMetadata {
   match kind {
      ThemeKind::Style => ThemeMetadata::Style {
         engine_versions: STYLE_ENGINE_DIRS
            .iter()
            .filter(|engine| path.join(engine).is_dir())
            .filter_map(|engine| engine.strip_prefix("gtk-"))
            .map(String::from)
            .collect(),
      },
      ThemeKind::Shell => ThemeMetadata::Shell {
         has_dark_variant: path.join(SHELL_DIR).join("gnome-shell-dark.css").is_file(),
      },
      ThemeKind::Icons => ThemeMetadata::Icons {
         directories: classifier::icon_directories(path).unwrap_or_default(),
      },
      ThemeKind::Cursors => ThemeMetadata::Cursors {
         cursor_count: fs::read_dir(path.join(CURSOR_DIR))
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0),
      },
      ThemeKind::Bootloader => ThemeMetadata::Bootloader {
         title: fs::read_to_string(path.join(BOOTLOADER_DESCRIPTOR))
            .ok()
            .and_then(|content| bootloader_title(&content)),
      },
   }
}

fn bootloader_title(content: &str) -> Option<String> {
   content.lines().find_map(|line| {
      let (key, value) = line.split_once(':')?;
      (key.trim() == "title-text")
         .then(|| value.trim().trim_matches('"').to_string())
         .filter(|title| !title.is_empty())
   })
}
