use crate::themes::types::Subsystem;
use std::{collections::BTreeMap, path::Path, process::Command, sync::Arc};

/// Location of one preference in the desktop settings database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceKey {
   pub schema: &'static str,
   pub key: &'static str,
}

impl PreferenceKey {
   pub fn for_subsystem(subsystem: Subsystem) -> Self {
      match subsystem {
         Subsystem::Style => Self {
            schema: "org.gnome.desktop.interface",
            key: "gtk-theme",
         },
         Subsystem::Shell => Self {
            schema: "org.gnome.shell.extensions.user-theme",
            key: "name",
         },
         Subsystem::Icons => Self {
            schema: "org.gnome.desktop.interface",
            key: "icon-theme",
         },
         Subsystem::Cursors => Self {
            schema: "org.gnome.desktop.interface",
            key: "cursor-theme",
         },
      }
   }
}

/// Key/value preference store backing the live desktop settings.
pub trait PreferenceStore: Send + Sync {
   fn set(&self, key: PreferenceKey, value: &str) -> Result<(), String>;
   fn get(&self, key: PreferenceKey) -> Result<String, String>;
}

/// `gsettings` command-line front end.
pub struct GsettingsStore;

impl PreferenceStore for GsettingsStore {
   fn set(&self, key: PreferenceKey, value: &str) -> Result<(), String> {
      let output = Command::new("gsettings")
         .args(["set", key.schema, key.key, value])
         .output()
         .map_err(|e| format!("failed to run gsettings: {}", e))?;
      if output.status.success() {
         Ok(())
      } else {
         Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
      }
   }

   fn get(&self, key: PreferenceKey) -> Result<String, String> {
      let output = Command::new("gsettings")
         .args(["get", key.schema, key.key])
         .output()
         .map_err(|e| format!("failed to run gsettings: {}", e))?;
      if !output.status.success() {
         return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
      }
      let raw = String::from_utf8_lossy(&output.stdout);
      Ok(raw.trim().trim_matches('\'').to_string())
   }
}

pub const DEFAULT_THEMES: [(Subsystem, &str); 4] = [
   (Subsystem::Style, "Adwaita"),
   (Subsystem::Shell, ""),
   (Subsystem::Icons, "Adwaita"),
   (Subsystem::Cursors, "Adwaita"),
];

#[derive(Clone)]
pub struct SettingsApplier {
   store: Arc<dyn PreferenceStore>,
}

impl SettingsApplier {
   pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
      Self { store }
   }

   pub fn gsettings() -> Self {
      Self::new(Arc::new(GsettingsStore))
   }

   /// Set the theme for one subsystem. Any failure is logged and reported as `false`.
   pub fn apply(&self, subsystem: Subsystem, name: &str) -> bool {
      match self.store.set(PreferenceKey::for_subsystem(subsystem), name) {
         Ok(()) => {
            log::info!("Applied {} theme '{}'", subsystem, name);
            true
         }
         Err(e) => {
            log::error!("Failed to apply {} theme '{}': {}", subsystem, name, e);
            false
         }
      }
   }

   pub fn current(&self, subsystem: Subsystem) -> Option<String> {
      self
         .store
         .get(PreferenceKey::for_subsystem(subsystem))
         .inspect_err(|e| log::debug!("Reading current {} theme failed: {}", subsystem, e))
         .ok()
   }

   pub fn current_all(&self) -> BTreeMap<Subsystem, Option<String>> {
      Subsystem::ALL
         .into_iter()
         .map(|subsystem| (subsystem, self.current(subsystem)))
         .collect()
   }

   /// Apply several subsystems at once; one failure does not stop the rest.
   pub fn apply_combo(&self, themes: &[(Subsystem, String)]) -> BTreeMap<Subsystem, bool> {
      themes
         .iter()
         .map(|(subsystem, name)| (*subsystem, self.apply(*subsystem, name)))
         .collect()
   }

   pub fn reset_to_defaults(&self) -> BTreeMap<Subsystem, bool> {
      let defaults: Vec<(Subsystem, String)> = DEFAULT_THEMES
         .iter()
         .map(|(subsystem, name)| (*subsystem, name.to_string()))
         .collect();
      self.apply_combo(&defaults)
   }
}

/// Rebuild the GTK icon cache of an icon or cursor theme directory. Best-effort.
pub fn refresh_icon_cache(theme_dir: &Path) -> bool {
   match Command::new("gtk-update-icon-cache")
      .arg("-f")
      .arg("-t")
      .arg(theme_dir)
      .output()
   {
      Ok(output) if output.status.success() => {
         log::info!("Refreshed icon cache for {:?}", theme_dir);
         true
      }
      Ok(output) => {
         log::warn!(
            "gtk-update-icon-cache failed for {:?}: {}",
            theme_dir,
            String::from_utf8_lossy(&output.stderr).trim()
         );
         false
      }
      Err(e) => {
         log::warn!("Could not run gtk-update-icon-cache: {}", e);
         false
      }
   }
}


#[cfg(test)]
mod tests {
   use super::{testing::MemoryStore, *};

   #[test]
   fn apply_reports_store_result() {
      let store = Arc::new(MemoryStore {
         rejected: vec!["Broken".into()],
         ..Default::default()
      });
      let applier = SettingsApplier::new(store.clone());

      assert!(applier.apply(Subsystem::Icons, "Papirus"));
      assert!(!applier.apply(Subsystem::Style, "Broken"));
      assert_eq!(applier.current(Subsystem::Icons).as_deref(), Some("Papirus"));
      assert_eq!(applier.current(Subsystem::Style), None);
   }

   #[test]
   fn shell_uses_user_theme_extension_key() {
      let key = PreferenceKey::for_subsystem(Subsystem::Shell);
      assert_eq!(key.schema, "org.gnome.shell.extensions.user-theme");
      assert_eq!(key.key, "name");
   }

   #[test]
   fn reset_applies_every_subsystem() {
      let applier = SettingsApplier::new(Arc::new(MemoryStore::default()));
      let results = applier.reset_to_defaults();
      assert_eq!(results.len(), 4);
      assert!(results.values().all(|ok| *ok));
      assert_eq!(applier.current(Subsystem::Cursors).as_deref(), Some("Adwaita"));
      assert_eq!(applier.current(Subsystem::Shell).as_deref(), Some(""));
      assert!(applier.current_all().values().all(Option::is_some));
   }
}
