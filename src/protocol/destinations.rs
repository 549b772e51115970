use crate::{
   config::{Config, PathsConfig},
   error::{ThemeError, ThemeResult},
};
use serde::{Deserialize, Serialize};
use std::{
   fmt, fs,
   path::{Path, PathBuf},
};

/// Canonical category of an install request; decides where content lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallType {
   Style,
   Shell,
   Icons,
   Cursors,
   Wallpapers,
   Fonts,
   ShellExtension,
   Bootloader,
   Plymouth,
   Downloads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
   User,
   System,
}

#[derive(Debug, Clone, Copy)]
pub enum Template {
   /// Relative to the user's home directory.
   Home(&'static str),
   /// The configured bootloader theme directory.
   BootloaderThemes,
   /// The configured boot splash theme directory.
   PlymouthThemes,
}

// Every accepted spelling maps straight to a canonical type; no alias points at another alias.
const INSTALL_TYPE_NAMES: &[(&str, InstallType)] = &[
   ("style", InstallType::Style),
   ("themes", InstallType::Style),
   ("gtk-style", InstallType::Style),
   ("gtk2-style", InstallType::Style),
   ("gtk3-style", InstallType::Style),
   ("gtk4-style", InstallType::Style),
   ("gtk2_themes", InstallType::Style),
   ("gtk3_themes", InstallType::Style),
   ("gtk4_themes", InstallType::Style),
   ("cinnamon_themes", InstallType::Style),
   ("metacity_themes", InstallType::Style),
   ("xfwm4_themes", InstallType::Style),
   ("openbox_themes", InstallType::Style),
   ("kvantum_themes", InstallType::Style),
   ("shell", InstallType::Shell),
   ("shell-themes", InstallType::Shell),
   ("shell_themes", InstallType::Shell),
   ("gnome_shell_themes", InstallType::Shell),
   ("icons", InstallType::Icons),
   ("icon-themes", InstallType::Icons),
   ("icon_themes", InstallType::Icons),
   ("cursors", InstallType::Cursors),
   ("cursor-themes", InstallType::Cursors),
   ("cursor_themes", InstallType::Cursors),
   ("wallpapers", InstallType::Wallpapers),
   ("fonts", InstallType::Fonts),
   ("shell-extension", InstallType::ShellExtension),
   ("gnome_shell_extensions", InstallType::ShellExtension),
   ("bootloader", InstallType::Bootloader),
   ("grub_themes", InstallType::Bootloader),
   ("grub-themes", InstallType::Bootloader),
   ("plymouth", InstallType::Plymouth),
   ("plymouth_themes", InstallType::Plymouth),
   ("plymouth-themes", InstallType::Plymouth),
   ("downloads", InstallType::Downloads),
];

const DESTINATIONS: &[(InstallType, Scope, Template)] = &[
   (InstallType::Style, Scope::User, Template::Home(".themes")),
   (InstallType::Shell, Scope::User, Template::Home(".themes")),
   (InstallType::Icons, Scope::User, Template::Home(".local/share/icons")),
   (InstallType::Cursors, Scope::User, Template::Home(".icons")),
   (InstallType::Wallpapers, Scope::User, Template::Home(".local/share/wallpapers")),
   (InstallType::Fonts, Scope::User, Template::Home(".fonts")),
   (
      InstallType::ShellExtension,
      Scope::User,
      Template::Home(".local/share/gnome-shell/extensions"),
   ),
   (InstallType::Bootloader, Scope::System, Template::BootloaderThemes),
   (InstallType::Plymouth, Scope::System, Template::PlymouthThemes),
   (InstallType::Downloads, Scope::User, Template::Home("Downloads")),
];

impl InstallType {
   /// Resolve a protocol `type` value. Unknown names fall back to [`InstallType::Downloads`].
   pub fn resolve(name: &str) -> Self {
      let name = name.trim();
      INSTALL_TYPE_NAMES
         .iter()
         .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
         .map(|(_, install_type)| *install_type)
         .unwrap_or(InstallType::Downloads)
   }

   pub fn is_known(name: &str) -> bool {
      INSTALL_TYPE_NAMES
         .iter()
         .any(|(alias, _)| alias.eq_ignore_ascii_case(name.trim()))
   }

   pub fn as_str(self) -> &'static str {
      match self {
         Self::Style => "style",
         Self::Shell => "shell",
         Self::Icons => "icons",
         Self::Cursors => "cursors",
         Self::Wallpapers => "wallpapers",
         Self::Fonts => "fonts",
         Self::ShellExtension => "shell-extension",
         Self::Bootloader => "bootloader",
         Self::Plymouth => "plymouth",
         Self::Downloads => "downloads",
      }
   }

   fn destination(self) -> (Scope, Template) {
      DESTINATIONS
         .iter()
         .find(|(install_type, _, _)| *install_type == self)
         .map(|(_, scope, template)| (*scope, *template))
         .unwrap_or((Scope::User, Template::Home("Downloads")))
   }

   pub fn scope(self) -> Scope {
      self.destination().0
   }
}

impl fmt::Display for InstallType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Expands destination templates against one home directory.
#[derive(Debug, Clone)]
pub struct DestinationResolver {
   home: PathBuf,
   bootloader_themes_dir: PathBuf,
   plymouth_themes_dir: PathBuf,
}

impl DestinationResolver {
   pub fn new(home: impl Into<PathBuf>, bootloader_themes_dir: impl Into<PathBuf>) -> Self {
      Self {
         home: home.into(),
         bootloader_themes_dir: bootloader_themes_dir.into(),
         plymouth_themes_dir: PathsConfig::default().plymouth_themes_dir,
      }
   }

   pub fn with_plymouth_themes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
      self.plymouth_themes_dir = dir.into();
      self
   }

   pub fn from_config(config: &Config) -> ThemeResult<Self> {
      Ok(
         Self::new(config.home_dir()?, config.paths.bootloader_themes_dir.clone())
            .with_plymouth_themes_dir(config.paths.plymouth_themes_dir.clone()),
      )
   }

   pub fn home(&self) -> &Path {
      &self.home
   }

   /// Expanded path for `install_type` without touching the filesystem.
   pub fn destination_path(&self, install_type: InstallType) -> PathBuf {
      match install_type.destination().1 {
         Template::Home(relative) => self.home.join(relative),
         Template::BootloaderThemes => self.bootloader_themes_dir.clone(),
         Template::PlymouthThemes => self.plymouth_themes_dir.clone(),
      }
   }

   /// Expanded path for `install_type`. User-scoped directories are created when missing;
   /// system-scoped ones are returned as-is and left to the privileged helpers.
   pub fn resolve(&self, install_type: InstallType) -> ThemeResult<PathBuf> {
      let path = self.destination_path(install_type);
      if install_type.scope() == Scope::User {
         fs::create_dir_all(&path).map_err(|e| {
            ThemeError::Io(std::io::Error::new(
               e.kind(),
               format!("creating {}: {}", path.display(), e),
            ))
         })?;
      }
      Ok(path)
   }

   /// User directories checked for installed themes of a category, current layout first.
   pub fn user_search_paths(&self, install_type: InstallType) -> Vec<PathBuf> {
      match install_type {
         InstallType::Style | InstallType::Shell => vec![
            self.home.join(".themes"),
            self.home.join(".local/share/themes"),
         ],
         InstallType::Icons => vec![
            self.home.join(".local/share/icons"),
            self.home.join(".icons"),
         ],
         InstallType::Cursors => vec![
            self.home.join(".icons"),
            self.home.join(".local/share/icons"),
         ],
         other => vec![self.destination_path(other)],
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn aliases_resolve_in_one_hop() {
      for (alias, target) in INSTALL_TYPE_NAMES {
         // The canonical name of every target must itself resolve to the same target.
         assert_eq!(InstallType::resolve(target.as_str()), *target, "alias {alias}");
      }
      assert_eq!(InstallType::resolve("gtk3-style"), InstallType::Style);
      assert_eq!(InstallType::resolve("GTK3_THEMES"), InstallType::Style);
      assert_eq!(InstallType::resolve("cursor_themes"), InstallType::Cursors);
   }

   #[test]
   fn unknown_types_fall_back_to_downloads() {
      assert_eq!(InstallType::resolve("plasma_plasmoids"), InstallType::Downloads);
      assert!(!InstallType::is_known("plasma_plasmoids"));
   }

   #[test]
   fn every_type_has_one_destination() {
      let all = [
         InstallType::Style,
         InstallType::Shell,
         InstallType::Icons,
         InstallType::Cursors,
         InstallType::Wallpapers,
         InstallType::Fonts,
         InstallType::ShellExtension,
         InstallType::Bootloader,
         InstallType::Plymouth,
         InstallType::Downloads,
      ];
      for install_type in all {
         let count = DESTINATIONS
            .iter()
            .filter(|(t, _, _)| *t == install_type)
            .count();
         assert_eq!(count, 1, "{install_type}");
      }
   }

   #[test]
   fn alias_and_canonical_share_destination() {
      let home = tempfile::tempdir().unwrap();
      let resolver = DestinationResolver::new(home.path(), "/boot/grub/themes");

      let by_alias = resolver.resolve(InstallType::resolve("gtk3-style")).unwrap();
      let by_name = resolver.resolve(InstallType::resolve("style")).unwrap();

      assert_eq!(by_alias, by_name);
      assert_eq!(by_name, home.path().join(".themes"));
      assert!(by_name.is_dir());
   }

   #[test]
   fn system_destinations_are_not_created() {
      let home = tempfile::tempdir().unwrap();
      let boot = home.path().join("boot-themes");
      let resolver = DestinationResolver::new(home.path(), &boot);

      let path = resolver.resolve(InstallType::Bootloader).unwrap();
      assert_eq!(path, boot);
      assert!(!boot.exists());
   }

   #[test]
   fn plymouth_themes_are_system_scoped() {
      let home = tempfile::tempdir().unwrap();
      let splash = home.path().join("plymouth");
      let resolver =
         DestinationResolver::new(home.path(), "/boot/grub/themes").with_plymouth_themes_dir(&splash);

      assert_eq!(InstallType::resolve("plymouth_themes"), InstallType::Plymouth);
      assert_eq!(InstallType::Plymouth.scope(), Scope::System);
      assert_eq!(resolver.resolve(InstallType::Plymouth).unwrap(), splash);
      assert!(!splash.exists());
   }
}
