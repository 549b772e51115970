//! Staging and activation of bootloader (GRUB) themes.
//!
//! All reads and writes of system locations go through a [`PrivilegedRunner`].
//! `apply` computes the whole patched configuration in memory and submits it
//! in one write; concurrent `apply` calls on the same configuration file are
//! serialized.

use super::{
   locks,
   privileged::{PrivilegedOutput, PrivilegedRunner, PrivilegedStatus, argv, find_program, manual_command},
};
use crate::{
   config::Config,
   error::{BootloaderStep, ThemeError, ThemeResult},
   themes::classifier::BOOTLOADER_DESCRIPTOR,
};
use serde::Serialize;
use std::{
   fs,
   path::{Path, PathBuf},
   sync::Arc,
};

pub const THEME_DIRECTIVE_KEY: &str = "GRUB_THEME";
const MAX_THEME_NAME_LEN: usize = 50;

/// Bootloader theme names end up in a root-owned path and a config file.
pub fn validate_theme_name(name: &str) -> ThemeResult<()> {
   let invalid = |reason: &str| ThemeError::InvalidThemeName {
      name: name.to_string(),
      reason: reason.to_string(),
   };
   if name.is_empty() {
      return Err(invalid("name is empty"));
   }
   if name.len() > MAX_THEME_NAME_LEN {
      return Err(invalid("name is longer than 50 characters"));
   }
   if !name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
   {
      return Err(invalid("only letters, digits, '-' and '_' are allowed"));
   }
   Ok(())
}

fn is_active_directive(line: &str) -> bool {
   line
      .trim_start()
      .strip_prefix(THEME_DIRECTIVE_KEY)
      .is_some_and(|rest| rest.trim_start().starts_with('='))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedConfig {
   pub content: String,
   /// Whether an existing directive was replaced in place (otherwise appended).
   pub replaced: bool,
}

/// Replace the first active theme directive with `directive`, or append it.
///
/// Later active directives are dropped so at most one remains; commented-out
/// directives and every other line are kept verbatim and in order.
pub fn patch_config(content: &str, directive: &str) -> PatchedConfig {
   let ends_with_newline = content.is_empty() || content.ends_with('\n');
   let body = content.strip_suffix('\n').unwrap_or(content);

   let mut lines: Vec<&str> = Vec::new();
   let mut replaced = false;
   if !content.is_empty() {
      for line in body.split('\n') {
         if is_active_directive(line) {
            if !replaced {
               lines.push(directive);
               replaced = true;
            }
            continue;
         }
         lines.push(line);
      }
   }
   if !replaced {
      lines.push(directive);
   }

   let mut patched = lines.join("\n");
   if ends_with_newline {
      patched.push('\n');
   }
   PatchedConfig {
      content: patched,
      replaced,
   }
}

/// Value of the active theme directive, unquoted.
pub fn active_directive_value(content: &str) -> Option<String> {
   content
      .lines()
      .find(|line| is_active_directive(line))
      .and_then(|line| line.split_once('='))
      .map(|(_, value)| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
   pub theme: String,
   pub config_path: PathBuf,
   pub directive: String,
   pub replaced_existing: bool,
   pub regeneration_command: Vec<String>,
   pub regeneration_output: String,
}

pub struct BootloaderPatcher {
   runner: Arc<dyn PrivilegedRunner>,
   themes_dir: PathBuf,
   config_path: PathBuf,
   regeneration_commands: Vec<Vec<String>>,
}

impl BootloaderPatcher {
   pub fn new(
      runner: Arc<dyn PrivilegedRunner>,
      themes_dir: impl Into<PathBuf>,
      config_path: impl Into<PathBuf>,
      regeneration_commands: Vec<Vec<String>>,
   ) -> Self {
      Self {
         runner,
         themes_dir: themes_dir.into(),
         config_path: config_path.into(),
         regeneration_commands,
      }
   }

   pub fn from_config(runner: Arc<dyn PrivilegedRunner>, config: &Config) -> Self {
      Self::new(
         runner,
         config.paths.bootloader_themes_dir.clone(),
         config.paths.bootloader_config.clone(),
         config.bootloader.regeneration_commands.clone(),
      )
   }

   pub fn theme_dir(&self, name: &str) -> PathBuf {
      self.themes_dir.join(name)
   }

   pub fn directive_for(&self, name: &str) -> String {
      format!(
         "{}=\"{}\"",
         THEME_DIRECTIVE_KEY,
         self.theme_dir(name).join(BOOTLOADER_DESCRIPTOR).display()
      )
   }

   pub fn is_staged(&self, name: &str) -> bool {
      self.theme_dir(name).join(BOOTLOADER_DESCRIPTOR).is_file()
   }

   /// Names of staged themes that carry a descriptor.
   pub fn list_staged(&self) -> Vec<String> {
      let Ok(entries) = fs::read_dir(&self.themes_dir) else {
         return Vec::new();
      };
      let mut names: Vec<String> = entries
         .filter_map(|entry| entry.ok())
         .filter(|entry| entry.path().join(BOOTLOADER_DESCRIPTOR).is_file())
         .map(|entry| entry.file_name().to_string_lossy().into_owned())
         .collect();
      names.sort();
      names
   }

   /// Staged theme the configuration currently points at, if readable without elevation.
   pub fn active_theme(&self) -> Option<String> {
      let content = fs::read_to_string(&self.config_path).ok()?;
      let value = PathBuf::from(active_directive_value(&content)?);
      let theme_dir = value.parent()?;
      if theme_dir.parent()? != self.themes_dir {
         return None;
      }
      Some(theme_dir.file_name()?.to_string_lossy().into_owned())
   }

   /// First configured regeneration command whose program exists.
   pub fn find_regeneration_command(&self) -> Option<Vec<String>> {
      self
         .regeneration_commands
         .iter()
         .find(|command| {
            command
               .first()
               .and_then(|program| find_program(program))
               .is_some()
         })
         .cloned()
   }

   async fn run_step(
      &self,
      step: BootloaderStep,
      command: &[String],
      stdin: Option<&str>,
      hint: String,
   ) -> ThemeResult<PrivilegedOutput> {
      let result = self.runner.run(command, stdin).await;
      match result.status {
         PrivilegedStatus::Success => Ok(result),
         PrivilegedStatus::Denied => Err(ThemeError::PrivilegeDenied {
            step,
            command: command.join(" "),
            output: result.output,
         }),
         PrivilegedStatus::Failed(_) | PrivilegedStatus::TimedOut => Err(ThemeError::BootloaderStep {
            step,
            output: result.output,
            hint,
         }),
      }
   }

   /// Copy a theme directory into the bootloader theme directory without activating it.
   ///
   /// Refuses to replace an existing theme of the same name.
   pub async fn stage(&self, name: &str, staged_dir: &Path) -> ThemeResult<PathBuf> {
      validate_theme_name(name)?;
      if !staged_dir.join(BOOTLOADER_DESCRIPTOR).is_file() {
         return Err(ThemeError::InvalidBootloaderTheme(staged_dir.to_path_buf()));
      }

      let dest = self.theme_dir(name);
      let _guard = locks::lock_path(&dest).await;
      if dest.exists() {
         return Err(ThemeError::ThemeAlreadyExists(name.to_string()));
      }

      log::info!("Staging bootloader theme '{}' into {:?}", name, dest);

      let mkdir = argv(["mkdir".to_string(), "-p".to_string(), self.themes_dir.display().to_string()]);
      self
         .run_step(
            BootloaderStep::CreateThemesDir,
            &mkdir,
            None,
            format!("Run manually: {}", manual_command(&mkdir)),
         )
         .await?;

      let copy = argv([
         "cp".to_string(),
         "-r".to_string(),
         staged_dir.display().to_string(),
         dest.display().to_string(),
      ]);
      self
         .run_step(
            BootloaderStep::Copy,
            &copy,
            None,
            format!("Run manually: {}", manual_command(&copy)),
         )
         .await?;

      log::info!("Bootloader theme '{}' staged", name);
      Ok(dest)
   }

   /// Point the bootloader configuration at a staged theme and regenerate.
   ///
   /// The configuration is written before the regeneration tool is looked up. When no
   /// tool exists the error says the file was already changed.
   pub async fn apply(&self, name: &str) -> ThemeResult<ApplyReport> {
      validate_theme_name(name)?;
      if !self.is_staged(name) {
         return Err(ThemeError::ThemeNotStaged(name.to_string()));
      }

      let _guard = locks::lock_path(&self.config_path).await;
      let config = self.config_path.display().to_string();
      let directive = self.directive_for(name);
      log::info!("Applying bootloader theme '{}' to {}", name, config);

      let read = argv(["cat".to_string(), config.clone()]);
      let current = self
         .run_step(
            BootloaderStep::Read,
            &read,
            None,
            format!("Check that {} exists and is readable: {}", config, manual_command(&read)),
         )
         .await?
         .stdout;

      let patched = patch_config(&current, &directive);
      log::debug!(
         "{} theme directive in {}",
         if patched.replaced { "Replacing" } else { "Appending" },
         config
      );

      let write = argv(["tee".to_string(), config.clone()]);
      self
         .run_step(
            BootloaderStep::Write,
            &write,
            Some(&patched.content),
            format!("Set {} in {} by hand, then regenerate the bootloader configuration", directive, config),
         )
         .await?;

      let Some(regenerate) = self.find_regeneration_command() else {
         log::error!(
            "{} was patched but no bootloader regeneration tool was found",
            config
         );
         return Err(ThemeError::NoRegenerationToolFound {
            config_path: self.config_path.clone(),
            config_patched: true,
            hint: "The configuration already contains the new theme. Run `sudo update-grub` \
                   or `sudo grub-mkconfig -o /boot/grub/grub.cfg` to finish."
               .to_string(),
         });
      };

      let regeneration_output = self
         .run_step(
            BootloaderStep::Regenerate,
            &regenerate,
            None,
            format!(
               "The configuration already contains the new theme. Run manually: {}",
               manual_command(&regenerate)
            ),
         )
         .await?
         .output;

      log::info!("Bootloader theme '{}' applied", name);
      Ok(ApplyReport {
         theme: name.to_string(),
         config_path: self.config_path.clone(),
         directive,
         replaced_existing: patched.replaced,
         regeneration_command: regenerate,
         regeneration_output,
      })
   }

   /// Delete a staged theme.
   pub async fn remove(&self, name: &str) -> ThemeResult<()> {
      validate_theme_name(name)?;
      let dest = self.theme_dir(name);
      let _guard = locks::lock_path(&dest).await;
      if !dest.exists() {
         return Err(ThemeError::ThemeNotFound(name.to_string()));
      }
      if self.active_theme().as_deref() == Some(name) {
         log::warn!("Removing bootloader theme '{}' which is still configured as active", name);
      }

      let remove = argv(["rm".to_string(), "-rf".to_string(), dest.display().to_string()]);
      self
         .run_step(
            BootloaderStep::Remove,
            &remove,
            None,
            format!("Run manually: {}", manual_command(&remove)),
         )
         .await?;
      log::info!("Bootloader theme '{}' removed", name);
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   const DIRECTIVE: &str = "GRUB_THEME=\"/boot/grub/themes/Vimix/theme.txt\"";

   #[test]
   fn replaces_existing_directive_in_place() {
      let config = "GRUB_DEFAULT=0\nGRUB_THEME=\"/boot/grub/themes/Old/theme.txt\"\nGRUB_TIMEOUT=5\n";
      let patched = patch_config(config, DIRECTIVE);

      assert!(patched.replaced);
      assert_eq!(
         patched.content,
         format!("GRUB_DEFAULT=0\n{}\nGRUB_TIMEOUT=5\n", DIRECTIVE)
      );
   }

   #[test]
   fn appends_when_missing() {
      let config = "GRUB_DEFAULT=0\n#GRUB_THEME=\"/x/theme.txt\"\nGRUB_TIMEOUT=5\n";
      let patched = patch_config(config, DIRECTIVE);

      assert!(!patched.replaced);
      assert_eq!(patched.content.lines().last(), Some(DIRECTIVE));
      assert!(patched.content.contains("#GRUB_THEME=\"/x/theme.txt\"\n"));
      assert!(patched.content.ends_with('\n'));
   }

   #[test]
   fn keeps_missing_trailing_newline() {
      let patched = patch_config("GRUB_DEFAULT=0", DIRECTIVE);
      assert_eq!(patched.content, format!("GRUB_DEFAULT=0\n{}", DIRECTIVE));
   }

   #[test]
   fn empty_config_gets_single_line() {
      let patched = patch_config("", DIRECTIVE);
      assert_eq!(patched.content, format!("{}\n", DIRECTIVE));
   }

   #[test]
   fn duplicate_directives_collapse_to_one() {
      let config = "GRUB_THEME=/a/theme.txt\nGRUB_TIMEOUT=5\n  GRUB_THEME = /b/theme.txt\n";
      let patched = patch_config(config, DIRECTIVE);
      assert_eq!(patched.content, format!("{}\nGRUB_TIMEOUT=5\n", DIRECTIVE));
   }

   #[test]
   fn similar_keys_are_not_directives() {
      let config = "GRUB_THEME_EXTRA=1\n";
      let patched = patch_config(config, DIRECTIVE);
      assert!(!patched.replaced);
      assert_eq!(patched.content, format!("GRUB_THEME_EXTRA=1\n{}\n", DIRECTIVE));
   }

   #[test]
   fn reads_active_value() {
      let config = "#GRUB_THEME=\"/old\"\nGRUB_THEME='/boot/grub/themes/Vimix/theme.txt'\n";
      assert_eq!(
         active_directive_value(config).as_deref(),
         Some("/boot/grub/themes/Vimix/theme.txt")
      );
      assert_eq!(active_directive_value("GRUB_DEFAULT=0\n"), None);
   }

   #[test]
   fn theme_names_are_restricted() {
      assert!(validate_theme_name("Vimix-dark_2").is_ok());
      assert!(validate_theme_name("").is_err());
      assert!(validate_theme_name("../etc").is_err());
      assert!(validate_theme_name("with space").is_err());
      assert!(validate_theme_name(&"a".repeat(51)).is_err());
   }
}
