use std::{
   collections::HashMap,
   fs::{self, File},
   io::Write,
   path::{Path, PathBuf},
   sync::{Arc, Mutex},
};
use tempfile::TempDir;
use theme_loader_lib::{
   Config, ThemeError, ThemeLoader,
   system::{ElevatedRunner, PreferenceKey, PreferenceStore},
   themes::{EntryFailureKind, InstallProgress, InstallStatus, NoProgress, Subsystem, ThemeKind},
};
use walkdir::WalkDir;

#[derive(Default)]
struct RecordingStore {
   values: Mutex<HashMap<&'static str, String>>,
   calls: Mutex<Vec<(&'static str, String)>>,
   rejected: Vec<String>,
}

impl PreferenceStore for RecordingStore {
   fn set(&self, key: PreferenceKey, value: &str) -> Result<(), String> {
      self.calls.lock().unwrap().push((key.key, value.to_string()));
      if self.rejected.iter().any(|r| r == value) {
         return Err(format!("rejected '{}'", value));
      }
      self.values.lock().unwrap().insert(key.key, value.to_string());
      Ok(())
   }

   fn get(&self, key: PreferenceKey) -> Result<String, String> {
      self.values
         .lock()
         .unwrap()
         .get(key.key)
         .cloned()
         .ok_or_else(|| "unset".to_string())
   }
}

struct Env {
   root: TempDir,
   store: Arc<RecordingStore>,
   loader: ThemeLoader,
}

impl Env {
   fn new() -> Self {
      Self::with_store(RecordingStore::default())
   }

   fn with_store(store: RecordingStore) -> Self {
      let root = tempfile::tempdir().unwrap();
      let mut config = Config::default();
      config.paths.home = Some(root.path().join("home"));
      config.paths.work_dir = Some(root.path().join("work"));
      config.paths.bootloader_themes_dir = root.path().join("boot/grub/themes");
      config.paths.bootloader_config = root.path().join("etc/default/grub");
      config.paths.system_themes_dirs = vec![];
      config.paths.system_icons_dirs = vec![];
      fs::create_dir_all(root.path().join("home")).unwrap();
      fs::create_dir_all(root.path().join("work")).unwrap();

      let store = Arc::new(store);
      let loader =
         ThemeLoader::with_backends(&config, store.clone(), Arc::new(ElevatedRunner::direct()))
            .unwrap();
      Self {
         root,
         store,
         loader,
      }
   }

   fn home(&self) -> PathBuf {
      self.root.path().join("home")
   }

   fn work(&self) -> PathBuf {
      self.root.path().join("work")
   }

   fn source(&self) -> PathBuf {
      let dir = self.root.path().join("source");
      fs::create_dir_all(&dir).unwrap();
      dir
   }

   fn archive_path(&self, name: &str) -> PathBuf {
      let dir = self.root.path().join("archives");
      fs::create_dir_all(&dir).unwrap();
      dir.join(name)
   }

   fn applied(&self, key: &str) -> Option<String> {
      self.store.values.lock().unwrap().get(key).cloned()
   }
}

fn write_file(path: &Path, content: &str) {
   fs::create_dir_all(path.parent().unwrap()).unwrap();
   fs::write(path, content).unwrap();
}

fn style_theme(source: &Path, name: &str, marker: Option<&str>) {
   write_file(&source.join(name).join("gtk-3.0/gtk.css"), "window {}");
   write_file(&source.join(name).join("index.theme"), "[Desktop Entry]\nName=Foo\n");
   if let Some(marker) = marker {
      write_file(&source.join(name).join(marker), marker);
   }
}

fn tar_into<W: Write>(writer: W, source: &Path) -> W {
   let mut builder = tar::Builder::new(writer);
   for entry in fs::read_dir(source).unwrap() {
      let entry = entry.unwrap();
      let name = entry.file_name();
      if entry.path().is_dir() {
         builder.append_dir_all(&name, entry.path()).unwrap();
      } else {
         builder.append_path_with_name(entry.path(), &name).unwrap();
      }
   }
   builder.into_inner().unwrap()
}

fn build_archive(source: &Path, archive: &Path) {
   let name = archive.file_name().unwrap().to_string_lossy().to_string();
   let file = File::create(archive).unwrap();
   if name.ends_with(".zip") {
      let mut zip = zip::ZipWriter::new(file);
      let options = zip::write::SimpleFileOptions::default();
      for entry in WalkDir::new(source).min_depth(1) {
         let entry = entry.unwrap();
         let relative = entry
            .path()
            .strip_prefix(source)
            .unwrap()
            .to_string_lossy()
            .to_string();
         if entry.file_type().is_dir() {
            zip.add_directory(relative, options).unwrap();
         } else {
            zip.start_file(relative, options).unwrap();
            zip.write_all(&fs::read(entry.path()).unwrap()).unwrap();
         }
      }
      zip.finish().unwrap();
   } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
      tar_into(encoder, source).finish().unwrap();
   } else if name.ends_with(".tar.xz") {
      tar_into(xz2::write::XzEncoder::new(file, 6), source)
         .finish()
         .unwrap();
   } else if name.ends_with(".tar.bz2") {
      tar_into(
         bzip2::write::BzEncoder::new(file, bzip2::Compression::default()),
         source,
      )
      .finish()
      .unwrap();
   } else if name.ends_with(".tar") {
      tar_into(file, source).sync_all().unwrap();
   } else {
      panic!("unknown archive type {name}");
   }
}

#[tokio::test]
async fn style_theme_installs_from_every_format() {
   for name in [
      "Foo.zip",
      "Foo.tar",
      "Foo.tar.gz",
      "Foo.tgz",
      "Foo.tar.xz",
      "Foo.tar.bz2",
   ] {
      let env = Env::new();
      let source = env.source();
      style_theme(&source, "Foo", None);
      let archive = env.archive_path(name);
      build_archive(&source, &archive);

      let report = env
         .loader
         .install_from_archive(&archive, &NoProgress)
         .await
         .unwrap_or_else(|e| panic!("{name}: {e}"));

      assert_eq!(report.installed.len(), 1, "{name}");
      assert_eq!(report.installed[0].kind, ThemeKind::Style);
      assert!(
         env.home().join(".themes/Foo/gtk-3.0/gtk.css").is_file(),
         "{name}"
      );
      assert_eq!(report.applied, vec!["Foo".to_string()]);
      assert_eq!(env.applied("gtk-theme").as_deref(), Some("Foo"), "{name}");
      assert!(report.is_clean());

      let inventory: Vec<_> = report.inventory[&ThemeKind::Style]
         .iter()
         .map(|e| e.name.as_str())
         .collect();
      assert_eq!(inventory, vec!["Foo"], "{name}");
   }
}

#[tokio::test]
async fn unrecognized_content_leaves_no_residue() {
   let env = Env::new();
   let source = env.source();
   write_file(&source.join("README.md"), "nothing to see");
   write_file(&source.join("docs/guide.txt"), "still nothing");
   let archive = env.archive_path("random.tar.gz");
   build_archive(&source, &archive);

   let err = env
      .loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap_err();

   assert!(matches!(err, ThemeError::UnrecognizedThemeContent(_)), "{err}");
   assert_eq!(fs::read_dir(env.work()).unwrap().count(), 0);
   assert!(env.store.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_format_fails_before_extraction() {
   let env = Env::new();
   let archive = env.archive_path("theme.rar");
   fs::write(&archive, b"Rar!").unwrap();

   let err = env
      .loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap_err();
   assert!(matches!(err, ThemeError::UnsupportedArchiveFormat(_)));
   assert_eq!(fs::read_dir(env.work()).unwrap().count(), 0);
}

#[tokio::test]
async fn second_install_replaces_first() {
   let env = Env::new();

   let first = env.root.path().join("first");
   style_theme(&first, "Foo", Some("first-only"));
   let archive = env.archive_path("Foo.tar.gz");
   build_archive(&first, &archive);
   env.loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();

   let second = env.root.path().join("second");
   style_theme(&second, "Foo", Some("second-only"));
   let archive = env.archive_path("Foo.zip");
   build_archive(&second, &archive);
   env.loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();

   let installed = env.home().join(".themes/Foo");
   assert!(installed.join("second-only").is_file());
   assert!(!installed.join("first-only").exists());
}

#[tokio::test]
async fn one_failed_apply_does_not_stop_the_rest() {
   let env = Env::with_store(RecordingStore {
      rejected: vec!["Broken".into()],
      ..Default::default()
   });
   let source = env.source();
   style_theme(&source, "Broken", None);
   write_file(&source.join("Papirus/scalable/apps/firefox.svg"), "<svg/>");
   write_file(&source.join("Bibata/cursors/left_ptr"), "xcursor");
   write_file(&source.join("notes.txt"), "loose file");
   let archive = env.archive_path("bundle.tar.xz");
   build_archive(&source, &archive);

   let report = env
      .loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();

   let installed: Vec<_> = report
      .installed
      .iter()
      .map(|e| (e.name.as_str(), e.kind))
      .collect();
   assert_eq!(
      installed,
      vec![
         ("Bibata", ThemeKind::Cursors),
         ("Broken", ThemeKind::Style),
         ("Papirus", ThemeKind::Icons),
      ]
   );
   assert_eq!(report.applied, vec!["Bibata".to_string(), "Papirus".to_string()]);
   assert_eq!(report.failures.len(), 1);
   assert_eq!(report.failures[0].name, "Broken");
   assert!(matches!(
      report.failures[0].failure,
      EntryFailureKind::SettingsApply
   ));

   // Applies follow placement order.
   let calls: Vec<_> = env
      .store
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(_, v)| v.clone())
      .collect();
   assert_eq!(calls, vec!["Bibata", "Broken", "Papirus"]);
   assert!(env.home().join(".themes/Broken/gtk-3.0").is_dir());
}

#[tokio::test]
async fn failed_placement_is_reported_per_entry() {
   let env = Env::new();
   // A regular file where the icon destination directory belongs.
   write_file(&env.home().join(".local/share/icons"), "not a directory");
   let source = env.source();
   style_theme(&source, "A", None);
   write_file(&source.join("B/scalable/apps/firefox.svg"), "<svg/>");
   let archive = env.archive_path("bundle.tar.gz");
   build_archive(&source, &archive);

   let report = env
      .loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();

   let installed: Vec<_> = report.installed.iter().map(|e| e.name.as_str()).collect();
   assert_eq!(installed, vec!["A"]);
   assert_eq!(report.applied, vec!["A".to_string()]);
   assert_eq!(report.failures.len(), 1);
   assert_eq!(report.failures[0].name, "B");
   assert_eq!(report.failures[0].kind, ThemeKind::Icons);
   assert!(matches!(
      report.failures[0].failure,
      EntryFailureKind::Placement
   ));
   assert!(env.home().join(".themes/A/gtk-3.0").is_dir());
   assert_eq!(env.applied("gtk-theme").as_deref(), Some("A"));
   assert_eq!(env.applied("icon-theme"), None);
   assert_eq!(report.inventory.keys().copied().collect::<Vec<_>>(), vec![ThemeKind::Style]);
}

#[tokio::test]
async fn wrapper_directory_is_descended() {
   let env = Env::new();
   let source = env.source();
   style_theme(&source.join("Pack"), "Light", None);
   style_theme(&source.join("Pack"), "Dark", None);
   let archive = env.archive_path("Pack.tar.bz2");
   build_archive(&source, &archive);

   let report = env
      .loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();
   let names: Vec<_> = report.installed.iter().map(|e| e.name.as_str()).collect();
   assert_eq!(names, vec!["Dark", "Light"]);
   assert_eq!(env.applied("gtk-theme").as_deref(), Some("Light"));
}

#[tokio::test]
async fn bootloader_theme_is_staged_not_applied() {
   let env = Env::new();
   let source = env.source();
   write_file(&source.join("Vimix/theme.txt"), "title-text: \"Vimix\"\n");
   write_file(&source.join("Vimix/background.png"), "png");
   let archive = env.archive_path("Vimix.tar.gz");
   build_archive(&source, &archive);

   let report = env
      .loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();

   assert_eq!(report.staged, vec!["Vimix".to_string()]);
   assert!(report.applied.is_empty());
   assert!(env.root.path().join("boot/grub/themes/Vimix/theme.txt").is_file());
   assert!(!env.root.path().join("etc/default/grub").exists());
   assert_eq!(env.loader.bootloader().list_staged(), vec!["Vimix".to_string()]);
}

#[tokio::test]
async fn progress_ends_with_completion() {
   let env = Env::new();
   let source = env.source();
   style_theme(&source, "Foo", None);
   let archive = env.archive_path("Foo.zip");
   build_archive(&source, &archive);

   let events = Mutex::new(Vec::new());
   let sink = |event: InstallProgress| events.lock().unwrap().push(event.status);
   env.loader.install_from_archive(&archive, &sink).await.unwrap();

   let events = events.into_inner().unwrap();
   assert_eq!(events.first(), Some(&InstallStatus::Extracting));
   assert!(events.contains(&InstallStatus::Applying));
   assert!(events.contains(&InstallStatus::Completed));
}

#[tokio::test]
async fn listing_reports_active_theme() {
   let env = Env::new();
   let source = env.source();
   write_file(&source.join("Papirus/index.theme"), "[Icon Theme]\nName=Papirus\nDirectories=48x48/apps\n");
   write_file(&source.join("Papirus/48x48/apps/a.svg"), "<svg/>");
   let archive = env.archive_path("Papirus.tar");
   build_archive(&source, &archive);
   env.loader
      .install_from_archive(&archive, &NoProgress)
      .await
      .unwrap();

   let listing = env.loader.list_installed(ThemeKind::Icons);
   assert_eq!(listing.active.as_deref(), Some("Papirus"));
   assert_eq!(listing.entries.len(), 1);

   env.loader
      .remove_theme(ThemeKind::Icons, "Papirus")
      .await
      .unwrap();
   assert!(env.loader.scan_installed(ThemeKind::Icons).is_empty());
   assert!(matches!(
      env.loader.remove_theme(ThemeKind::Icons, "Papirus").await,
      Err(ThemeError::ThemeNotFound(_))
   ));
}

#[tokio::test]
async fn combo_reports_each_subsystem() {
   let env = Env::with_store(RecordingStore {
      rejected: vec!["Nope".into()],
      ..Default::default()
   });
   let results = env.loader.apply_combo(&[
      (Subsystem::Style, "Arc".to_string()),
      (Subsystem::Icons, "Nope".to_string()),
   ]);
   assert_eq!(results.get(&Subsystem::Style), Some(&true));
   assert_eq!(results.get(&Subsystem::Icons), Some(&false));
}
