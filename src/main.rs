use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf};
use theme_loader_lib::{
   Config, ThemeError, ThemeLoader, logger,
   themes::{InstallProgress, InstallReport, Subsystem, ThemeKind},
};

#[derive(Parser)]
#[command(name = "theme-loader", version, about = "Install and apply desktop themes")]
struct Cli {
   /// Configuration file (defaults to the user config directory)
   #[arg(long, global = true)]
   config: Option<PathBuf>,

   /// Debug logging
   #[arg(short, long, global = true)]
   verbose: bool,

   /// Print results as JSON
   #[arg(long, global = true)]
   json: bool,

   #[command(subcommand)]
   command: Command,
}

#[derive(Subcommand)]
enum Command {
   /// Install every theme found in a local archive
   Install { archive: PathBuf },
   /// Download and install from an ocs:// link
   InstallUrl { link: String },
   /// Build an ocs:// install link
   BuildUrl {
      url: String,
      #[arg(long = "type", default_value = "downloads")]
      install_type: String,
      #[arg(long)]
      filename: Option<String>,
   },
   /// Activate an installed theme
   Apply {
      #[arg(value_parser = parse_kind)]
      kind: ThemeKind,
      name: String,
   },
   /// Inventory installed themes
   Scan {
      #[arg(value_parser = parse_kind)]
      kind: Option<ThemeKind>,
   },
   /// Installed themes of one kind and the active one
   List {
      #[arg(value_parser = parse_kind)]
      kind: ThemeKind,
   },
   /// Remove an installed theme
   Remove {
      #[arg(value_parser = parse_kind)]
      kind: ThemeKind,
      name: String,
   },
   /// Restore the default desktop themes
   Reset,
   /// Rebuild the icon cache of an icon or cursor theme
   RefreshIcons {
      #[arg(value_parser = parse_kind)]
      kind: ThemeKind,
      name: String,
   },
}

fn parse_kind(value: &str) -> Result<ThemeKind, String> {
   ThemeKind::parse(value).ok_or_else(|| {
      format!("unknown theme kind '{value}' (style, shell, icons, cursors, bootloader)")
   })
}

fn progress(event: InstallProgress) {
   log::info!("[{:>3.0}%] {}", event.progress * 100.0, event.message);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
   println!("{}", serde_json::to_string_pretty(value)?);
   Ok(())
}

fn print_report(json: bool, report: &InstallReport) -> Result<()> {
   if json {
      return print_json(report);
   }
   for entry in &report.installed {
      println!("installed {} '{}' -> {}", entry.kind, entry.name, entry.path.display());
   }
   for name in &report.applied {
      println!("applied '{}'", name);
   }
   for name in &report.staged {
      println!("staged bootloader theme '{}' (run `theme-loader apply bootloader {}` to activate)", name, name);
   }
   for path in &report.placed {
      println!("placed {}", path.display());
   }
   for failure in &report.failures {
      println!("failed '{}': {}", failure.name, failure.message);
   }
   Ok(())
}

fn print_results(json: bool, results: &BTreeMap<Subsystem, bool>) -> Result<()> {
   if json {
      return print_json(results);
   }
   for (subsystem, ok) in results {
      println!("{:<8} {}", subsystem.to_string(), if *ok { "ok" } else { "failed" });
   }
   Ok(())
}

async fn run(cli: Cli) -> Result<()> {
   let config = match &cli.config {
      Some(path) => Config::load(path),
      None => Config::load_default(),
   }
   .context("Failed to load configuration")?;

   if let Command::BuildUrl {
      url,
      install_type,
      filename,
   } = &cli.command
   {
      println!(
         "{}",
         ThemeLoader::build_protocol_url(url, install_type, filename.as_deref())
      );
      return Ok(());
   }

   let loader = ThemeLoader::new(&config)?;
   match cli.command {
      Command::Install { archive } => {
         let report = loader.install_from_archive(&archive, &progress).await?;
         print_report(cli.json, &report)?;
      }
      Command::InstallUrl { link } => {
         let report = loader.install_from_protocol_url(&link, &progress).await?;
         print_report(cli.json, &report)?;
      }
      Command::Apply { kind, name } => {
         let outcome = loader.apply_theme(kind, &name).await?;
         if cli.json {
            print_json(&outcome)?;
         } else {
            println!("applied {} theme '{}'", kind, name);
         }
      }
      Command::Scan { kind } => {
         let inventory: BTreeMap<_, _> = match kind {
            Some(kind) => [(kind, loader.scan_installed(kind))].into_iter().collect(),
            None => loader.scan_all(),
         };
         if cli.json {
            print_json(&inventory)?;
         } else {
            for (kind, entries) in &inventory {
               println!("{}:", kind);
               for entry in entries {
                  println!("  {:<32} {:>10} bytes  {}", entry.name, entry.size_bytes, entry.path.display());
               }
            }
         }
      }
      Command::List { kind } => {
         let listing = loader.list_installed(kind);
         if cli.json {
            print_json(&listing)?;
         } else {
            for entry in &listing.entries {
               let marker = if listing.active.as_deref() == Some(entry.name.as_str()) { "*" } else { " " };
               println!("{} {}", marker, entry.name);
            }
         }
      }
      Command::Remove { kind, name } => {
         loader.remove_theme(kind, &name).await?;
         println!("removed {} theme '{}'", kind, name);
      }
      Command::Reset => print_results(cli.json, &loader.reset_to_defaults())?,
      Command::RefreshIcons { kind, name } => {
         let refreshed = loader.refresh_icon_cache(kind, &name)?;
         println!("{}", if refreshed { "icon cache refreshed" } else { "icon cache not refreshed" });
      }
      Command::BuildUrl { .. } => {}
   }
   Ok(())
}

#[tokio::main]
async fn main() {
   let cli = Cli::parse();
   logger::init(if cli.verbose {
      log::LevelFilter::Debug
   } else {
      log::LevelFilter::Info
   });

   if let Err(e) = run(cli).await {
      eprintln!("error: {:#}", e);
      if let Some(hint) = e.downcast_ref::<ThemeError>().and_then(|e| e.remediation()) {
         eprintln!("hint: {}", hint);
      }
      std::process::exit(1);
   }
}
