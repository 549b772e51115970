use crate::error::{ThemeError, ThemeResult};
use std::{
   fs::{self, File},
   io::{self, BufReader, Read},
   path::Path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
   Zip,
   Tar,
   TarGz,
   TarXz,
   TarBz2,
}

// Longest suffixes first so ".tar.gz" wins over ".gz".
const SUFFIXES: &[(&str, ArchiveFormat)] = &[
   (".tar.gz", ArchiveFormat::TarGz),
   (".tar.xz", ArchiveFormat::TarXz),
   (".tar.bz2", ArchiveFormat::TarBz2),
   (".tgz", ArchiveFormat::TarGz),
   (".txz", ArchiveFormat::TarXz),
   (".tbz2", ArchiveFormat::TarBz2),
   (".tbz", ArchiveFormat::TarBz2),
   (".tar", ArchiveFormat::Tar),
   (".zip", ArchiveFormat::Zip),
];

impl ArchiveFormat {
   /// Detect the format from the file name suffix only.
   pub fn detect(path: &Path) -> Option<Self> {
      let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
      SUFFIXES
         .iter()
         .find(|(suffix, _)| name.ends_with(suffix))
         .map(|(_, format)| *format)
   }

   /// File name with the archive suffix removed.
   pub fn stem(self, path: &Path) -> Option<String> {
      let name = path.file_name()?.to_string_lossy().into_owned();
      let lower = name.to_ascii_lowercase();
      let (suffix, _) = SUFFIXES
         .iter()
         .find(|(suffix, format)| *format == self && lower.ends_with(suffix))?;
      let stem = &name[..name.len() - suffix.len()];
      (!stem.is_empty()).then(|| stem.to_string())
   }
}

/// Unpack `archive_path` into `output_dir`.
///
/// Entries that would escape `output_dir` (absolute paths, `..`) are skipped.
pub fn extract(archive_path: &Path, output_dir: &Path) -> ThemeResult<ArchiveFormat> {
   let format = ArchiveFormat::detect(archive_path)
      .ok_or_else(|| ThemeError::UnsupportedArchiveFormat(archive_path.to_path_buf()))?;

   log::info!("Extracting {:?} ({:?}) to {:?}", archive_path, format, output_dir);
   fs::create_dir_all(output_dir)?;

   let file = BufReader::new(File::open(archive_path)?);
   match format {
      ArchiveFormat::Zip => extract_zip(file, output_dir)?,
      ArchiveFormat::Tar => unpack_tar(file, output_dir)?,
      ArchiveFormat::TarGz => unpack_tar(flate2::read::GzDecoder::new(file), output_dir)?,
      ArchiveFormat::TarXz => unpack_tar(xz2::read::XzDecoder::new(file), output_dir)?,
      ArchiveFormat::TarBz2 => unpack_tar(bzip2::read::BzDecoder::new(file), output_dir)?,
   }
   Ok(format)
}

fn unpack_tar<R: Read>(reader: R, output_dir: &Path) -> ThemeResult<()> {
   let mut archive = tar::Archive::new(reader);
   archive.set_preserve_permissions(false);
   archive.set_overwrite(true);

   for entry in archive.entries()? {
      let mut entry = entry?;
      // `unpack_in` refuses paths outside `output_dir` and reports them as `false`.
      if !entry.unpack_in(output_dir)? {
         log::warn!(
            "Skipped archive entry outside extraction root: {:?}",
            entry.path().ok()
         );
      }
   }
   Ok(())
}

fn extract_zip<R: Read + io::Seek>(reader: R, output_dir: &Path) -> ThemeResult<()> {
   let mut archive = zip::ZipArchive::new(reader)?;

   for i in 0..archive.len() {
      let mut file = archive.by_index(i)?;
      let Some(relative) = file.enclosed_name() else {
         log::warn!("Skipped unsafe zip entry {:?}", file.name());
         continue;
      };
      let out_path = output_dir.join(relative);

      if file.is_dir() {
         fs::create_dir_all(&out_path)?;
         continue;
      }
      if let Some(parent) = out_path.parent() {
         fs::create_dir_all(parent)?;
      }
      let mut out = File::create(&out_path)?;
      io::copy(&mut file, &mut out)?;
   }
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::path::PathBuf;

   #[test]
   fn detects_by_suffix() {
      let cases = [
         ("Arc.zip", Some(ArchiveFormat::Zip)),
         ("Arc.TAR.GZ", Some(ArchiveFormat::TarGz)),
         ("Arc.tgz", Some(ArchiveFormat::TarGz)),
         ("Arc-1.2.tar.xz", Some(ArchiveFormat::TarXz)),
         ("Arc.tar.bz2", Some(ArchiveFormat::TarBz2)),
         ("Arc.tar", Some(ArchiveFormat::Tar)),
         ("Arc.rar", None),
         ("Arc.gz", None),
         ("Arc", None),
      ];
      for (name, expected) in cases {
         assert_eq!(ArchiveFormat::detect(&PathBuf::from(name)), expected, "{name}");
      }
   }

   #[test]
   fn stem_strips_compound_suffix() {
      let path = PathBuf::from("/tmp/Nordic-v2.0.tar.xz");
      let format = ArchiveFormat::detect(&path).unwrap();
      assert_eq!(format.stem(&path).as_deref(), Some("Nordic-v2.0"));
   }

   #[test]
   fn unsupported_format_is_rejected_before_io() {
      let err = extract(Path::new("/nonexistent/theme.7z"), Path::new("/nonexistent/out"))
         .unwrap_err();
      assert!(matches!(err, ThemeError::UnsupportedArchiveFormat(_)));
   }
}
