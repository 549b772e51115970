//! Install-protocol links: `ocs://install?url=<encoded>&type=<type>&filename=<name>`.

pub mod destinations;

pub use destinations::{DestinationResolver, InstallType, Scope};

use crate::error::{ThemeError, ThemeResult};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use url::Url;

pub const PROTOCOL_SCHEME: &str = "ocs";
pub const SECURE_PROTOCOL_SCHEME: &str = "ocss";
pub const INSTALL_COMMAND: &str = "install";

// Query components keep only unreserved characters literal.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
   .remove(b'-')
   .remove(b'_')
   .remove(b'.')
   .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolRequest {
   pub command: String,
   pub download_url: String,
   pub install_type: InstallType,
   /// The `type` value as it appeared in the link, before alias resolution.
   pub requested_type: String,
   pub filename: Option<String>,
}

impl ProtocolRequest {
   pub fn is_install(&self) -> bool {
      self.command == INSTALL_COMMAND
   }
}

/// Parse an install-protocol link. Rejected links never reach the network.
pub fn parse(link: &str) -> ThemeResult<ProtocolRequest> {
   let link = link.trim();
   let scheme = link
      .split_once("://")
      .map(|(scheme, _)| scheme.to_ascii_lowercase())
      .ok_or_else(|| ThemeError::InvalidProtocolScheme(link.to_string()))?;
   if scheme != PROTOCOL_SCHEME && scheme != SECURE_PROTOCOL_SCHEME {
      return Err(ThemeError::InvalidProtocolScheme(link.to_string()));
   }

   let parsed =
      Url::parse(link).map_err(|_| ThemeError::InvalidProtocolScheme(link.to_string()))?;
   let command = parsed.host_str().unwrap_or_default().to_string();

   let mut download_url = None;
   let mut requested_type = None;
   let mut filename = None;
   for (key, value) in parsed.query_pairs() {
      match key.as_ref() {
         "url" => download_url = Some(value.into_owned()),
         "type" => requested_type = Some(value.into_owned()),
         "filename" => filename = Some(value.into_owned()),
         other => log::debug!("Ignoring unknown install-protocol parameter '{}'", other),
      }
   }

   let download_url = download_url
      .filter(|url| !url.trim().is_empty())
      .ok_or(ThemeError::MissingDownloadUrl)?;
   validate_download_url(&download_url)?;

   let requested_type = requested_type
      .filter(|t| !t.trim().is_empty())
      .unwrap_or_else(|| InstallType::Downloads.as_str().to_string());
   if !InstallType::is_known(&requested_type) {
      log::warn!(
         "Unknown install type '{}', falling back to downloads",
         requested_type
      );
   }

   Ok(ProtocolRequest {
      command,
      download_url,
      install_type: InstallType::resolve(&requested_type),
      requested_type,
      filename: filename.filter(|f| !f.is_empty()),
   })
}

fn validate_download_url(raw: &str) -> ThemeResult<()> {
   match Url::parse(raw) {
      Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
      _ => Err(ThemeError::InvalidDownloadUrl(raw.to_string())),
   }
}

/// Build an install link for a catalog entry, percent-encoding every component.
pub fn build(download_url: &str, install_type: InstallType, filename: Option<&str>) -> String {
   build_with_type(download_url, install_type.as_str(), filename)
}

/// Like [`build`] but keeps a raw `type` spelling (e.g. a catalog's own alias).
pub fn build_with_type(download_url: &str, install_type: &str, filename: Option<&str>) -> String {
   let mut link = format!(
      "{}://{}?url={}&type={}",
      PROTOCOL_SCHEME,
      INSTALL_COMMAND,
      utf8_percent_encode(download_url, COMPONENT),
      utf8_percent_encode(install_type, COMPONENT)
   );
   if let Some(filename) = filename.filter(|f| !f.is_empty()) {
      link.push_str("&filename=");
      link.push_str(&utf8_percent_encode(filename, COMPONENT).to_string());
   }
   link
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_catalog_link() {
      let request = parse(
         "ocs://install?url=https%3A%2F%2Fwww.gnome-look.org%2Fp%2F1234%2Fdownload&type=gtk3_themes&filename=arc.tar.xz",
      )
      .unwrap();

      assert!(request.is_install());
      assert_eq!(request.download_url, "https://www.gnome-look.org/p/1234/download");
      assert_eq!(request.install_type, InstallType::Style);
      assert_eq!(request.requested_type, "gtk3_themes");
      assert_eq!(request.filename.as_deref(), Some("arc.tar.xz"));
   }

   #[test]
   fn secure_scheme_is_accepted() {
      let request = parse("ocss://install?url=https%3A//example.com/a.zip&type=icons").unwrap();
      assert_eq!(request.install_type, InstallType::Icons);
      assert_eq!(request.filename, None);
   }

   #[test]
   fn missing_type_defaults_to_downloads() {
      let request = parse("ocs://install?url=https%3A%2F%2Fexample.com%2Fa.zip").unwrap();
      assert_eq!(request.install_type, InstallType::Downloads);
      assert_eq!(request.requested_type, "downloads");
   }

   #[test]
   fn rejects_foreign_scheme() {
      assert!(matches!(
         parse("https://install?url=https%3A%2F%2Fexample.com"),
         Err(ThemeError::InvalidProtocolScheme(_))
      ));
      assert!(matches!(
         parse("not a link"),
         Err(ThemeError::InvalidProtocolScheme(_))
      ));
   }

   #[test]
   fn rejects_missing_or_empty_download_url() {
      assert!(matches!(
         parse("ocs://install?type=themes"),
         Err(ThemeError::MissingDownloadUrl)
      ));
      assert!(matches!(
         parse("ocs://install?url=&type=themes"),
         Err(ThemeError::MissingDownloadUrl)
      ));
   }

   #[test]
   fn rejects_relative_download_url() {
      assert!(matches!(
         parse("ocs://install?url=p%2F1234%2Fdownload"),
         Err(ThemeError::InvalidDownloadUrl(_))
      ));
   }

   #[test]
   fn build_then_parse_keeps_reserved_characters() {
      let cases = [
         ("https://example.com/get?id=1&kind=a b", InstallType::Style, Some("My Theme.tar.gz")),
         ("https://example.com/100%25/x=y", InstallType::Icons, Some("a&b=c%.zip")),
         ("https://example.com/plain+plus", InstallType::Bootloader, None),
      ];

      for (url, install_type, filename) in cases {
         let link = build(url, install_type, filename);
         let request = parse(&link).unwrap();
         assert_eq!(request.download_url, url);
         assert_eq!(request.install_type, install_type);
         assert_eq!(request.filename.as_deref(), filename);
      }
   }

   #[test]
   fn built_links_encode_separators() {
      let link = build("https://example.com/?a=1&b=2", InstallType::Cursors, None);
      assert_eq!(
         link,
         "ocs://install?url=https%3A%2F%2Fexample.com%2F%3Fa%3D1%26b%3D2&type=cursors"
      );
   }
}
