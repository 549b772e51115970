//! Retrying HTTP fetch into a private temporary directory.

use crate::{
   config::DownloadConfig,
   error::{ThemeError, ThemeResult},
};
use rand::Rng;
use reqwest::StatusCode;
use std::{
   path::{Path, PathBuf},
   time::Duration,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
   pub max_attempts: u32,
   pub base_delay: Duration,
   /// Upper bound of the random term added to each backoff delay.
   pub jitter: Duration,
   pub rate_limit_cooldown: Duration,
   pub request_timeout: Duration,
}

impl Default for RetryPolicy {
   fn default() -> Self {
      Self::from(&DownloadConfig::default())
   }
}

impl From<&DownloadConfig> for RetryPolicy {
   fn from(config: &DownloadConfig) -> Self {
      Self {
         max_attempts: config.max_attempts.max(1),
         base_delay: Duration::from_millis(config.base_delay_ms),
         jitter: Duration::from_millis(config.jitter_ms),
         rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
         request_timeout: Duration::from_secs(config.request_timeout_secs),
      }
   }
}

impl RetryPolicy {
   /// `base * 2^attempt + random[0, jitter)`.
   pub fn backoff(&self, attempt: u32) -> Duration {
      let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
      let jitter = if self.jitter.is_zero() {
         Duration::ZERO
      } else {
         self.jitter.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
      };
      exponential + jitter
   }
}

/// Why an attempt failed, and therefore what happens next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
   RateLimited,
   Server(u16),
   Client(u16),
   Timeout,
   Connection(String),
   Io(String),
}

impl AttemptError {
   fn is_retryable(&self) -> bool {
      !matches!(self, Self::Client(_))
   }
}

impl std::fmt::Display for AttemptError {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      match self {
         Self::RateLimited => write!(f, "rate limited (HTTP 429)"),
         Self::Server(status) => write!(f, "server error (HTTP {status})"),
         Self::Client(status) => write!(f, "client error (HTTP {status})"),
         Self::Timeout => write!(f, "request timed out"),
         Self::Connection(e) => write!(f, "connection failed: {e}"),
         Self::Io(e) => write!(f, "write failed: {e}"),
      }
   }
}

/// State of one `fetch` call. Dropped with it.
#[derive(Debug, Default)]
struct DownloadAttempt {
   attempt: u32,
   delay: Duration,
   last_error: Option<AttemptError>,
}

/// A fetched file. The containing temporary directory is removed on drop.
#[derive(Debug)]
pub struct DownloadedFile {
   _dir: TempDir,
   path: PathBuf,
   pub attempts: u32,
   /// Delays slept before each retry, in order.
   pub delays: Vec<Duration>,
}

impl DownloadedFile {
   pub fn path(&self) -> &Path {
      &self.path
   }
}

pub struct Downloader {
   client: reqwest::Client,
   policy: RetryPolicy,
   work_dir: Option<PathBuf>,
}

impl Downloader {
   pub fn new(policy: RetryPolicy, user_agent: &str, work_dir: Option<PathBuf>) -> ThemeResult<Self> {
      let client = reqwest::Client::builder()
         .timeout(policy.request_timeout)
         .user_agent(user_agent)
         .build()
         .map_err(|e| ThemeError::Config(format!("building HTTP client: {e}")))?;
      Ok(Self {
         client,
         policy,
         work_dir,
      })
   }

   pub fn from_config(config: &DownloadConfig, work_dir: Option<PathBuf>) -> ThemeResult<Self> {
      Self::new(RetryPolicy::from(config), &config.user_agent, work_dir)
   }

   fn temp_dir(&self) -> ThemeResult<TempDir> {
      let builder = {
         let mut builder = tempfile::Builder::new();
         builder.prefix("theme-loader-download-");
         builder
      };
      let dir = match &self.work_dir {
         Some(root) => {
            std::fs::create_dir_all(root)?;
            builder.tempdir_in(root)?
         }
         None => builder.tempdir()?,
      };
      Ok(dir)
   }

   /// Download `url` with retries. `filename` names the local file; otherwise the
   /// last URL path segment is used.
   pub async fn fetch(&self, url: &str, filename: Option<&str>) -> ThemeResult<DownloadedFile> {
      let dir = self.temp_dir()?;
      let path = dir.path().join(local_file_name(url, filename));

      let mut state = DownloadAttempt::default();
      let mut delays = Vec::new();

      while state.attempt < self.policy.max_attempts {
         if state.attempt > 0 {
            state.delay = match state.last_error {
               Some(AttemptError::RateLimited) => self.policy.rate_limit_cooldown,
               _ => self.policy.backoff(state.attempt),
            };
            log::info!(
               "Retrying {} in {:?} (attempt {}/{})",
               url,
               state.delay,
               state.attempt + 1,
               self.policy.max_attempts
            );
            delays.push(state.delay);
            tokio::time::sleep(state.delay).await;
         }
         state.attempt += 1;

         log::info!("Downloading {} (attempt {})", url, state.attempt);
         match self.try_once(url, &path).await {
            Ok(bytes) => {
               log::info!("Downloaded {} bytes from {} to {:?}", bytes, url, path);
               return Ok(DownloadedFile {
                  _dir: dir,
                  path,
                  attempts: state.attempt,
                  delays,
               });
            }
            Err(AttemptError::Client(status)) => {
               log::error!("Download of {} rejected with HTTP {}", url, status);
               return Err(ThemeError::DownloadRejected {
                  url: url.to_string(),
                  status,
               });
            }
            Err(e) => {
               debug_assert!(e.is_retryable());
               log::warn!("Attempt {} for {} failed: {}", state.attempt, url, e);
               state.last_error = Some(e);
            }
         }
      }

      Err(ThemeError::DownloadExhausted {
         url: url.to_string(),
         attempts: state.attempt,
         last_error: state
            .last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string()),
      })
   }

   async fn try_once(&self, url: &str, path: &Path) -> Result<u64, AttemptError> {
      let mut response = self.client.get(url).send().await.map_err(classify_error)?;

      let status = response.status();
      if status == StatusCode::TOO_MANY_REQUESTS {
         return Err(AttemptError::RateLimited);
      }
      if status.is_server_error() {
         return Err(AttemptError::Server(status.as_u16()));
      }
      if !status.is_success() {
         return Err(AttemptError::Client(status.as_u16()));
      }

      // Truncating create: a retry never appends to a previous attempt's bytes.
      let mut file = tokio::fs::File::create(path)
         .await
         .map_err(|e| AttemptError::Io(e.to_string()))?;
      let mut written = 0u64;
      while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
         file
            .write_all(&chunk)
            .await
            .map_err(|e| AttemptError::Io(e.to_string()))?;
         written += chunk.len() as u64;
      }
      file
         .flush()
         .await
         .map_err(|e| AttemptError::Io(e.to_string()))?;
      Ok(written)
   }
}

fn classify_error(e: reqwest::Error) -> AttemptError {
   if e.is_timeout() {
      AttemptError::Timeout
   } else {
      AttemptError::Connection(e.to_string())
   }
}

/// Pick a safe local file name for a download.
pub fn local_file_name(url: &str, filename: Option<&str>) -> String {
   let from_url = || {
      url::Url::parse(url)
         .ok()
         .and_then(|u| {
            u.path_segments()
               .and_then(|mut segments| segments.next_back().map(str::to_string))
         })
         .filter(|segment| !segment.is_empty())
   };
   let raw = filename
      .map(str::to_string)
      .filter(|f| !f.is_empty())
      .or_else(from_url)
      .unwrap_or_else(|| "download".to_string());

   let cleaned: String = raw
      .chars()
      .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
      .collect();
   match cleaned.as_str() {
      "." | ".." => "download".to_string(),
      _ => cleaned,
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn backoff_doubles_without_jitter() {
      let policy = RetryPolicy {
         base_delay: Duration::from_millis(100),
         jitter: Duration::ZERO,
         ..RetryPolicy::default()
      };
      assert_eq!(policy.backoff(1), Duration::from_millis(200));
      assert_eq!(policy.backoff(2), Duration::from_millis(400));
   }

   #[test]
   fn jitter_stays_below_bound() {
      let policy = RetryPolicy {
         base_delay: Duration::from_millis(10),
         jitter: Duration::from_millis(50),
         ..RetryPolicy::default()
      };
      for _ in 0..100 {
         let delay = policy.backoff(1);
         assert!(delay >= Duration::from_millis(20));
         assert!(delay < Duration::from_millis(70));
      }
   }

   #[test]
   fn file_name_prefers_explicit_name() {
      assert_eq!(
         local_file_name("https://x.org/p/1/download", Some("arc.tar.xz")),
         "arc.tar.xz"
      );
      assert_eq!(
         local_file_name("https://x.org/files/Nordic.tar.gz?dl=1", None),
         "Nordic.tar.gz"
      );
      assert_eq!(local_file_name("https://x.org/", None), "download");
      assert_eq!(local_file_name("https://x.org/a", Some("../../etc/x")), ".._.._etc_x");
   }

   #[test]
   fn only_client_errors_stop_retries() {
      assert!(AttemptError::RateLimited.is_retryable());
      assert!(AttemptError::Server(503).is_retryable());
      assert!(AttemptError::Timeout.is_retryable());
      assert!(!AttemptError::Client(404).is_retryable());
   }
}
