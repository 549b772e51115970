mod themes;

pub use themes::{ApplyOutcome, InstalledListing, ThemeLoader};
