use lazy_static::lazy_static;
use std::{
   collections::HashMap,
   path::{Path, PathBuf},
   sync::{Arc, Mutex},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

lazy_static! {
   static ref PATH_LOCKS: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>> =
      Mutex::new(HashMap::new());
}

/// Exclusive access to one filesystem path across every task in the process.
///
/// Locks nobody holds or waits on are dropped from the registry on each call.
pub async fn lock_path(path: &Path) -> OwnedMutexGuard<()> {
   let lock = {
      let mut locks = PATH_LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
      locks.retain(|_, lock| Arc::strong_count(lock) > 1);
      locks
         .entry(path.to_path_buf())
         .or_insert_with(|| Arc::new(AsyncMutex::new(())))
         .clone()
   };
   lock.lock_owned().await
}

#[cfg(test)]
fn is_registered(path: &Path) -> bool {
   PATH_LOCKS
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .contains_key(path)
}
