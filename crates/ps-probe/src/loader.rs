//! At-most-once probe table loading.
//!
//! The table is loaded on first access and shared as an immutable
//! `Arc<ProbeTable>` for the rest of the process. Concurrent first callers
//! block on the load instead of racing it.

use crate::table::ProbeTable;
use ps_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

type LoadFn = dyn Fn() -> Result<ProbeTable> + Send + Sync;

/// Lazily loads a [`ProbeTable`] exactly once.
pub struct TableLoader {
    source: String,
    load: Box<LoadFn>,
    table: OnceLock<Arc<ProbeTable>>,
    lock: Mutex<()>,
    loads: AtomicUsize,
}

impl std::fmt::Debug for TableLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLoader")
            .field("source", &self.source)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl TableLoader {
    /// Loader for a table file (JSON or Parquet, by extension).
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path: PathBuf = path.as_ref().to_path_buf();
        let source = path.display().to_string();
        Self::new(source, move || crate::io::read_table(&path))
    }

    /// Loader around an arbitrary load function; `source` names it in logs.
    pub fn new<F>(source: impl Into<String>, load: F) -> Self
    where
        F: Fn() -> Result<ProbeTable> + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            load: Box::new(load),
            table: OnceLock::new(),
            lock: Mutex::new(()),
            loads: AtomicUsize::new(0),
        }
    }

    /// The shared table, loading it on first call.
    ///
    /// A failed load is returned to the caller and leaves the loader empty, so
    /// the next call tries again.
    pub fn get(&self) -> Result<Arc<ProbeTable>> {
        if let Some(t) = self.table.get() {
            return Ok(Arc::clone(t));
        }
        let _guard =
            self.lock.lock().map_err(|_| Error::Computation("table loader lock poisoned".into()))?;
        if let Some(t) = self.table.get() {
            return Ok(Arc::clone(t));
        }
        tracing::info!(source = %self.source, "loading probe table");
        let table = Arc::new((self.load)()?);
        self.loads.fetch_add(1, Ordering::SeqCst);
        let (n_r, n_th, n_t) = table.shape();
        tracing::info!(r_bins = n_r, theta_bins = n_th, t_bins = n_t, "probe table loaded");
        let _ = self.table.set(Arc::clone(&table));
        Ok(table)
    }

    /// `true` once a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.table.get().is_some()
    }

    /// Number of successful loads (0 or 1).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::ProbeBinning;

    fn table() -> ProbeTable {
        let b = ProbeBinning::new(2, 2, 2, 100.0).unwrap();
        ProbeTable::new(b.clone(), vec![0.5; b.len()]).unwrap()
    }

    #[test]
    fn test_repeated_get_loads_once_and_shares() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let loader = TableLoader::new("mem", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(table())
        });
        assert!(!loader.is_loaded());
        let a = loader.get().unwrap();
        let b = loader.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.load_count(), 1);
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let loader = Arc::new(TableLoader::new("mem", move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(table())
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = Arc::clone(&loader);
                std::thread::spawn(move || l.get().unwrap())
            })
            .collect();
        let tables: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tables.iter().all(|t| Arc::ptr_eq(t, &tables[0])));
    }

    #[test]
    fn test_failed_load_is_reported_and_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let loader = TableLoader::new("flaky", move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Validation("truncated".into()))
            } else {
                Ok(table())
            }
        });
        assert!(loader.get().is_err());
        assert!(!loader.is_loaded());
        assert!(loader.get().is_ok());
        assert_eq!(loader.load_count(), 1);
    }
}
