//! Process-scoped cache for heavy converter dependencies.
//!
//! A dependency is loaded at most once per [`DependencyCache`]: concurrent
//! first callers share one in-flight initialisation, and later callers get
//! the cached value. A failed load is not cached, so the next call retries.
//! [`DependencyCache::reset`] drops everything (tests use it to observe a
//! cold start).

use crate::error::ConverterError;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// A value initialised once, shared by every caller.
pub struct LoadOnce<T> {
    cell: Mutex<Arc<OnceCell<Arc<T>>>>,
}

impl<T> Default for LoadOnce<T> {
    fn default() -> Self {
        Self {
            cell: Mutex::new(Arc::new(OnceCell::new())),
        }
    }
}

impl<T: Send + Sync + 'static> LoadOnce<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<OnceCell<Arc<T>>> {
        let guard = self.cell.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Return the cached value, running `load` if nothing is cached yet.
    pub async fn get_or_load<F, Fut, E>(&self, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.current();
        cell.get_or_try_init(|| async move { load().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().initialized()
    }

    /// Forget the cached value. In-flight loads finish into the old cell.
    pub fn reset(&self) {
        let mut guard = self.cell.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(OnceCell::new());
    }
}

#[cfg(feature = "vector")]
pub use resvg::usvg::fontdb::Database as FontDatabase;

/// Heavy dependencies shared by every converter of one engine.
#[derive(Default)]
pub struct DependencyCache {
    #[cfg(feature = "vector")]
    fonts: LoadOnce<FontDatabase>,
    loads: AtomicUsize,
}

impl std::fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCache")
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of loads actually performed (cache misses that succeeded or failed).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// The font database used when rasterising SVG text.
    ///
    /// Scanning system fonts touches the file system, so it runs on the
    /// blocking pool.
    #[cfg(feature = "vector")]
    pub async fn fonts(&self, load_system: bool) -> Result<Arc<FontDatabase>, ConverterError> {
        self.fonts
            .get_or_load(|| async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                tokio::task::spawn_blocking(move || {
                    let mut db = FontDatabase::new();
                    if load_system {
                        db.load_system_fonts();
                    }
                    tracing::debug!("font database ready: {} faces", db.len());
                    db
                })
                .await
                .map_err(|e| {
                    ConverterError::conversion_with_code(
                        format!("Font database task failed: {e}"),
                        "LIBRARY_LOAD_FAILED",
                    )
                })
            })
            .await
    }

    pub fn reset(&self) {
        #[cfg(feature = "vector")]
        self.fonts.reset();
    }
}
