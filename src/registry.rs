//! Lazy converter registry.
//!
//! Each format pair is registered as a descriptor plus an async factory.
//! Nothing is built until [`ConverterRegistry::get_converter`] is first asked
//! for that pair; the result is then cached for the life of the registry.
//!
//! Loading is single-flight: concurrent first requests for one pair await
//! the same initialisation. A factory failure does not surface as an error
//! from the lookup. It is cached as a failed [`Converter`] whose `convert`
//! always returns the root cause, so every call site fails the same way and
//! the broken load is not retried. [`ConverterRegistry::reset`] is the only
//! way to force a reload.

use crate::context::EngineContext;
use crate::converter::{Converter, ConverterDescriptor, Transform};
use crate::error::ConverterError;
use crate::format::ImageFormat;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub type TransformFuture = BoxFuture<'static, Result<Arc<dyn Transform>, ConverterError>>;

/// Builds the transform for one pair on first use.
pub type TransformFactory = Arc<dyn Fn(Arc<EngineContext>) -> TransformFuture + Send + Sync>;

type PairKey = (ImageFormat, ImageFormat);

struct Entry {
    descriptor: ConverterDescriptor,
    factory: TransformFactory,
}

pub struct ConverterRegistry {
    ctx: Arc<EngineContext>,
    entries: RwLock<BTreeMap<PairKey, Entry>>,
    cache: Mutex<HashMap<PairKey, Arc<OnceCell<Arc<Converter>>>>>,
    loads: AtomicUsize,
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("registered", &self.len())
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

impl ConverterRegistry {
    /// An empty registry. See [`crate::converters::register_builtin`].
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            entries: RwLock::new(BTreeMap::new()),
            cache: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Register (or replace) the factory for `descriptor`'s pair. Replacing
    /// a pair drops any converter already cached for it.
    pub fn register(&self, descriptor: ConverterDescriptor, factory: TransformFactory) {
        let key = (descriptor.from, descriptor.to);
        debug!("registering {}", descriptor.name);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Entry { descriptor, factory });
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
    }

    /// Convenience for factories that build a transform synchronously.
    pub fn register_with<F, T>(&self, descriptor: ConverterDescriptor, build: F)
    where
        F: Fn(Arc<EngineContext>) -> Result<T, ConverterError> + Send + Sync + 'static,
        T: Transform + 'static,
    {
        let build = Arc::new(build);
        self.register(
            descriptor,
            Arc::new(move |ctx: Arc<EngineContext>| {
                let build = Arc::clone(&build);
                Box::pin(async move { build(ctx).map(|t| Arc::new(t) as Arc<dyn Transform>) })
                    as TransformFuture
            }),
        );
    }

    // ── Lookup ───────────────────────────────────────────────────────────

    /// Resolve `from → to`, loading it on first use.
    ///
    /// `None` means the pair is not registered. A pair whose load failed
    /// still returns `Some`; its converter reports the failure on every call.
    pub async fn get_converter(&self, from: ImageFormat, to: ImageFormat) -> Option<Arc<Converter>> {
        let key = (from, to);
        let (descriptor, factory) = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let entry = entries.get(&key)?;
            (entry.descriptor.clone(), Arc::clone(&entry.factory))
        };
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cache.entry(key).or_default())
        };
        let converter = cell
            .get_or_init(|| async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                debug!("loading converter {}", descriptor.name);
                let ctx = Arc::clone(&self.ctx);
                match factory(Arc::clone(&ctx)).await {
                    Ok(transform) => Arc::new(Converter::new(descriptor, transform, ctx)),
                    Err(e) => {
                        warn!("converter {} failed to load: {e}", descriptor.name);
                        let error = ConverterError::conversion_with_code(
                            format!("Failed to load converter: {e}"),
                            "LIBRARY_LOAD_FAILED",
                        );
                        Arc::new(Converter::failed(descriptor, error, ctx))
                    }
                }
            })
            .await;
        Some(Arc::clone(converter))
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn is_registered(&self, from: ImageFormat, to: ImageFormat) -> bool {
        self.read(|e| e.contains_key(&(from, to)))
    }

    pub fn descriptor(&self, from: ImageFormat, to: ImageFormat) -> Option<ConverterDescriptor> {
        self.read(|e| e.get(&(from, to)).map(|x| x.descriptor.clone()))
    }

    /// Registered pair names (`"svg-to-png"`, …), sorted by pair.
    pub fn list_available(&self) -> Vec<String> {
        self.filtered(|_| true).into_iter().map(|d| d.name).collect()
    }

    pub fn list_descriptors(&self) -> Vec<ConverterDescriptor> {
        self.filtered(|_| true)
    }

    pub fn converters_from(&self, from: ImageFormat) -> Vec<ConverterDescriptor> {
        self.filtered(|d| d.from == from)
    }

    pub fn converters_to(&self, to: ImageFormat) -> Vec<ConverterDescriptor> {
        self.filtered(|d| d.to == to)
    }

    pub fn local_converters(&self) -> Vec<ConverterDescriptor> {
        self.filtered(|d| d.is_client_side)
    }

    pub fn remote_converters(&self) -> Vec<ConverterDescriptor> {
        self.filtered(|d| !d.is_client_side)
    }

    pub fn len(&self) -> usize {
        self.read(|e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of factory invocations so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Drop every cached converter (loaded or failed). Registrations stay.
    pub fn reset(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<PairKey, Entry>) -> R) -> R {
        f(&self.entries.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn filtered(&self, keep: impl Fn(&ConverterDescriptor) -> bool) -> Vec<ConverterDescriptor> {
        self.read(|entries| {
            entries
                .values()
                .map(|e| &e.descriptor)
                .filter(|d| keep(d))
                .cloned()
                .collect()
        })
    }
}
