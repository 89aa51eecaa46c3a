//! Process-wide cache of baked shader pairs.
//!
//! The cache is bounded at [`CACHE_CAPACITY`] entries. Inserting past the
//! bound evicts one arbitrary resident entry; eviction is deliberately not
//! LRU. Every read, insert and eviction happens under one mutex, and the lock
//! is held across compilation so a background warmer and the render thread
//! never bake the same key twice.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Instant,
};

use crate::error::{CompositorError, CompositorResult};

use super::{
    bake::{CompiledModule, bake},
    reflect::ShaderInterface,
    source::{ShaderSource, SourceIdentity},
};

pub const CACHE_CAPACITY: usize = 64;

/// NUL never appears in a file path.
const KEY_DELIMITER: char = '\0';

/// Composite key: vertex path, vertex mtime, fragment path, fragment mtime.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(vertex: &SourceIdentity, fragment: &SourceIdentity) -> Self {
        let (vertex_path, vertex_mtime) = vertex.key_components();
        let (fragment_path, fragment_mtime) = fragment.key_components();
        let d = KEY_DELIMITER;
        CacheKey(format!(
            "{vertex_path}{d}{vertex_mtime}{d}{fragment_path}{d}{fragment_mtime}"
        ))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(KEY_DELIMITER)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.components()).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self.components() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// A baked vertex + fragment pair.
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    vertex: Arc<CompiledModule>,
    fragment: Arc<CompiledModule>,
}

impl CacheEntry {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn vertex(&self) -> &Arc<CompiledModule> {
        &self.vertex
    }

    pub fn fragment(&self) -> &Arc<CompiledModule> {
        &self.fragment
    }

    pub fn interface(&self) -> ShaderInterface {
        self.vertex.interface().merge(*self.fragment.interface())
    }

    /// Verify the pair can be bound against a parameter block of
    /// `block_size` bytes and return the merged interface.
    pub fn bindable_interface(&self, block_size: u32) -> CompositorResult<ShaderInterface> {
        let issues: Vec<&str> = self
            .vertex
            .interface_issues()
            .iter()
            .chain(self.fragment.interface_issues())
            .map(String::as_str)
            .collect();
        if !issues.is_empty() {
            return Err(CompositorError::mismatch(issues.join("; ")));
        }
        let interface = self.interface();
        interface.check_bindable(block_size)?;
        Ok(interface)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<CacheEntry>>,
    stats: CacheStats,
}

pub struct ShaderModuleCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl Default for ShaderModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShaderModuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderModuleCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ShaderModuleCache {
    /// A standalone cache, independent of [`ShaderModuleCache::global`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: CACHE_CAPACITY,
        }
    }

    /// The cache shared by every compositor in the process.
    pub fn global() -> Arc<ShaderModuleCache> {
        static GLOBAL: OnceLock<Arc<ShaderModuleCache>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ShaderModuleCache::new())).clone()
    }

    /// Return the cached pair for these sources, baking it on a miss.
    pub fn bake_or_fetch(
        &self,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
    ) -> CompositorResult<Arc<CacheEntry>> {
        let key = CacheKey::new(vertex.identity(), fragment.identity());
        let mut state = self.lock();

        if let Some(entry) = state.entries.get(&key).cloned() {
            state.stats.hits += 1;
            tracing::trace!(key = %key, "shader cache hit");
            return Ok(entry);
        }
        state.stats.misses += 1;

        let started = Instant::now();
        let vertex_module = bake(vertex)?;
        let fragment_module = bake(fragment)?;
        tracing::info!(
            vertex = %vertex.identity(),
            fragment = %fragment.identity(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "baked shader pair"
        );

        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            vertex: Arc::new(vertex_module),
            fragment: Arc::new(fragment_module),
        });
        if let Some(evicted) = insert_bounded(&mut state.entries, self.capacity, key, entry.clone())
        {
            state.stats.evictions += 1;
            tracing::debug!(key = %evicted, "evicted shader cache entry");
        }
        Ok(entry)
    }

    pub fn contains(&self, vertex: &SourceIdentity, fragment: &SourceIdentity) -> bool {
        self.lock()
            .entries
            .contains_key(&CacheKey::new(vertex, fragment))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Insert `value`, evicting one arbitrary other entry first when the map is
/// full. Returns the evicted key.
fn insert_bounded<K, V>(map: &mut HashMap<K, V>, capacity: usize, key: K, value: V) -> Option<K>
where
    K: Eq + Hash + Clone,
{
    let mut evicted = None;
    if !map.contains_key(&key) && map.len() >= capacity {
        if let Some(victim) = map.keys().next().cloned() {
            map.remove(&victim);
            evicted = Some(victim);
        }
    }
    map.insert(key, value);
    evicted
}
