//! Compiled-shader cache keyed by program identity and thread-group shape.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dxcompute_hlsl::{ResourceBinding, ShaderReflection};
use hashbrown::HashMap;
use tracing::debug;
use xxhash_rust::xxh32::xxh32;

use crate::compute::ThreadGroupSize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Map where each key's value is produced at most once, even under concurrent callers.
///
/// The map lock is held only to find or create a key's slot. Each slot has its own lock, held for
/// the duration of the initializer, so callers for the same key wait for the first one while
/// different keys initialize in parallel. A failed initializer leaves the slot empty and the next
/// caller retries.
pub(crate) struct OnceCache<K, V> {
    slots: Mutex<HashMap<K, Arc<Mutex<Option<V>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Default for OnceCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> OnceCache<K, V> {
    pub(crate) fn get_or_try_insert<E>(
        &self,
        key: &K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut value = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = value.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(existing.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let created = init()?;
        *value = Some(created.clone());
        Ok(created)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let slots: Vec<_> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        // Slots are inspected outside the map lock; a slot mid-initialization is not counted.
        let entries = slots
            .iter()
            .filter(|slot| slot.try_lock().is_ok_and(|value| value.is_some()))
            .count();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Process-local identity of a program's HLSL template.
///
/// Equal templates share an identity and distinct templates never do, however their content
/// hashes compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderIdentity(pub u32);

#[derive(Default)]
struct IdentityTable {
    /// Interned templates bucketed by their xxh32.
    buckets: HashMap<u32, Vec<(Box<str>, ShaderIdentity)>>,
    next: u32,
}

fn identity_table() -> &'static Mutex<IdentityTable> {
    static TABLE: OnceLock<Mutex<IdentityTable>> = OnceLock::new();
    TABLE.get_or_init(Default::default)
}

impl ShaderIdentity {
    /// Interns `template`, handing out the next free identity the first time a text is seen.
    pub fn of_source(template: &str) -> Self {
        let mut table = identity_table()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let IdentityTable { buckets, next } = &mut *table;
        let bucket = buckets.entry(xxh32(template.as_bytes(), 0)).or_default();
        if let Some((_, identity)) = bucket.iter().find(|(text, _)| &**text == template) {
            return *identity;
        }
        let identity = ShaderIdentity(*next);
        *next += 1;
        bucket.push((template.into(), identity));
        identity
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub identity: ShaderIdentity,
    pub threads_x: u32,
    pub threads_y: u32,
    pub threads_z: u32,
}

impl ShaderKey {
    pub fn new(identity: ShaderIdentity, threads: ThreadGroupSize) -> Self {
        Self {
            identity,
            threads_x: threads.x(),
            threads_y: threads.y(),
            threads_z: threads.z(),
        }
    }
}

/// Root parameter holding the constant buffer as 32-bit root constants.
pub const CONSTANTS_ROOT_INDEX: u32 = 0;

/// Binding metadata of one compiled program.
///
/// Root signature layout: parameter [`CONSTANTS_ROOT_INDEX`] carries the constants, followed by
/// one single-descriptor table per resource in binding order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderLoader {
    resources: Vec<ResourceBinding>,
    constant_bytes: u32,
    threads: ThreadGroupSize,
}

impl ShaderLoader {
    pub fn new(reflection: &ShaderReflection, threads: ThreadGroupSize) -> Self {
        Self {
            resources: reflection.resources.clone(),
            constant_bytes: reflection.constants.size_bytes(),
            threads,
        }
    }

    pub fn resources(&self) -> &[ResourceBinding] {
        &self.resources
    }

    pub fn constant_bytes(&self) -> u32 {
        self.constant_bytes
    }

    pub fn constant_words(&self) -> u32 {
        self.constant_bytes.div_ceil(4)
    }

    pub fn threads(&self) -> ThreadGroupSize {
        self.threads
    }

    pub fn resource_root_index(&self, binding: usize) -> u32 {
        CONSTANTS_ROOT_INDEX + 1 + binding as u32
    }

    pub fn root_parameter_count(&self) -> u32 {
        1 + self.resources.len() as u32
    }
}

#[derive(Debug)]
pub struct CachedShader {
    loader: ShaderLoader,
    bytecode: Arc<[u8]>,
}

impl CachedShader {
    pub fn new(loader: ShaderLoader, bytecode: impl Into<Arc<[u8]>>) -> Self {
        Self {
            loader,
            bytecode: bytecode.into(),
        }
    }

    pub fn loader(&self) -> &ShaderLoader {
        &self.loader
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }
}

/// Process-wide store of compiled programs. Entries are never evicted.
#[derive(Default)]
pub struct ShaderCache {
    shaders: OnceCache<ShaderKey, Arc<CachedShader>>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shader for `key`, running `compile` only if no earlier call produced one.
    ///
    /// Concurrent callers for the same key block until the first compile finishes and then share
    /// its result. A failed compile is not stored.
    pub fn get_or_add<E>(
        &self,
        key: ShaderKey,
        compile: impl FnOnce() -> Result<CachedShader, E>,
    ) -> Result<Arc<CachedShader>, E> {
        self.shaders.get_or_try_insert(&key, || {
            let shader = compile()?;
            debug!(
                identity = key.identity.0,
                threads_x = key.threads_x,
                threads_y = key.threads_y,
                threads_z = key.threads_z,
                bytecode_len = shader.bytecode.len(),
                "compiled shader"
            );
            Ok(Arc::new(shader))
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.shaders.stats()
    }
}
