//! Per-type object pools with a process-wide registry.
//!
//! A [`Pool<T>`] hands out zeroed boxes and takes them back, zeroing again on
//! the way in so a pooled value never leaks state between users. Pools are
//! registered once per payload type in a lock-protected global map (the one
//! permitted global in the crate) and looked up by type.
//!
//! [`ManagedPool`] is the scope-bound flavor: it tracks every outstanding
//! [`Pooled`] guard it hands out, so the owner of the scope can assert that
//! ending the scope reclaimed everything.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Anything a pool can hold. `Default` is the zero value used by both
/// `get` (fresh storage) and `put` (scrubbing).
pub trait Poolable: Any + Default + Send {}

impl<T: Any + Default + Send> Poolable for T {}

/// A typed pool of pre-allocated boxes.
pub struct Pool<T> {
  name: &'static str,
  free: Mutex<Vec<Box<T>>>,
  alloc_num: AtomicU64,
  get_num: AtomicU64,
  put_num: AtomicU64,
}

impl<T: Poolable> Pool<T> {
  fn new() -> Self {
    Pool {
      name: type_name::<T>(),
      free: Mutex::new(Vec::new()),
      alloc_num: AtomicU64::new(0),
      get_num: AtomicU64::new(0),
      put_num: AtomicU64::new(0),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Take a zeroed value out of the pool, allocating if it is empty.
  pub fn get(&self) -> Box<T> {
    self.get_num.fetch_add(1, Ordering::Relaxed);
    let recycled = self.free.lock().unwrap().pop();
    match recycled {
      Some(b) => b,
      None => {
        self.alloc_num.fetch_add(1, Ordering::Relaxed);
        Box::new(T::default())
      }
    }
  }

  /// Return a value to the pool. The payload is zeroed before it becomes
  /// available again.
  pub fn put(&self, mut value: Box<T>) {
    *value = T::default();
    self.put_num.fetch_add(1, Ordering::Relaxed);
    self.free.lock().unwrap().push(value);
  }

  pub fn total_alloc(&self) -> u64 {
    self.alloc_num.load(Ordering::Relaxed)
  }

  pub fn total_get(&self) -> u64 {
    self.get_num.load(Ordering::Relaxed)
  }

  pub fn total_put(&self) -> u64 {
    self.put_num.load(Ordering::Relaxed)
  }
}

/// Observability snapshot of one pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
  pub name: &'static str,
  pub total_alloc: u64,
  pub total_get: u64,
  pub total_put: u64,
}

trait AnyPool: Send + Sync {
  fn stats(&self) -> PoolStats;
}

impl<T: Poolable> AnyPool for Pool<T> {
  fn stats(&self) -> PoolStats {
    PoolStats {
      name: self.name,
      total_alloc: self.total_alloc(),
      total_get: self.total_get(),
      total_put: self.total_put(),
    }
  }
}

/// The same pool under two vtables: `typed` for lookup, `stats` for
/// enumeration.
struct RegisteredPool {
  typed: Arc<dyn Any + Send + Sync>,
  stats: Arc<dyn AnyPool>,
}

struct Registry {
  pools: RwLock<HashMap<TypeId, RegisteredPool>>,
}

fn registry() -> &'static Registry {
  static REGISTRY: OnceLock<Registry> = OnceLock::new();
  REGISTRY.get_or_init(|| Registry {
    pools: RwLock::new(HashMap::new()),
  })
}

/// Look up (declaring on first use) the process-wide pool for `T`.
pub fn pool_of<T: Poolable>() -> Arc<Pool<T>> {
  let tid = TypeId::of::<T>();

  if let Some(entry) = registry().pools.read().unwrap().get(&tid) {
    return downcast_pool(entry);
  }

  let mut pools = registry().pools.write().unwrap();
  let entry = pools.entry(tid).or_insert_with(|| {
    let pool = Arc::new(Pool::<T>::new());
    RegisteredPool {
      typed: pool.clone(),
      stats: pool,
    }
  });
  downcast_pool(entry)
}

fn downcast_pool<T: Poolable>(entry: &RegisteredPool) -> Arc<Pool<T>> {
  entry
    .typed
    .clone()
    .downcast::<Pool<T>>()
    .unwrap_or_else(|_| {
      unreachable!("pool registry entry has the wrong payload type")
    })
}

/// Stats for every pool declared so far.
pub fn all_pool_stats() -> Vec<PoolStats> {
  registry()
    .pools
    .read()
    .unwrap()
    .values()
    .map(|p| p.stats.stats())
    .collect()
}

/// A pooled value that returns itself on drop.
pub struct Pooled<T: Poolable> {
  pool: Arc<Pool<T>>,
  value: Option<Box<T>>,
  outstanding: Option<Arc<AtomicU64>>,
}

impl<T: Poolable> Pooled<T> {
  /// Detach the payload from the pool; it will be dropped normally instead
  /// of being recycled.
  pub fn into_inner(mut self) -> Box<T> {
    if let Some(counter) = self.outstanding.take() {
      counter.fetch_sub(1, Ordering::Relaxed);
    }
    self.value.take().expect("pooled value already returned")
  }
}

impl<T: Poolable> Deref for Pooled<T> {
  type Target = T;

  fn deref(&self) -> &T {
    self.value.as_ref().expect("pooled value already returned")
  }
}

impl<T: Poolable> DerefMut for Pooled<T> {
  fn deref_mut(&mut self) -> &mut T {
    self.value.as_mut().expect("pooled value already returned")
  }
}

impl<T: Poolable> Drop for Pooled<T> {
  fn drop(&mut self) {
    if let Some(counter) = self.outstanding.take() {
      counter.fetch_sub(1, Ordering::Relaxed);
    }
    if let Some(value) = self.value.take() {
      self.pool.put(value);
    }
  }
}

/// A scope-bound handle onto a pool.
///
/// Every `get` is tracked; when the scope that owns the handle ends, the
/// outstanding count tells it whether all pooled values made it back. The
/// guards themselves return their payloads on drop, so "bulk release at
/// scope end" falls out of ownership rather than bookkeeping.
pub struct ManagedPool<T: Poolable> {
  pool: Arc<Pool<T>>,
  outstanding: Arc<AtomicU64>,
}

impl<T: Poolable> ManagedPool<T> {
  pub fn new() -> Self {
    ManagedPool {
      pool: pool_of::<T>(),
      outstanding: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn get(&self) -> Pooled<T> {
    self.outstanding.fetch_add(1, Ordering::Relaxed);
    Pooled {
      value: Some(self.pool.get()),
      pool: self.pool.clone(),
      outstanding: Some(self.outstanding.clone()),
    }
  }

  /// Guards handed out by this handle that have not yet been dropped.
  pub fn outstanding(&self) -> u64 {
    self.outstanding.load(Ordering::Relaxed)
  }

  pub fn stats(&self) -> PoolStats {
    PoolStats {
      name: self.pool.name(),
      total_alloc: self.pool.total_alloc(),
      total_get: self.pool.total_get(),
      total_put: self.pool.total_put(),
    }
  }
}

impl<T: Poolable> Default for ManagedPool<T> {
  fn default() -> Self {
    Self::new()
  }
}
