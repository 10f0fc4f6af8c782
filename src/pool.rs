use parking_lot::Mutex;

/// Capacity of the per-transport cancellation token pool.
pub const TOKEN_POOL_CAPACITY: usize = 10;
/// Capacity of the normalized error pool.
pub const ERROR_POOL_CAPACITY: usize = 20;

/// Bounded free-list of reusable objects.
///
/// Objects are reset when they are released, so anything handed out by
/// [`ResourcePool::acquire`] is already clean. Releasing into a full pool
/// drops the object.
pub struct ResourcePool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
    reset: fn(&mut T),
}

impl<T> ResourcePool<T> {
    /// `reset` runs on every object as it is released.
    pub fn new(capacity: usize, reset: fn(&mut T)) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            reset,
        }
    }

    /// Takes an idle object, if any.
    pub fn acquire(&self) -> Option<T> {
        self.items.lock().pop()
    }

    /// Takes an idle object or builds a new one.
    pub fn acquire_or_else(&self, make: impl FnOnce() -> T) -> T {
        self.acquire().unwrap_or_else(make)
    }

    /// Returns an object to the pool. Returns `false` when the pool was
    /// already full and the object was discarded.
    pub fn release(&self, mut item: T) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        (self.reset)(&mut item);
        items.push(item);
        true
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

impl<T> std::fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("idle", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
