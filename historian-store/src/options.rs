use std::time::Duration;

/// How a [`Store`](crate::Store) opens its database file.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long to wait for a lock held by another store or connection before
    /// giving up.
    pub busy_timeout: Duration,
    /// Hold `<database>.lock` for the lifetime of the store so no other store,
    /// in this process or another, can open the same file.
    pub exclusive: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            busy_timeout: Duration::from_millis(1000),
            exclusive: true,
        }
    }
}

impl StoreOptions {
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}
