use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};

/// Resolves a peer address to a live handle.
///
/// `LocalNaming` resolves inside one process; `TcpNaming` resolves `host:port` addresses.
pub trait Naming<T: ?Sized>: Send + Sync {
    fn lookup(&self, address: &str) -> Result<Arc<T>>;
}

/// In-process naming directory. Unbinding an address makes every later lookup fail,
/// which is how a crashed process looks to its peers.
pub struct LocalNaming<T: ?Sized> {
    directory: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> LocalNaming<T> {
    pub fn new() -> Self {
        Self { directory: RwLock::new(HashMap::new()) }
    }

    /// Binds a fresh address. Fails if something is already bound there.
    pub fn bind(&self, address: impl Into<String>, handle: Arc<T>) -> Result<()> {
        let address = address.into();
        let mut map = self.directory.write().unwrap_or_else(PoisonError::into_inner);

        if map.contains_key(&address) {
            return Err(Error::InvalidConfig(format!("address '{}' is already bound", address)));
        }

        map.insert(address, handle);
        Ok(())
    }

    pub fn rebind(&self, address: impl Into<String>, handle: Arc<T>) {
        let mut map = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(address.into(), handle);
    }

    pub fn unbind(&self, address: &str) -> bool {
        let mut map = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(address).is_some()
    }

    pub fn is_bound(&self, address: &str) -> bool {
        self.directory.read().unwrap_or_else(PoisonError::into_inner).contains_key(address)
    }
}

impl<T: ?Sized> Default for LocalNaming<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Send + Sync> Naming<T> for LocalNaming<T> {
    fn lookup(&self, address: &str) -> Result<Arc<T>> {
        let map = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        map.get(address).cloned().ok_or_else(|| Error::unreachable(address))
    }
}
