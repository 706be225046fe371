// src/store.rs
// Typed boundary over the Spin key-value store.
// Reputation counters and block flags live here; TTL is emulated with
// absolute expiry timestamps stored inside each record.

use spin_sdk::key_value::Store;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()>;
    fn delete(&self, key: &str) -> Result<(), ()>;
}

impl KeyValueStore for Store {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        Store::get(self, key).map_err(|_| ())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        Store::set(self, key, value).map_err(|_| ())
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        Store::delete(self, key).map_err(|_| ())
    }
}

/// Opens the default store, or reports the outage so the caller can apply
/// the configured fail-open/fail-closed policy.
pub(crate) fn open_default() -> Option<Store> {
    match Store::open_default() {
        Ok(store) => Some(store),
        Err(_e) => None,
    }
}
