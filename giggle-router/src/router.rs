//! Address-keyed demultiplexer between the OSC listener and the zones.
//!
//! Built single-threaded at startup, then frozen behind an `Arc` and only read
//! by the listener task.

use crate::models::ValueType;
use rosc::OscType;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("address {address} registered as {existing} and again as {requested}")]
    ConflictingType { address: String, existing: ValueType, requested: ValueType },
}

/// Publishes an inbound address to whatever discovery mechanism is running.
pub trait Announcer: Send + Sync {
    fn announce(&self, address: &str, value_type: ValueType);
}

pub type Handler = Arc<dyn Fn(&OscType) + Send + Sync>;

struct Endpoint {
    value_type: ValueType,
    handlers: Vec<Handler>,
}

pub struct Router {
    endpoints: HashMap<String, Endpoint>,
    announcer: Arc<dyn Announcer>,
}

impl Router {
    pub fn new(announcer: Arc<dyn Announcer>) -> Self {
        Self { endpoints: HashMap::new(), announcer }
    }

    /// Registers `address` with the announcer the first time it is seen.
    pub fn register_endpoint(
        &mut self,
        address: &str,
        value_type: ValueType,
    ) -> Result<(), RouterError> {
        if let Some(existing) = self.endpoints.get(address) {
            if existing.value_type != value_type {
                return Err(RouterError::ConflictingType {
                    address: address.to_string(),
                    existing: existing.value_type,
                    requested: value_type,
                });
            }
            return Ok(());
        }
        self.announcer.announce(address, value_type);
        self.endpoints.insert(address.to_string(), Endpoint { value_type, handlers: Vec::new() });
        info!(address, %value_type, "registered endpoint");
        Ok(())
    }

    /// Appends a handler; the address must already be registered.
    pub fn attach(&mut self, address: &str, handler: Handler) {
        match self.endpoints.get_mut(address) {
            Some(endpoint) => endpoint.handlers.push(handler),
            None => debug!(address, "attach on unregistered address ignored"),
        }
    }

    pub fn add_endpoint(
        &mut self,
        address: &str,
        value_type: ValueType,
        handler: Handler,
    ) -> Result<(), RouterError> {
        self.register_endpoint(address, value_type)?;
        self.attach(address, handler);
        Ok(())
    }

    /// Runs every handler attached to `address`, in attachment order.
    /// Returns how many handlers ran.
    pub fn dispatch(&self, address: &str, value: &OscType) -> usize {
        let Some(endpoint) = self.endpoints.get(address) else {
            return 0;
        };
        for handler in &endpoint.handlers {
            handler(value);
        }
        endpoint.handlers.len()
    }

    pub fn addresses(&self) -> Vec<(String, ValueType)> {
        let mut out: Vec<_> =
            self.endpoints.iter().map(|(a, e)| (a.clone(), e.value_type)).collect();
        out.sort();
        out
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingAnnouncer {
        pub announced: Mutex<Vec<(String, ValueType)>>,
    }

    impl Announcer for RecordingAnnouncer {
        fn announce(&self, address: &str, value_type: ValueType) {
            self.announced.lock().push((address.to_string(), value_type));
        }
    }
}
