//! In-memory register image
//!
//! Stands in for a PLC in simulation mode and in tests. Every transport
//! created from one [`RegisterImage`] sees the same registers, so a test can
//! flip the PLC side (`req`, counters, measured values) and observe what the
//! engine wrote back. Failure injection covers refused connects, dropped
//! connections and failing reads/writes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LinkTarget, RegisterTransport, TransportError, TransportFactory};
use crate::link::codec::{self, RawValue, RegisterValue};

#[derive(Debug, Default)]
struct ImageState {
    bits: HashMap<String, bool>,
    words: HashMap<String, Vec<u16>>,
    offline: bool,
    failing_connects: u32,
    connect_attempts: u32,
    connect_delay: Duration,
    failing_reads: u32,
    failing_writes: u32,
    protected: HashSet<String>,
    rejected: HashSet<String>,
    bit_writes: Vec<(String, bool)>,
}

/// Shared register image backing one or more [`MemoryTransport`]s
#[derive(Debug, Clone, Default)]
pub struct RegisterImage {
    state: Arc<Mutex<ImageState>>,
}

impl RegisterImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory producing transports bound to this image
    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        let image = self.clone();
        Arc::new(move || Box::new(MemoryTransport::new(image.clone())) as Box<dyn RegisterTransport>)
    }

    pub fn set_bit(&self, address: &str, value: bool) {
        self.state.lock().bits.insert(address.to_string(), value);
    }

    pub fn bit(&self, address: &str) -> bool {
        self.state.lock().bits.get(address).copied().unwrap_or(false)
    }

    /// Store a typed value the way the codec would encode it
    pub fn set<T: RegisterValue>(&self, address: &str, value: T) {
        let mut state = self.state.lock();
        match value.encode() {
            RawValue::Bit(b) => {
                state.bits.insert(address.to_string(), b);
            },
            RawValue::Words(w) => {
                state.words.insert(address.to_string(), w);
            },
        }
    }

    pub fn set_string(&self, address: &str, value: &str, len: u16) {
        self.state
            .lock()
            .words
            .insert(address.to_string(), codec::encode_string(value, len));
    }

    pub fn words(&self, address: &str) -> Vec<u16> {
        self.state
            .lock()
            .words
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Every bit write seen so far, in order
    pub fn bit_writes(&self) -> Vec<(String, bool)> {
        self.state.lock().bit_writes.clone()
    }

    pub fn clear_bit_writes(&self) {
        self.state.lock().bit_writes.clear();
    }

    /// Writes to this address are accepted but not stored, like a PLC-owned register
    pub fn protect(&self, address: &str) {
        self.state.lock().protected.insert(address.to_string());
    }

    /// Reads and writes of this address get an exception response; the connection stays up
    pub fn reject(&self, address: &str) {
        self.state.lock().rejected.insert(address.to_string());
    }

    /// Simulate the PLC going away (true) or coming back (false)
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// The next `n` connect attempts are refused
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().failing_connects = n;
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().failing_reads = n;
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().failing_writes = n;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }
}

/// Transport over a [`RegisterImage`]
#[derive(Debug)]
pub struct MemoryTransport {
    image: RegisterImage,
    connected: bool,
}

impl MemoryTransport {
    pub fn new(image: RegisterImage) -> Self {
        Self {
            image,
            connected: false,
        }
    }

    fn check_read(&mut self, address: &str) -> Result<(), TransportError> {
        self.check_online()?;
        let mut state = self.image.state.lock();
        if state.rejected.contains(address) {
            return Err(TransportError::protocol(format!(
                "read {address}: exception IllegalDataAddress"
            )));
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(TransportError::connection("injected read failure"));
        }
        Ok(())
    }

    fn check_write(&mut self, address: &str) -> Result<(), TransportError> {
        self.check_online()?;
        let mut state = self.image.state.lock();
        if state.rejected.contains(address) {
            return Err(TransportError::protocol(format!(
                "write {address}: exception IllegalDataAddress"
            )));
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TransportError::connection("injected write failure"));
        }
        Ok(())
    }

    fn check_online(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::connection("not connected"));
        }
        if self.image.state.lock().offline {
            self.connected = false;
            return Err(TransportError::connection("Connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl RegisterTransport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&mut self, target: &LinkTarget) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.image.state.lock();
            state.connect_attempts += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.image.state.lock();
        if state.offline {
            return Err(TransportError::connection(format!("{target}: Connection refused")));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::connection(format!("{target}: Connection refused")));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    async fn read_bit(&mut self, address: &str) -> Result<bool, TransportError> {
        self.check_read(address)?;
        Ok(self.image.bit(address))
    }

    async fn write_bit(&mut self, address: &str, value: bool) -> Result<(), TransportError> {
        self.check_write(address)?;
        let mut state = self.image.state.lock();
        state.bit_writes.push((address.to_string(), value));
        if !state.protected.contains(address) {
            state.bits.insert(address.to_string(), value);
        }
        Ok(())
    }

    async fn read_words(&mut self, address: &str, count: u16) -> Result<Vec<u16>, TransportError> {
        self.check_read(address)?;
        let mut words = self.image.words(address);
        words.resize(count as usize, 0);
        Ok(words)
    }

    async fn write_words(&mut self, address: &str, words: &[u16]) -> Result<(), TransportError> {
        self.check_write(address)?;
        let mut state = self.image.state.lock();
        if !state.protected.contains(address) {
            state.words.insert(address.to_string(), words.to_vec());
        }
        Ok(())
    }
}
