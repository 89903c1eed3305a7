//! Device link
//!
//! A [`DeviceLink`] owns the transport to one PLC. The transport sits behind a
//! `tokio::sync::Mutex`, so register I/O on one link is serialized by
//! construction; a [`LinkSession`] holds that lock for a whole station cycle.
//!
//! Failed operations only mark the link disconnected. Reconnecting is the
//! caller's decision through [`DeviceLink::try_reconnect`], which runs at most
//! one attempt loop at a time.

pub mod codec;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::transport::{
    LinkTarget, RegisterTransport, TransportError, TransportErrorKind, TransportFactory,
};
use codec::{RawValue, RegisterValue, Shape};

/// Connection parameters of one link
#[derive(Debug, Clone)]
pub struct LinkParams {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout: Duration,
    pub receive_timeout: Duration,
    pub max_reconnect_attempts: u32,
    /// Fixed pause between reconnect attempts
    pub reconnect_interval: Duration,
    pub auto_reconnect: bool,
}

impl LinkParams {
    pub fn target(&self) -> LinkTarget {
        LinkTarget {
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Link statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub reads: u64,
    pub writes: u64,
    pub failures: u64,
    pub reconnect_attempts: u64,
    pub successful_reconnects: u64,
    pub last_connected: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// One PLC connection shared by the stations wired to it
pub struct DeviceLink {
    params: LinkParams,
    factory: Arc<dyn TransportFactory>,
    transport: AsyncMutex<Box<dyn RegisterTransport>>,
    state: RwLock<ConnectionState>,
    reconnect_guard: AsyncMutex<()>,
    stats: Mutex<LinkStats>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("name", &self.params.name)
            .field("target", &self.params.target().to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceLink {
    pub fn new(params: LinkParams, factory: Arc<dyn TransportFactory>) -> Self {
        let transport = factory.create();
        Self {
            params,
            factory,
            transport: AsyncMutex::new(transport),
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_guard: AsyncMutex::new(()),
            stats: Mutex::new(LinkStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state() == ConnectionState::Reconnecting
    }

    pub fn stats(&self) -> LinkStats {
        *self.stats.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Connected -> Disconnected after a failed operation
    fn mark_failed(&self) {
        let mut state = self.state.write();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Disconnected;
            debug!("Link {} marked disconnected", self.params.name);
        }
        self.stats.lock().failures += 1;
    }

    /// Connect to the PLC; an existing connection is closed first.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let mut transport = self.transport.lock().await;
        let result = self.connect_locked(&mut transport).await;
        if result.is_err() {
            self.set_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn connect_locked(
        &self,
        transport: &mut Box<dyn RegisterTransport>,
    ) -> Result<(), LinkError> {
        if self.is_connected() {
            let _ = transport.disconnect().await;
            self.set_state(ConnectionState::Disconnected);
        }

        let target = self.params.target();
        let kind = transport.kind();
        let timeout_ms = self.params.connect_timeout.as_millis() as u64;
        match tokio::time::timeout(self.params.connect_timeout, transport.connect(&target)).await {
            Ok(Ok(())) => {
                self.set_state(ConnectionState::Connected);
                self.stats.lock().last_connected = Some(Utc::now());
                info!("Link {} connected to {} via {}", self.params.name, target, kind);
                Ok(())
            },
            Ok(Err(e)) => Err(LinkError::Connect {
                target: target.to_string(),
                message: e.message,
            }),
            Err(_) => Err(LinkError::Timeout {
                operation: format!("connect {target}"),
                timeout_ms,
            }),
        }
    }

    /// Close the connection. Errors are swallowed; the state always ends Disconnected.
    pub async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            debug!("Link {} disconnect error ignored: {}", self.params.name, e);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Run one reconnect loop unless another caller already is.
    ///
    /// A concurrent caller gets the current connected flag back without
    /// waiting. Attempts are spaced by the fixed reconnect interval.
    pub async fn try_reconnect(&self) -> bool {
        let Ok(_guard) = self.reconnect_guard.try_lock() else {
            debug!("Link {} reconnect already in progress", self.params.name);
            return self.is_connected();
        };

        self.set_state(ConnectionState::Reconnecting);
        let mut transport = self.transport.lock().await;
        let _ = transport.disconnect().await;
        *transport = self.factory.create();

        let max_attempts = self.params.max_reconnect_attempts;
        for attempt in 1..=max_attempts {
            self.stats.lock().reconnect_attempts += 1;
            match self.connect_locked(&mut transport).await {
                Ok(()) => {
                    self.stats.lock().successful_reconnects += 1;
                    info!(
                        "Link {} reconnected on attempt {}/{}",
                        self.params.name, attempt, max_attempts
                    );
                    return true;
                },
                Err(e) => {
                    warn!(
                        "Link {} reconnect attempt {}/{} failed: {}",
                        self.params.name, attempt, max_attempts, e
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.params.reconnect_interval).await;
                    }
                },
            }
        }

        self.set_state(ConnectionState::Disconnected);
        error!(
            "Link {} giving up after {} reconnect attempts",
            self.params.name, max_attempts
        );
        false
    }

    /// Hold the link for a sequence of operations
    pub async fn session(&self) -> LinkSession<'_> {
        LinkSession {
            link: self,
            transport: self.transport.lock().await,
        }
    }

    pub async fn read<T: RegisterValue>(&self, address: &str) -> Result<T, LinkError> {
        self.session().await.read(address).await
    }

    pub async fn write<T: RegisterValue>(&self, address: &str, value: T) -> Result<(), LinkError> {
        self.session().await.write(address, value).await
    }
}

/// Bound a transport call by the receive timeout and account for its outcome
async fn guarded<T, F>(
    link: &DeviceLink,
    access: Access,
    address: &str,
    call: F,
) -> Result<T, LinkError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    if !link.is_connected() {
        return Err(LinkError::NotConnected {
            link: link.params.name.clone(),
        });
    }

    let timeout = link.params.receive_timeout;
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(match (e.kind, access) {
            (TransportErrorKind::Protocol, _) => LinkError::Rejected {
                address: address.to_string(),
                message: e.message,
            },
            (TransportErrorKind::Connection, Access::Read) => LinkError::Read {
                address: address.to_string(),
                message: e.message,
            },
            (TransportErrorKind::Connection, Access::Write) => LinkError::Write {
                address: address.to_string(),
                message: e.message,
            },
        }),
        Err(_) => Err(LinkError::Timeout {
            operation: match access {
                Access::Read => format!("read {address}"),
                Access::Write => format!("write {address}"),
            },
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    match &result {
        Ok(_) => {
            let mut stats = link.stats.lock();
            match access {
                Access::Read => stats.reads += 1,
                Access::Write => stats.writes += 1,
            }
        },
        Err(e) if e.breaks_connection() => {
            debug!("Link {}: {}", link.params.name, e);
            link.mark_failed();
        },
        Err(e) => {
            debug!("Link {}: {} (connection kept)", link.params.name, e);
            link.stats.lock().failures += 1;
        },
    }
    result
}

/// Exclusive access to a link for one station cycle
pub struct LinkSession<'a> {
    link: &'a DeviceLink,
    transport: MutexGuard<'a, Box<dyn RegisterTransport>>,
}

impl LinkSession<'_> {
    pub fn link(&self) -> &DeviceLink {
        self.link
    }

    async fn read_raw(&mut self, address: &str, shape: Shape) -> Result<RawValue, LinkError> {
        let link = self.link;
        match shape {
            Shape::Bit => guarded(link, Access::Read, address, self.transport.read_bit(address))
                .await
                .map(RawValue::Bit),
            Shape::Words(count) => guarded(
                link,
                Access::Read,
                address,
                self.transport.read_words(address, count),
            )
            .await
            .map(RawValue::Words),
        }
    }

    async fn write_raw(&mut self, address: &str, raw: RawValue) -> Result<(), LinkError> {
        let link = self.link;
        match raw {
            RawValue::Bit(value) => {
                guarded(link, Access::Write, address, self.transport.write_bit(address, value))
                    .await
            },
            RawValue::Words(words) => {
                guarded(
                    link,
                    Access::Write,
                    address,
                    self.transport.write_words(address, &words),
                )
                .await
            },
        }
    }

    pub async fn read<T: RegisterValue>(&mut self, address: &str) -> Result<T, LinkError> {
        let raw = self.read_raw(address, T::SHAPE).await?;
        T::decode(raw).map_err(|message| LinkError::Decode {
            address: address.to_string(),
            message,
        })
    }

    pub async fn write<T: RegisterValue>(&mut self, address: &str, value: T) -> Result<(), LinkError> {
        self.write_raw(address, value.encode()).await
    }

    /// Read a `len`-byte string
    pub async fn read_string(&mut self, address: &str, len: u16) -> Result<String, LinkError> {
        let raw = self.read_raw(address, Shape::Words(codec::string_words(len))).await?;
        match raw {
            RawValue::Words(words) => Ok(codec::decode_string(&words)),
            RawValue::Bit(_) => Err(LinkError::Decode {
                address: address.to_string(),
                message: "expected words, got a bit".to_string(),
            }),
        }
    }

    /// Write `value` into a `len`-byte string field, NUL padded
    pub async fn write_string(
        &mut self,
        address: &str,
        value: &str,
        len: u16,
    ) -> Result<(), LinkError> {
        self.write_raw(address, RawValue::Words(codec::encode_string(value, len)))
            .await
    }

    /// Values come back in address order; the first failure aborts the batch.
    pub async fn read_bool_batch(&mut self, addresses: &[&str]) -> Result<Vec<bool>, LinkError> {
        let mut values = Vec::with_capacity(addresses.len());
        for address in addresses {
            values.push(self.read::<bool>(address).await?);
        }
        Ok(values)
    }

    pub async fn read_float_batch(&mut self, addresses: &[&str]) -> Result<Vec<f32>, LinkError> {
        let mut values = Vec::with_capacity(addresses.len());
        for address in addresses {
            values.push(self.read::<f32>(address).await?);
        }
        Ok(values)
    }
}
