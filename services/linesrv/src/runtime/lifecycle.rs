//! Runtime lifecycle management
//!
//! Builds links and stations from configuration, starts one scheduler task per
//! link plus the status reporter, and tears everything down on shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{AppConfig, TransportKind};
use crate::error::Result;
use crate::link::DeviceLink;
use crate::mes::{HttpMesClient, MesClient, MesSync};
use crate::runtime::scheduler::StationScheduler;
use crate::sink::{LogSink, ResultRepository, TracingLogSink};
use crate::snapshot::SnapshotHub;
use crate::station::{StationDeps, StationHandshake};
use crate::transport::{modbus_tcp_factory, RegisterImage};

/// Collaborators injected at build time
#[derive(Clone)]
pub struct BuildOptions {
    /// Every link uses an in-memory register image
    pub simulate: bool,
    /// Replaces the HTTP client built from `mes` config
    pub mes_client: Option<Arc<dyn MesClient>>,
    pub log_sink: Arc<dyn LogSink>,
    pub repository: Option<Arc<dyn ResultRepository>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            simulate: false,
            mes_client: None,
            log_sink: Arc::new(TracingLogSink),
            repository: None,
        }
    }
}

/// Everything needed to run a line, not started yet
pub struct LineBuild {
    pub schedulers: Vec<StationScheduler>,
    pub links: Vec<Arc<DeviceLink>>,
    pub hub: SnapshotHub,
    /// Register images of in-memory links, by link name
    pub images: BTreeMap<String, RegisterImage>,
}

/// Create links, stations and schedulers
pub fn build_line(config: &AppConfig, options: BuildOptions) -> Result<LineBuild> {
    let mes_client: Option<Arc<dyn MesClient>> = match (options.mes_client, &config.mes) {
        (Some(client), _) => Some(client),
        (None, Some(mes)) => {
            let client = HttpMesClient::new(mes)?;
            info!("MES uploads go to {}", client.url());
            Some(Arc::new(client))
        },
        (None, None) => None,
    };

    let deps = StationDeps {
        mes: mes_client.map(|client| Arc::new(MesSync::new(client))),
        log: options.log_sink,
        repository: options.repository,
    };

    let mut schedulers = Vec::with_capacity(config.links.len());
    let mut links = Vec::with_capacity(config.links.len());
    let mut hub = SnapshotHub::new();
    let mut images = BTreeMap::new();

    for link_config in &config.links {
        let factory = if options.simulate || link_config.transport == TransportKind::Memory {
            let image = RegisterImage::new();
            images.insert(link_config.name.clone(), image.clone());
            image.factory()
        } else {
            modbus_tcp_factory()
        };
        let link = Arc::new(DeviceLink::new(link_config.link_params(), factory));

        let mut stations = Vec::with_capacity(link_config.stations.len());
        for station_config in &link_config.stations {
            let station = StationHandshake::new(station_config.clone(), deps.clone())?;
            hub.insert(station.name(), station.subscribe());
            debug!(
                "Station {} ({}) attached to link {}",
                station.name(),
                station_config.role,
                link_config.name
            );
            stations.push(station);
        }

        schedulers.push(StationScheduler::new(
            link.clone(),
            stations,
            link_config.poll_interval(),
        ));
        links.push(link);
    }

    info!(
        "Built {} links with {} stations",
        links.len(),
        hub.len()
    );
    Ok(LineBuild {
        schedulers,
        links,
        hub,
        images,
    })
}

/// A running line
pub struct LineRuntime {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
    pub hub: SnapshotHub,
    pub links: Vec<Arc<DeviceLink>>,
    pub images: BTreeMap<String, RegisterImage>,
}

/// Spawn schedulers and, when `status_interval` is non-zero, the status reporter
pub fn start_line(build: LineBuild, status_interval: Duration) -> LineRuntime {
    let token = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = build
        .schedulers
        .into_iter()
        .map(|scheduler| scheduler.spawn(token.clone()))
        .collect();

    if !status_interval.is_zero() {
        handles.push(start_status_task(
            build.links.clone(),
            status_interval,
            token.clone(),
        ));
    }

    LineRuntime {
        handles,
        token,
        hub: build.hub,
        links: build.links,
        images: build.images,
    }
}

impl LineRuntime {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel all tasks and wait for them; schedulers finish their current cycle first
    pub async fn shutdown(self) {
        info!("Stopping {} runtime tasks...", self.handles.len());
        self.token.cancel();

        let results = join_all(self.handles).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        for result in results {
            if let Err(e) = result {
                error!("Runtime task ended abnormally: {}", e);
            }
        }
        info!("Line stopped ({} tasks failed)", failed);
    }
}

/// Periodic link statistics report
pub fn start_status_task(
    links: Vec<Arc<DeviceLink>>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // the first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let connected = links.iter().filter(|l| l.is_connected()).count();
                    info!("Link status: total={}, connected={}", links.len(), connected);
                    for link in &links {
                        let stats = link.stats();
                        info!(
                            "Link {}: state={:?} reads={} writes={} failures={} reconnects={}/{}",
                            link.name(),
                            link.state(),
                            stats.reads,
                            stats.writes,
                            stats.failures,
                            stats.successful_reconnects,
                            stats.reconnect_attempts
                        );
                    }
                }
                () = token.cancelled() => {
                    debug!("Status task received cancellation signal");
                    break;
                }
            }
        }
    })
}
