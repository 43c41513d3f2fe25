//! gRPC health reporting for liveness/readiness checks.
//!
//! The registry binds its listener and spawns the `grpc.health.v1` server on
//! the first call to [`HealthRegistry::start`]; later calls reuse that server.
//! Statuses are mirrored locally so the process can read them back without a
//! client round trip.

use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{PoisonError, RwLock},
};

use thiserror::Error;
use tokio::{net::TcpListener, sync::OnceCell};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{debug, error, info};

use crate::config::ConfigProvider;

pub const LIVENESS_SUFFIX: &str = "-liveness";
pub const READINESS_SUFFIX: &str = "-readiness";

/// Status reported for a named service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
    /// Returned for names that were never registered.
    ServiceNotFound,
}

impl ServingStatus {
    fn to_wire(self) -> Option<tonic_health::ServingStatus> {
        match self {
            Self::Unknown => Some(tonic_health::ServingStatus::Unknown),
            Self::Serving => Some(tonic_health::ServingStatus::Serving),
            Self::NotServing => Some(tonic_health::ServingStatus::NotServing),
            Self::ServiceNotFound => None,
        }
    }
}

struct Running {
    addr: SocketAddr,
    liveness: String,
    readiness: String,
    reporter: HealthReporter,
}

/// Caller-owned health registry. Share it behind an `Arc` or by reference.
pub struct HealthRegistry {
    started: OnceCell<Result<Running, HealthError>>,
    statuses: RwLock<HashMap<String, ServingStatus>>,
    shutdown: CancellationToken,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            started: OnceCell::new(),
            statuses: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts the health server on the first call and marks liveness SERVING
    /// on every call. A bind failure is returned to the first caller and to
    /// every caller after it.
    pub async fn start<P>(&self, provider: &P) -> Result<SocketAddr, HealthError>
    where
        P: ConfigProvider + ?Sized,
    {
        let running = self
            .started
            .get_or_init(|| self.launch(provider))
            .await
            .as_ref()
            .map_err(Clone::clone)?;

        self.apply(running, &running.liveness, ServingStatus::Serving)
            .await;
        info!(addr = %running.addr, "health server started successfully");
        Ok(running.addr)
    }

    async fn launch<P>(&self, provider: &P) -> Result<Running, HealthError>
    where
        P: ConfigProvider + ?Sized,
    {
        let (requested, listener) = bind_wildcard(provider.healthcheck_port()).await?;
        let addr = listener.local_addr().map_err(|err| HealthError::Bind {
            addr: requested,
            reason: err.to_string(),
        })?;

        let prefix = provider.healthcheck_service_prefix();
        let (reporter, service) = health_reporter();

        info!(
            app = provider.app_name(),
            port = addr.port(),
            "starting healthcheck server"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let served = Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await
                })
                .await;
            match served {
                Ok(()) => info!("stopping healthcheck server"),
                Err(err) => error!(error = %err, "healthcheck server error"),
            }
        });

        Ok(Running {
            addr,
            liveness: format!("{prefix}{LIVENESS_SUFFIX}"),
            readiness: format!("{prefix}{READINESS_SUFFIX}"),
            reporter,
        })
    }

    fn running(&self) -> Result<&Running, HealthError> {
        match self.started.get() {
            Some(Ok(running)) => Ok(running),
            Some(Err(err)) => Err(err.clone()),
            None => Err(HealthError::NotStarted),
        }
    }

    async fn apply(&self, running: &Running, service: &str, status: ServingStatus) {
        {
            let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
            match status {
                ServingStatus::ServiceNotFound => statuses.remove(service),
                other => statuses.insert(service.to_owned(), other),
            };
        }

        let mut reporter = running.reporter.clone();
        match status.to_wire() {
            Some(wire) => reporter.set_service_status(service, wire).await,
            None => reporter.clear_service_status(service).await,
        }
    }

    /// Sets the status of an arbitrary service name. Setting
    /// [`ServingStatus::ServiceNotFound`] unregisters the name.
    pub async fn set_status(&self, service: &str, status: ServingStatus) -> Result<(), HealthError> {
        let running = self.running()?;
        self.apply(running, service, status).await;
        Ok(())
    }

    /// Unknown names answer [`ServingStatus::ServiceNotFound`].
    pub fn status(&self, service: &str) -> ServingStatus {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .copied()
            .unwrap_or(ServingStatus::ServiceNotFound)
    }

    pub async fn set_liveness(&self, status: ServingStatus) -> Result<(), HealthError> {
        let running = self.running()?;
        self.apply(running, &running.liveness, status).await;
        Ok(())
    }

    pub async fn set_readiness(&self, status: ServingStatus) -> Result<(), HealthError> {
        let running = self.running()?;
        self.apply(running, &running.readiness, status).await;
        Ok(())
    }

    pub fn liveness(&self) -> Result<ServingStatus, HealthError> {
        Ok(self.status(&self.running()?.liveness))
    }

    pub fn readiness(&self) -> Result<ServingStatus, HealthError> {
        Ok(self.status(&self.running()?.readiness))
    }

    pub fn liveness_service(&self) -> Result<&str, HealthError> {
        Ok(&self.running()?.liveness)
    }

    pub fn readiness_service(&self) -> Result<&str, HealthError> {
        Ok(&self.running()?.readiness)
    }

    /// Stops the gRPC server. Statuses stay readable locally.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Binds every interface: the IPv6 wildcard (dual-stack where the OS allows
/// it), falling back to IPv4 only when IPv6 is unavailable. A port already in
/// use is reported as is.
async fn bind_wildcard(port: u16) -> Result<(SocketAddr, TcpListener), HealthError> {
    let dual = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match TcpListener::bind(dual).await {
        Ok(listener) => return Ok((dual, listener)),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            return Err(HealthError::Bind {
                addr: dual,
                reason: err.to_string(),
            })
        }
        Err(err) => debug!(error = %err, "IPv6 wildcard unavailable, listening on IPv4 only"),
    }

    let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    TcpListener::bind(v4)
        .await
        .map(|listener| (v4, listener))
        .map_err(|err| HealthError::Bind {
            addr: v4,
            reason: err.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("failed to set up healthcheck server on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
    #[error("health registry has not been started")]
    NotStarted,
}
