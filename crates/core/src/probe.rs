//! Readiness probing for containerized services
//!
//! A service counts as ready once its published port accepts TCP connections
//! and an HTTP GET on the readiness URL answers with a status below 500. The
//! TCP stage runs first so the HTTP stage does not produce a stream of
//! connection errors while the process is still binding. Both stages share a
//! single deadline.

use crate::errors::{DockerError, Result};
use crate::retry::poll_until;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// TCP-then-HTTP readiness check for one endpoint
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    host: String,
    port: u16,
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl ReadinessProbe {
    pub fn new(host: impl Into<String>, port: u16, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            url: url.into(),
            interval,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One TCP connection attempt, bounded by `remaining`
    pub async fn port_open(&self, remaining: Duration) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT.min(remaining), TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    /// One HTTP GET, bounded by `remaining`; any status below 500 is healthy
    pub async fn http_healthy(&self, remaining: Duration) -> bool {
        let request = self
            .client
            .get(&self.url)
            .timeout(REQUEST_TIMEOUT.min(remaining))
            .send();
        match request.await {
            Ok(response) => {
                let status = response.status();
                debug!("Readiness probe {} answered {}", self.url, status);
                status.as_u16() < 500
            }
            Err(e) => {
                debug!("Readiness probe {} failed: {}", self.url, e);
                false
            }
        }
    }

    /// Poll the TCP port until it accepts connections or `deadline` passes
    pub async fn wait_for_port(&self, deadline: Instant) -> bool {
        poll_until(deadline, self.interval, move |remaining| self.port_open(remaining)).await
    }

    /// Poll the HTTP endpoint until it is healthy or `deadline` passes
    pub async fn wait_for_http(&self, deadline: Instant) -> bool {
        poll_until(deadline, self.interval, move |remaining| self.http_healthy(remaining)).await
    }

    /// Run both stages against one deadline `timeout` from now
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        if !self.wait_for_port(deadline).await {
            return Err(DockerError::ReadinessTimeout {
                url: format!("tcp://{}:{}", self.host, self.port),
            }
            .into());
        }
        debug!("Port {} is accepting connections", self.port);
        if !self.wait_for_http(deadline).await {
            return Err(DockerError::ReadinessTimeout {
                url: self.url.clone(),
            }
            .into());
        }
        info!("Service ready at {}", self.url);
        Ok(())
    }
}
