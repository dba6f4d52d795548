use std::fmt;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use wgbatch_types::API_KEY_HEADER;
use wgbatch_types::dashboard::{ApiResponse, PeerSettings};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the dashboard lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Dashboard {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("unauthorized ({0}), check the API key")]
    Unauthorized(u16),

    #[error("dashboard rejected the update: {0}")]
    Rejected(String),
}

/// Authenticated liveness check. Anything but 200 is an error.
#[tracing::instrument(skip_all, fields(url = %dashboard.base_url))]
pub async fn handshake(client: &Client, dashboard: &Dashboard) -> Result<(), DashboardError> {
    let url = dashboard.url("/api/handshake");
    debug!(url = %url, "sending handshake");

    let resp = client
        .get(&url)
        .header(API_KEY_HEADER, &dashboard.api_key)
        .timeout(HANDSHAKE_TIMEOUT)
        .send()
        .await?;

    let status = resp.status().as_u16();
    match status {
        200 => {
            info!("dashboard handshake succeeded");
            Ok(())
        }
        401 | 403 => {
            warn!(status, "dashboard refused the API key");
            Err(DashboardError::Unauthorized(status))
        }
        _ => {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, body = %body, "dashboard handshake returned unexpected status");
            Err(DashboardError::ServerError { status, body })
        }
    }
}

/// Push the settings of one peer of `interface`. The dashboard only accepts
/// this while the interface is up and has been picked up by its scanner.
#[tracing::instrument(skip(client, dashboard, settings), fields(peer = %settings.id))]
pub async fn update_peer_settings(
    client: &Client,
    dashboard: &Dashboard,
    interface: &str,
    settings: &PeerSettings,
) -> Result<(), DashboardError> {
    let url = dashboard.url(&format!("/api/updatePeerSettings/{interface}"));
    debug!(url = %url, "updating peer settings");

    let resp = client
        .post(&url)
        .header(API_KEY_HEADER, &dashboard.api_key)
        .timeout(UPDATE_TIMEOUT)
        .json(settings)
        .send()
        .await?;

    let status = resp.status().as_u16();
    match status {
        200 => {}
        401 | 403 => return Err(DashboardError::Unauthorized(status)),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            return Err(DashboardError::ServerError { status, body });
        }
    }

    let body: ApiResponse = resp.json().await?;
    if !body.status {
        let message = body.message.unwrap_or_default();
        warn!(message = %message, "dashboard rejected peer update");
        return Err(DashboardError::Rejected(message));
    }

    debug!("peer settings accepted");
    Ok(())
}
