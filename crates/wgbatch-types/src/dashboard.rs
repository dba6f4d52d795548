// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Request and response bodies of the dashboard endpoints wgbatch calls.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/updatePeerSettings/<interface>`.
///
/// The dashboard rejects partial updates, so every field is always
/// serialized, empty strings included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSettings {
    /// Peer public key; the dashboard uses it as the peer id.
    pub id: String,
    /// Display name shown in the dashboard.
    pub name: String,
    /// Peer private key, needed by the dashboard to render client configs.
    pub private_key: String,
    /// DNS servers handed to the client.
    #[serde(rename = "DNS")]
    pub dns: String,
    /// AllowedIPs of the peer on the server side.
    pub allowed_ip: String,
    /// AllowedIPs written into the client config.
    pub endpoint_allowed_ip: String,
    /// Pre-shared key; wgbatch never sets one.
    pub preshared_key: String,
    /// Client MTU.
    pub mtu: u32,
    /// Client PersistentKeepalive in seconds.
    pub keepalive: u32,
    /// Externally reachable server endpoint for the client config.
    pub remote_endpoint: String,
}

/// Envelope the dashboard wraps around every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Whether the dashboard accepted the request.
    pub status: bool,
    /// Human-readable reason, mostly set on failure.
    #[serde(default)]
    pub message: Option<String>,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}
