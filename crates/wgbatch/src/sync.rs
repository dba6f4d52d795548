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

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};
use wgbatch_types::dashboard::PeerSettings;

use crate::dashboard;
use crate::keys::KeyPair;
use crate::lifecycle::{self, Platform};
use crate::params::RunParameters;
use crate::plan::InstanceName;
use crate::report::RunReport;
use crate::state::{Instance, InstanceState, Phase};

/// Result of a step that ran while the interface was up.
pub struct Cycle<T> {
    pub value: T,
    /// Whether the interface was taken down again afterwards.
    pub deactivated: bool,
}

/// Bring `name` up, wait `settle`, run `step`, and take the interface down
/// again no matter what `step` produced. `None` means activation failed and
/// `step` never ran; the interface is then left as activation left it.
pub async fn with_active_interface<P: Platform, T>(
    name: &InstanceName,
    config: &Path,
    settle: Duration,
    step: impl Future<Output = T>,
) -> Option<Cycle<T>> {
    if !lifecycle::activate::<P>(name, config).await {
        return None;
    }
    tokio::time::sleep(settle).await;

    let value = step.await;
    let deactivated = lifecycle::deactivate::<P>(name, config).await;
    Some(Cycle { value, deactivated })
}

pub fn peer_settings(params: &RunParameters, name: &InstanceName, peer: &KeyPair) -> PeerSettings {
    let display_name = if params.client.peer_name.is_empty() {
        name.to_string()
    } else {
        params.client.peer_name.clone()
    };

    PeerSettings {
        id: peer.public_key.clone(),
        name: display_name,
        private_key: peer.private_key.clone(),
        dns: params.client.dns.clone(),
        allowed_ip: params.peer_allowed_ips.clone(),
        endpoint_allowed_ip: params.client.allowed_ips.clone(),
        preshared_key: String::new(),
        mtu: params.client.mtu,
        keepalive: params.client.keepalive,
        remote_endpoint: params.client.server_endpoint.clone(),
    }
}

/// Register the primary peer of every freshly written instance with the
/// dashboard, one instance at a time.
#[tracing::instrument(skip_all)]
pub async fn synchronize<P: Platform>(
    client: &Client,
    params: &RunParameters,
    instances: &mut [Instance],
    report: &mut RunReport,
) {
    report.synchronized = true;
    let pending = instances
        .iter()
        .filter(|i| i.state() == InstanceState::FileWritten)
        .count();
    info!(pending, "registering peers with dashboard");

    for instance in instances
        .iter_mut()
        .filter(|i| i.state() == InstanceState::FileWritten)
    {
        tokio::time::sleep(params.timing.throttle).await;
        sync_one::<P>(client, params, instance, report).await;
    }

    info!(
        succeeded = report.counters.api_success(),
        failed = report.counters.api_failed(),
        "dashboard registration complete"
    );
}

async fn sync_one<P: Platform>(
    client: &Client,
    params: &RunParameters,
    instance: &mut Instance,
    report: &mut RunReport,
) {
    let Some(identity) = instance.identity() else {
        warn!(interface = %instance.name, "written instance has no keys, skipping registration");
        instance.fail(Phase::Register);
        report.counters.record_api_failure();
        return;
    };
    let settings = peer_settings(params, &instance.name, &identity.peer);
    let name = instance.name.clone();
    let path = instance.path.clone();

    debug!(interface = %name, "starting activate/register/deactivate cycle");
    let registration =
        dashboard::update_peer_settings(client, &params.dashboard, name.as_str(), &settings);
    let Some(cycle) =
        with_active_interface::<P, _>(&name, &path, params.timing.settle, registration).await
    else {
        warn!(interface = %name, "activation failed, peer not registered");
        instance.fail(Phase::Activate);
        report.counters.record_api_failure();
        return;
    };

    instance.advance(InstanceState::Activated);
    match cycle.value {
        Ok(()) => {
            info!(interface = %name, peer = %settings.id, "peer registered");
            instance.advance(InstanceState::Registered);
            report.counters.record_api_success();
        }
        Err(e) => {
            warn!(interface = %name, error = %e, "peer registration failed");
            instance.fail(Phase::Register);
            report.counters.record_api_failure();
        }
    }

    if !cycle.deactivated {
        warn!(interface = %name, "interface may still be up");
        instance.fail(Phase::Deactivate);
    } else if instance.state() == InstanceState::Registered {
        instance.advance(InstanceState::Deactivated);
    }
}
