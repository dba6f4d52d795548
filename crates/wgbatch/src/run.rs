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

use std::io;
use std::path::{Path, PathBuf};

use reqwest::Client;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::dashboard::{self, DashboardError};
use crate::keys::{self, KeySource};
use crate::lifecycle::{self, Platform, PlatformError};
use crate::params::{Mode, RunParameters};
use crate::plan::{self, Decision};
use crate::render;
use crate::report::{RunReport, SummaryEntry};
use crate::state::{Instance, InstanceState, Phase};
use crate::sync;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("required tools not found on PATH: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("dashboard handshake failed: {0}")]
    Handshake(#[source] DashboardError),

    #[error("target directory {} is not writable: {source}", .path.display())]
    TargetDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to scan {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Run one provisioning or deprovisioning pass over the configured range.
///
/// Every fatal check happens before the first file or interface is touched;
/// after that, per-instance failures are counted in the report and the batch
/// keeps going.
pub async fn execute<P: Platform, K: KeySource>(
    client: &Client,
    params: &RunParameters,
    keys: &K,
) -> Result<RunReport, RunError> {
    let report = RunReport::new(params.mode, params.dry_run);
    let span = info_span!(
        "run",
        run_id = %report.run_id,
        mode = ?params.mode,
        dry_run = params.dry_run,
    );
    execute_inner::<P, K>(client, params, keys, report)
        .instrument(span)
        .await
}

async fn execute_inner<P: Platform, K: KeySource>(
    client: &Client,
    params: &RunParameters,
    keys: &K,
    mut report: RunReport,
) -> Result<RunReport, RunError> {
    info!(
        prefix = %params.prefix,
        start = params.start,
        end = params.end,
        dir = %params.target_dir.display(),
        "starting run"
    );

    preflight::<P, K>(client, params, keys).await?;

    match params.mode {
        Mode::Provision => provision::<P, K>(client, params, keys, &mut report).await?,
        Mode::Deprovision => deprovision::<P>(params, &mut report).await?,
    }

    info!(
        total = report.counters.total(),
        created = report.counters.created(),
        skipped = report.counters.skipped(),
        removed = report.counters.removed(),
        errors = report.counters.errors(),
        "run complete"
    );
    Ok(report)
}

/// Tools the run will shell out to, given its mode and key source.
pub fn required_tools<K: KeySource>(params: &RunParameters, keys: &K) -> Vec<&'static str> {
    if params.dry_run {
        return Vec::new();
    }
    let mut tools = vec!["wg-quick"];
    if params.mode == Mode::Provision {
        tools.extend_from_slice(keys.required_tools());
    }
    if params.restart.is_some() {
        tools.push("systemctl");
    }
    tools
}

async fn preflight<P: Platform, K: KeySource>(
    client: &Client,
    params: &RunParameters,
    keys: &K,
) -> Result<(), RunError> {
    let missing = P::missing_tools(&required_tools(params, keys));
    if !missing.is_empty() {
        error!(?missing, "missing required tools");
        return Err(RunError::MissingTools(missing));
    }

    dashboard::handshake(client, &params.dashboard)
        .await
        .map_err(RunError::Handshake)?;

    if !params.dry_run {
        ensure_writable(&params.target_dir).await?;
    }
    Ok(())
}

async fn ensure_writable(dir: &Path) -> Result<(), RunError> {
    let target_dir = |source: io::Error| RunError::TargetDir {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(target_dir)?;
    // Dropped right away; the OS removes it.
    tempfile::tempfile_in(dir).map_err(target_dir)?;
    debug!(dir = %dir.display(), "target directory is writable");
    Ok(())
}

async fn provision<P: Platform, K: KeySource>(
    client: &Client,
    params: &RunParameters,
    keys: &K,
    report: &mut RunReport,
) -> Result<(), RunError> {
    if params.delete_existing {
        let names = params.instance_names();
        let pass = plan::delete_existing(&params.target_dir, &names, params.dry_run).map_err(
            |source| RunError::Scan {
                path: params.target_dir.clone(),
                source,
            },
        )?;
        info!(
            removed = pass.removed.len(),
            protected = pass.protected.len(),
            failed = pass.failed.len(),
            "deletion pass finished"
        );
        for _ in &pass.failed {
            report.counters.record_error();
        }
    }

    let mut instances = Vec::new();
    for planned in plan::plan(params) {
        report.counters.record_total();
        let mut instance = Instance::new(planned.name, planned.path);

        if planned.decision == Decision::Skip {
            info!(interface = %instance.name, path = %instance.path.display(), "config exists, skipping");
            instance.advance(InstanceState::Skipped);
            report.counters.record_skipped();
            instances.push(instance);
            continue;
        }

        if params.dry_run {
            let action = match planned.decision {
                Decision::Overwrite => "overwrite",
                _ => "create",
            };
            info!(interface = %instance.name, path = %instance.path.display(), "[dry-run] would {action} config");
            report.counters.record_created();
            instances.push(instance);
            continue;
        }

        create_instance(params, keys, &mut instance, report).await;
        instances.push(instance);
    }

    if let Some(restart) = &params.restart {
        if params.dry_run {
            info!(service = %restart.service, "[dry-run] would restart dashboard service");
        } else {
            lifecycle::restart_and_wait::<P>(restart).await?;
        }
    }

    if !params.dry_run && report.counters.created() > 0 {
        sync::synchronize::<P>(client, params, &mut instances, report).await;
    }

    report.entries = instances
        .iter()
        .filter_map(SummaryEntry::from_instance)
        .collect();
    Ok(())
}

async fn create_instance<K: KeySource>(
    params: &RunParameters,
    keys: &K,
    instance: &mut Instance,
    report: &mut RunReport,
) {
    let identity = match keys::generate_identity(keys).await {
        Ok(identity) => identity,
        Err(e) => {
            error!(interface = %instance.name, error = %e, "key generation failed");
            instance.fail(Phase::Keygen);
            report.counters.record_error();
            return;
        }
    };

    let document = render::render_document(
        params,
        &identity.interface.private_key,
        &identity.peer.public_key,
    );
    instance.keys_generated(identity);

    if let Err(e) = render::write_document(&instance.path, &document) {
        error!(interface = %instance.name, path = %instance.path.display(), error = %e, "failed to write config");
        instance.fail(Phase::Write);
        report.counters.record_error();
        return;
    }

    info!(interface = %instance.name, path = %instance.path.display(), "config written");
    instance.advance(InstanceState::FileWritten);
    report.counters.record_created();
}

async fn deprovision<P: Platform>(
    params: &RunParameters,
    report: &mut RunReport,
) -> Result<(), RunError> {
    for name in params.instance_names() {
        report.counters.record_total();
        let path = name.config_path(&params.target_dir);
        let exists = path.exists();

        if params.dry_run {
            if exists {
                info!(interface = %name, path = %path.display(), "[dry-run] would bring down and remove");
                report.counters.record_removed();
            } else {
                debug!(interface = %name, "[dry-run] no config, would only ensure interface is down");
            }
            continue;
        }

        if !lifecycle::deactivate::<P>(&name, &path).await {
            warn!(interface = %name, "interface still up, keeping its config");
            report.counters.record_error();
            continue;
        }

        if !exists {
            debug!(interface = %name, "no config to remove");
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(interface = %name, path = %path.display(), "config removed");
                report.counters.record_removed();
            }
            Err(e) => {
                error!(interface = %name, path = %path.display(), error = %e, "failed to remove config");
                report.counters.record_error();
            }
        }
    }

    if let Some(restart) = &params.restart {
        if params.dry_run {
            info!(service = %restart.service, "[dry-run] would restart dashboard service");
        } else {
            lifecycle::restart_and_wait::<P>(restart).await?;
        }
    }
    Ok(())
}
