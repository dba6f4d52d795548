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
use std::fmt;

use chrono::{DateTime, Utc};
use comfy_table::Table;
use comfy_table::presets::ASCII_MARKDOWN;
use uuid::Uuid;

use crate::keys::KeyPair;
use crate::params::Mode;
use crate::plan::InstanceName;
use crate::state::{Instance, InstanceState};

/// Per-run tallies. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    total: usize,
    created: usize,
    skipped: usize,
    errors: usize,
    removed: usize,
    api_success: usize,
    api_failed: usize,
}

impl Counters {
    pub fn record_total(&mut self) {
        self.total += 1;
    }

    pub fn record_created(&mut self) {
        self.created += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_removed(&mut self) {
        self.removed += 1;
    }

    pub fn record_api_success(&mut self) {
        self.api_success += 1;
    }

    pub fn record_api_failure(&mut self) {
        self.api_failed += 1;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    pub fn api_success(&self) -> usize {
        self.api_success
    }

    pub fn api_failed(&self) -> usize {
        self.api_failed
    }
}

/// Recovery record of one created instance. The peer private key exists
/// nowhere else once the run ends, short of reading it back out of the
/// dashboard.
#[derive(Debug, Clone)]
pub struct SummaryEntry {
    pub name: InstanceName,
    pub interface_public_key: String,
    pub peer: KeyPair,
    pub state: InstanceState,
    pub registered: bool,
}

impl SummaryEntry {
    /// `None` for instances that never got a config file on disk.
    pub fn from_instance(instance: &Instance) -> Option<Self> {
        if !instance.has_file() {
            return None;
        }
        let identity = instance.identity()?;
        Some(Self {
            name: instance.name.clone(),
            interface_public_key: identity.interface.public_key.clone(),
            peer: identity.peer.clone(),
            state: instance.state(),
            registered: instance.registered(),
        })
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: Mode,
    pub dry_run: bool,
    pub counters: Counters,
    pub entries: Vec<SummaryEntry>,
    /// Set once the dashboard synchronization phase ran.
    pub synchronized: bool,
}

impl RunReport {
    pub fn new(mode: Mode, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
            dry_run,
            counters: Counters::default(),
            entries: Vec::new(),
            synchronized: false,
        }
    }

    /// Table of every created instance with the keys needed to finish its
    /// setup by hand. Empty in dry-run.
    pub fn recovery_table(&self) -> Option<Table> {
        if self.dry_run || self.entries.is_empty() {
            return None;
        }

        let mut table = Table::new();
        table.load_preset(ASCII_MARKDOWN).set_header(vec![
            "Instance",
            "Interface PublicKey",
            "Peer PublicKey",
            "Peer PrivateKey",
            "Registered",
        ]);
        for entry in &self.entries {
            table.add_row(vec![
                entry.name.to_string(),
                entry.interface_public_key.clone(),
                entry.peer.public_key.clone(),
                entry.peer.private_key.clone(),
                if entry.registered { "yes".to_string() } else { format!("no, {}", entry.state) },
            ]);
        }
        Some(table)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        let elapsed = Utc::now().signed_duration_since(self.started_at);

        writeln!(f, "========================================")?;
        writeln!(f, " Summary{}", if self.dry_run { " (dry-run)" } else { "" })?;
        writeln!(f, "========================================")?;
        writeln!(f, "  Total:    {}", c.total())?;
        writeln!(f, "  Created:  {}", c.created())?;
        writeln!(f, "  Skipped:  {}", c.skipped())?;
        if self.mode == Mode::Deprovision {
            writeln!(f, "  Removed:  {}", c.removed())?;
        }
        writeln!(f, "  Errors:   {}", c.errors())?;
        if self.synchronized {
            writeln!(
                f,
                "  API:      {} succeeded, {} failed",
                c.api_success(),
                c.api_failed()
            )?;
        }
        writeln!(f, "  Elapsed:  {}s", elapsed.num_seconds())?;

        if self.synchronized && c.api_failed() > 0 {
            writeln!(f)?;
            writeln!(
                f,
                "{} peer(s) were not registered. Enter their private keys in the dashboard by hand;",
                c.api_failed()
            )?;
            writeln!(f, "this table is the only copy outside the interface configs.")?;
        }

        if let Some(table) = self.recovery_table() {
            writeln!(f)?;
            writeln!(f, "Generated keys:")?;
            writeln!(f, "{table}")?;
        }

        if self.dry_run {
            writeln!(f)?;
            writeln!(f, "Dry-run finished, nothing was written.")?;
        }
        Ok(())
    }
}
