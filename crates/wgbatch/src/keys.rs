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
use std::future::Future;
use std::process::Stdio;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::rngs::OsRng;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to decode base64 key: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("failed to run wg {args}: {source}")]
    Io {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wg {args} exited with {status}: {stderr}")]
    Tool {
        args: String,
        status: String,
        stderr: String,
    },
}

/// A base64 encoded X25519 key pair as WireGuard expects it.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private_key: BASE64.encode(secret.to_bytes()),
            public_key: BASE64.encode(public.as_bytes()),
        }
    }
}

/// The two independent key pairs every instance gets.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Keys of the local interface; only the public half leaves the host.
    pub interface: KeyPair,
    /// Keys of the primary remote peer; the private half goes to the dashboard.
    pub peer: KeyPair,
}

pub trait KeySource {
    /// External programs this source needs on `PATH`.
    fn required_tools(&self) -> &'static [&'static str] {
        &[]
    }

    fn generate(&self) -> impl Future<Output = Result<KeyPair, KeyError>> + Send;
}

pub async fn generate_identity<K: KeySource>(keys: &K) -> Result<Identity, KeyError> {
    let interface = keys.generate().await?;
    let peer = keys.generate().await?;
    Ok(Identity { interface, peer })
}

/// In-process generation from the OS CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeys;

impl KeySource for NativeKeys {
    async fn generate(&self) -> Result<KeyPair, KeyError> {
        Ok(KeyPair::generate())
    }
}

/// Generation through `wg genkey` piped into `wg pubkey`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgToolKeys;

impl KeySource for WgToolKeys {
    fn required_tools(&self) -> &'static [&'static str] {
        &["wg"]
    }

    async fn generate(&self) -> Result<KeyPair, KeyError> {
        let private_key = run_wg(&["genkey"], None).await?;
        let public_key = run_wg(&["pubkey"], Some(&private_key)).await?;
        debug!(public_key = %public_key, "generated key pair with wg");
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }
}

async fn run_wg(args: &[&str], input: Option<&str>) -> Result<String, KeyError> {
    let io_err = |source: std::io::Error| KeyError::Io {
        args: args.join(" "),
        source,
    };

    let mut child = Command::new("wg")
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(io_err)?;

    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{input}\n").as_bytes())
                .await
                .map_err(io_err)?;
        }
    }

    let output = child.wait_with_output().await.map_err(io_err)?;
    if !output.status.success() {
        return Err(KeyError::Tool {
            args: args.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
    decode_key(&key)?;
    Ok(key)
}

pub fn decode_key(b64: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(b64)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}
