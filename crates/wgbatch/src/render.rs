use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StaticPeer;
use crate::params::RunParameters;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to move config into place: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("failed to restrict permissions of {path}: {source}")]
    Permissions {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

struct PeerBlock<'a> {
    public_key: &'a str,
    allowed_ips: &'a str,
    endpoint: Option<&'a str>,
    keepalive: Option<u16>,
}

impl<'a> From<&'a StaticPeer> for PeerBlock<'a> {
    fn from(peer: &'a StaticPeer) -> Self {
        Self {
            public_key: peer.public_key.trim(),
            allowed_ips: &peer.allowed_ips,
            endpoint: peer.endpoint.as_deref().filter(|e| !e.is_empty()),
            keepalive: peer.keepalive.filter(|k| *k > 0),
        }
    }
}

/// Render the wg-quick config of one instance: the interface, the generated
/// primary peer, then the static peers in declared order.
pub fn render_document(
    params: &RunParameters,
    interface_private_key: &str,
    peer_public_key: &str,
) -> String {
    let mut lines = vec![
        "[Interface]".to_string(),
        format!("Address = {}", params.address),
        "SaveConfig = true".to_string(),
        "PreUp =".to_string(),
        "PostUp =".to_string(),
        "PreDown =".to_string(),
        "PostDown =".to_string(),
        format!("ListenPort = {}", params.listen_port),
        format!("PrivateKey = {interface_private_key}"),
        String::new(),
    ];

    let primary = PeerBlock {
        public_key: peer_public_key,
        allowed_ips: &params.peer_allowed_ips,
        endpoint: None,
        keepalive: None,
    };
    let peers = std::iter::once(primary).chain(params.static_peers.iter().map(PeerBlock::from));

    for peer in peers {
        lines.push("[Peer]".to_string());
        lines.push(format!("PublicKey = {}", peer.public_key));
        lines.push(format!("AllowedIPs = {}", peer.allowed_ips));
        if let Some(endpoint) = peer.endpoint {
            lines.push(format!("Endpoint = {endpoint}"));
        }
        if let Some(keepalive) = peer.keepalive {
            lines.push(format!("PersistentKeepalive = {keepalive}"));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Write `contents` to `path` through a sibling temp file so readers only
/// ever see a complete document, then restrict it to the owner.
pub fn write_document(path: &Path, contents: &str) -> Result<(), RenderError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".wgbatch-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    if let Err(source) = restrict_permissions(path) {
        warn!(path = %path.display(), error = %source, "removing config with unrestricted permissions");
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove config");
        }
        return Err(RenderError::Permissions {
            path: path.display().to_string(),
            source,
        });
    }

    debug!(path = %path.display(), bytes = contents.len(), "wrote config");
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, FileConfig};
    use crate::params::RunRequest;

    const PEER_KEY: &str = "Y2NjY2NjY2NjY2NjY2NjY2NjY2NjY2NjY2NjY2NjYWE=";

    fn params(static_peers: Vec<StaticPeer>) -> RunParameters {
        let request = RunRequest {
            prefix: "APW".into(),
            start: "1".into(),
            end: "1".into(),
            api_key: "secret".into(),
            overrides: Defaults {
                address: Some("10.10.0.1/24".into()),
                listen_port: Some(51820),
                peer_allowed_ips: Some("10.10.0.2/32".into()),
                server_endpoint: Some("vpn.example.com".into()),
                dashboard_url: Some("http://127.0.0.1:10086".into()),
                ..Defaults::default()
            },
            ..RunRequest::default()
        };
        let file = FileConfig {
            peers: static_peers,
            ..FileConfig::default()
        };
        RunParameters::resolve(request, file).unwrap()
    }

    fn site_peer(endpoint: Option<&str>, keepalive: Option<u16>) -> StaticPeer {
        StaticPeer {
            name: "site".into(),
            public_key: "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=".into(),
            allowed_ips: "192.168.50.0/24".into(),
            endpoint: endpoint.map(Into::into),
            keepalive,
        }
    }

    #[test]
    fn renders_interface_and_primary_peer() {
        let doc = render_document(&params(vec![]), "cHJpdmF0ZQ==", PEER_KEY);
        let expected = format!(
            "[Interface]\nAddress = 10.10.0.1/24\nSaveConfig = true\nPreUp =\nPostUp =\nPreDown =\nPostDown =\n\
             ListenPort = 51820\nPrivateKey = cHJpdmF0ZQ==\n\n[Peer]\nPublicKey = {PEER_KEY}\nAllowedIPs = 10.10.0.2/32\n"
        );
        assert_eq!(doc, expected);
    }

    #[test]
    fn one_peer_block_per_configured_peer() {
        let mut backup = site_peer(None, None);
        backup.public_key = "YmJiYmJiYmJiYmJiYmJiYmJiYmJiYmJiYmJiYmJiYmI=".into();
        let peers = vec![site_peer(Some("site.example.com:51820"), Some(25)), backup];
        let doc = render_document(&params(peers), "cHJpdmF0ZQ==", PEER_KEY);

        assert_eq!(doc.matches("[Interface]").count(), 1);
        assert_eq!(doc.matches("[Peer]").count(), 3);
        assert_eq!(doc.matches("Endpoint = site.example.com:51820").count(), 1);
        assert_eq!(doc.matches("PersistentKeepalive = 25").count(), 1);
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        let run = params(vec![site_peer(Some(""), Some(0))]);
        let doc = render_document(&run, "cHJpdmF0ZQ==", PEER_KEY);
        assert!(!doc.contains("Endpoint"));
        assert!(!doc.contains("PersistentKeepalive"));
    }

    #[test]
    fn primary_peer_comes_first() {
        let doc = render_document(&params(vec![site_peer(None, None)]), "cHJpdmF0ZQ==", PEER_KEY);
        let primary = doc.find(PEER_KEY).unwrap();
        let site = doc.find("192.168.50.0/24").unwrap();
        assert!(primary < site);
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("APW1.conf");
        write_document(&path, "[Interface]\n").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[Interface]\n");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp file must be renamed away");
    }

    #[test]
    fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("APW1.conf");
        std::fs::write(&path, "old").unwrap();
        write_document(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }
}
