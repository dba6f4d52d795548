use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use thiserror::Error;
use tracing::debug;

use crate::config::{self, ConfigError, Defaults, FileConfig, StaticPeer, Timing};
use crate::dashboard::Dashboard;
use crate::plan::{self, InstanceName, PROTECTED_PREFIX};

const DEFAULT_TARGET_DIR: &str = "/etc/wireguard";
const DEFAULT_DASHBOARD_SERVICE: &str = "wg-dashboard";
const DEFAULT_PEER_MTU: u32 = 1420;
const DEFAULT_PEER_KEEPALIVE: u32 = 21;
const DEFAULT_ENDPOINT_ALLOWED_IPS: &str = "0.0.0.0/0";

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("{field} must be a non-negative number, got {value:?}")]
    NotNumeric { field: &'static str, value: String },

    #[error("start ({start}) must not be greater than end ({end})")]
    InvertedRange { start: u32, end: u32 },

    #[error("prefix must not start with the reserved '{PROTECTED_PREFIX}'")]
    ReservedPrefix,

    #[error("{0:?} is not a valid interface name")]
    InvalidInterfaceName(String),

    #[error("{field}: {value:?} is not a valid CIDR list")]
    InvalidCidr { field: &'static str, value: String },

    #[error("invalid dashboard url {0:?}")]
    InvalidUrl(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Provision,
    /// Tear down and remove the configs of the range.
    Deprovision,
}

/// Values the dashboard writes into the client-side config of each peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Display name; empty means "use the instance name".
    pub peer_name: String,
    pub dns: String,
    pub allowed_ips: String,
    pub mtu: u32,
    pub keepalive: u32,
    pub server_endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    /// Pause before each activation.
    pub throttle: Duration,
    /// Pause between activation and registration.
    pub settle: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRestart {
    pub service: String,
    pub timeout: Duration,
    pub grace: Duration,
}

/// Raw operator input, after prompting for whatever was missing.
#[derive(Debug, Default)]
pub struct RunRequest {
    pub prefix: String,
    pub start: String,
    pub end: String,
    pub api_key: String,
    /// Flag values; each `Some` wins over the config file.
    pub overrides: Defaults,
    pub delete_existing: bool,
    pub delete_only: bool,
    pub dry_run: bool,
    pub restart_dashboard: bool,
    pub throttle_secs: Option<u64>,
    pub settle_secs: Option<u64>,
}

/// Fully resolved and validated settings of one run.
#[derive(Debug, Clone)]
pub struct RunParameters {
    pub prefix: String,
    pub start: u32,
    pub end: u32,
    pub width: usize,
    pub address: String,
    pub listen_port: u16,
    /// AllowedIPs of the primary peer in the interface config.
    pub peer_allowed_ips: String,
    pub target_dir: PathBuf,
    pub dashboard: Dashboard,
    pub client: ClientSettings,
    pub static_peers: Vec<StaticPeer>,
    pub delete_existing: bool,
    pub dry_run: bool,
    pub mode: Mode,
    pub restart: Option<ServiceRestart>,
    pub timing: SyncTiming,
}

impl RunParameters {
    pub fn resolve(request: RunRequest, file: FileConfig) -> Result<Self, ParamError> {
        let mode = if request.delete_only {
            Mode::Deprovision
        } else {
            Mode::Provision
        };
        let d = merge(request.overrides, file.defaults);

        let prefix = request.prefix.trim().to_string();
        if prefix.is_empty() {
            return Err(ParamError::Missing("prefix"));
        }
        if prefix.starts_with(PROTECTED_PREFIX) {
            return Err(ParamError::ReservedPrefix);
        }

        let start = parse_bound("start", &request.start)?;
        let end = parse_bound("end", &request.end)?;
        if start > end {
            return Err(ParamError::InvertedRange { start, end });
        }
        let width = plan::padding_width(end);
        let widest = InstanceName::new(&prefix, end, width);
        if !plan::is_valid_interface_name(widest.as_str()) {
            return Err(ParamError::InvalidInterfaceName(widest.to_string()));
        }

        let api_key = request.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(ParamError::Missing("api key"));
        }
        let dashboard_url =
            non_empty(d.dashboard_url).ok_or(ParamError::Missing("dashboard_url"))?;
        validate_url(&dashboard_url)?;

        let address = require(mode, "address", non_empty(d.address))?;
        let listen_port = require(mode, "listen_port", d.listen_port)?;
        let peer_allowed_ips = require(mode, "peer_allowed_ips", non_empty(d.peer_allowed_ips))?;
        let server_endpoint = require(mode, "server_endpoint", non_empty(d.server_endpoint))?;
        let endpoint_allowed_ips = non_empty(d.endpoint_allowed_ips)
            .unwrap_or_else(|| DEFAULT_ENDPOINT_ALLOWED_IPS.to_string());

        let static_peers = file.peers;
        if mode == Mode::Provision {
            validate_cidrs("address", &address)?;
            validate_cidrs("peer_allowed_ips", &peer_allowed_ips)?;
            validate_cidrs("endpoint_allowed_ips", &endpoint_allowed_ips)?;
            config::validate_static_peers(&static_peers)?;
            for peer in &static_peers {
                validate_cidrs("peers.allowed_ips", &peer.allowed_ips)?;
            }
        }

        let timing = resolve_timing(&file.timing, request.throttle_secs, request.settle_secs);
        let restart = request.restart_dashboard.then(|| ServiceRestart {
            service: non_empty(d.dashboard_service)
                .unwrap_or_else(|| DEFAULT_DASHBOARD_SERVICE.to_string()),
            timeout: Duration::from_secs(file.timing.restart_timeout_secs),
            grace: Duration::from_secs(file.timing.restart_grace_secs),
        });

        let params = Self {
            prefix,
            start,
            end,
            width,
            address,
            listen_port,
            peer_allowed_ips,
            target_dir: d
                .target_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR)),
            dashboard: Dashboard {
                base_url: dashboard_url,
                api_key,
            },
            client: ClientSettings {
                peer_name: d.peer_name.unwrap_or_default(),
                dns: d.peer_dns.unwrap_or_default(),
                allowed_ips: endpoint_allowed_ips,
                mtu: d.peer_mtu.unwrap_or(DEFAULT_PEER_MTU),
                keepalive: d.peer_keepalive.unwrap_or(DEFAULT_PEER_KEEPALIVE),
                server_endpoint,
            },
            static_peers,
            delete_existing: request.delete_existing,
            dry_run: request.dry_run,
            mode,
            restart,
            timing,
        };
        debug!(?params.mode, prefix = %params.prefix, start, end, "resolved run parameters");
        Ok(params)
    }

    pub fn instance_names(&self) -> Vec<InstanceName> {
        plan::instance_names(&self.prefix, self.start, self.end)
    }
}

fn merge(flags: Defaults, file: Defaults) -> Defaults {
    Defaults {
        address: flags.address.or(file.address),
        listen_port: flags.listen_port.or(file.listen_port),
        peer_allowed_ips: flags.peer_allowed_ips.or(file.peer_allowed_ips),
        target_dir: flags.target_dir.or(file.target_dir),
        peer_name: flags.peer_name.or(file.peer_name),
        server_endpoint: flags.server_endpoint.or(file.server_endpoint),
        peer_dns: flags.peer_dns.or(file.peer_dns),
        endpoint_allowed_ips: flags.endpoint_allowed_ips.or(file.endpoint_allowed_ips),
        peer_mtu: flags.peer_mtu.or(file.peer_mtu),
        peer_keepalive: flags.peer_keepalive.or(file.peer_keepalive),
        dashboard_url: flags.dashboard_url.or(file.dashboard_url),
        dashboard_service: flags.dashboard_service.or(file.dashboard_service),
    }
}

fn resolve_timing(file: &Timing, throttle: Option<u64>, settle: Option<u64>) -> SyncTiming {
    SyncTiming {
        throttle: Duration::from_secs(throttle.unwrap_or(file.throttle_secs)),
        settle: Duration::from_secs(settle.unwrap_or(file.settle_secs)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Settings only provisioning needs fall back to their default when
/// deprovisioning.
fn require<T: Default>(mode: Mode, field: &'static str, value: Option<T>) -> Result<T, ParamError> {
    match (value, mode) {
        (Some(v), _) => Ok(v),
        (None, Mode::Deprovision) => Ok(T::default()),
        (None, Mode::Provision) => Err(ParamError::Missing(field)),
    }
}

/// Accepts leading zeros; rejects signs, whitespace inside, and overflow.
pub fn parse_bound(field: &'static str, value: &str) -> Result<u32, ParamError> {
    let trimmed = value.trim();
    let not_numeric = || ParamError::NotNumeric {
        field,
        value: value.to_string(),
    };
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_numeric());
    }
    trimmed.parse().map_err(|_| not_numeric())
}

pub fn validate_cidrs(field: &'static str, value: &str) -> Result<(), ParamError> {
    let invalid = || ParamError::InvalidCidr {
        field,
        value: value.to_string(),
    };
    let mut count = 0;
    for part in value.split(',').map(str::trim) {
        IpNetwork::from_str(part).map_err(|_| invalid())?;
        count += 1;
    }
    if count == 0 {
        return Err(invalid());
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), ParamError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ParamError::InvalidUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn request(start: &str, end: &str) -> RunRequest {
        RunRequest {
            prefix: "APW".into(),
            start: start.into(),
            end: end.into(),
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
        }
    }

    fn resolve(req: RunRequest) -> Result<RunParameters, ParamError> {
        RunParameters::resolve(req, FileConfig::default())
    }

    #[test_case("1", "10"; "plain")]
    #[test_case("001", "010"; "leading zeros")]
    fn padded_ranges_are_equivalent(start: &str, end: &str) {
        let params = resolve(request(start, end)).unwrap();
        assert_eq!((params.start, params.end, params.width), (1, 10, 2));
        let names = params.instance_names();
        assert_eq!(names.first().unwrap().as_str(), "APW01");
        assert_eq!(names.last().unwrap().as_str(), "APW10");
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            resolve(request("5", "3")),
            Err(ParamError::InvertedRange { start: 5, end: 3 })
        ));
    }

    #[test_case("abc"; "letters")]
    #[test_case("-1"; "negative")]
    #[test_case(""; "empty")]
    #[test_case("1.5"; "decimal")]
    #[test_case("99999999999"; "overflow")]
    fn non_numeric_bounds_are_rejected(value: &str) {
        assert!(matches!(
            resolve(request(value, "10")),
            Err(ParamError::NotNumeric { field: "start", .. })
        ));
    }

    #[test]
    fn reserved_prefix_is_rejected() {
        let mut req = request("1", "2");
        req.prefix = "_special".into();
        assert!(matches!(resolve(req), Err(ParamError::ReservedPrefix)));
    }

    #[test]
    fn overlong_interface_name_is_rejected() {
        let mut req = request("1", "100");
        req.prefix = "averylongprefix".into();
        assert!(matches!(resolve(req), Err(ParamError::InvalidInterfaceName(_))));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let mut req = request("1", "2");
        req.api_key = "  ".into();
        assert!(matches!(resolve(req), Err(ParamError::Missing("api key"))));
    }

    #[test]
    fn missing_address_is_rejected_only_when_provisioning() {
        let mut req = request("1", "2");
        req.overrides.address = None;
        assert!(matches!(resolve(req), Err(ParamError::Missing("address"))));

        let mut req = request("1", "2");
        req.overrides.address = None;
        req.delete_only = true;
        let params = resolve(req).unwrap();
        assert_eq!(params.mode, Mode::Deprovision);
    }

    #[test_case("10.0.0.1/24", true; "single")]
    #[test_case("10.0.0.1/24, fd00::1/64", true; "dual stack")]
    #[test_case("10.0.0.2", true; "bare address")]
    #[test_case("10.0.0.0/33", false; "prefix too long")]
    #[test_case("10.0.0.0/24,", false; "trailing comma")]
    #[test_case("vpn.example.com", false; "hostname")]
    fn cidr_lists(value: &str, ok: bool) {
        assert_eq!(validate_cidrs("address", value).is_ok(), ok);
    }

    #[test]
    fn flags_override_file_values() {
        let mut file = FileConfig::default();
        file.defaults.listen_port = Some(40000);
        file.defaults.peer_dns = Some("9.9.9.9".into());
        file.timing.settle_secs = 5;

        let mut req = request("1", "1");
        req.settle_secs = Some(0);
        let params = RunParameters::resolve(req, file).unwrap();

        assert_eq!(params.listen_port, 51820, "flag wins");
        assert_eq!(params.client.dns, "9.9.9.9", "file fills the gap");
        assert_eq!(params.timing.settle, Duration::ZERO);
        assert_eq!(params.timing.throttle, Duration::from_secs(3));
        assert_eq!(params.client.mtu, DEFAULT_PEER_MTU);
        assert_eq!(params.target_dir, PathBuf::from(DEFAULT_TARGET_DIR));
    }

    #[test]
    fn restart_uses_configured_service() {
        let mut file = FileConfig::default();
        file.defaults.dashboard_service = Some("wgdashboard".into());
        let mut req = request("1", "1");
        req.restart_dashboard = true;

        let params = RunParameters::resolve(req, file).unwrap();
        let restart = params.restart.unwrap();
        assert_eq!(restart.service, "wgdashboard");
        assert_eq!(restart.timeout, Duration::from_secs(15));
    }

    #[test]
    fn invalid_dashboard_url_is_rejected() {
        let mut req = request("1", "1");
        req.overrides.dashboard_url = Some("ftp://dashboard".into());
        assert!(matches!(resolve(req), Err(ParamError::InvalidUrl(_))));
    }
}
