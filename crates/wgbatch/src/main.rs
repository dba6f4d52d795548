use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use wgbatch::config::{self, Defaults};
use wgbatch::keys::{NativeKeys, WgToolKeys};
use wgbatch::lifecycle::CurrentPlatform;
use wgbatch::params::{RunParameters, RunRequest};
use wgbatch::run;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Keygen {
    /// Generate keys in-process
    Native,
    /// Shell out to `wg genkey` / `wg pubkey`
    Wg,
}

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "Batch-create WireGuard interfaces and register them with WGDashboard")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Interface name prefix
    #[arg(short, long)]
    prefix: Option<String>,

    /// First instance number
    #[arg(short, long)]
    start: Option<String>,

    /// Last instance number; its digit count sets the zero padding
    #[arg(short, long)]
    end: Option<String>,

    /// Dashboard API key
    #[arg(short = 'k', long, env = "WGBATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Directory the interface configs are written to
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Interface address, comma separated CIDRs
    #[arg(short, long)]
    address: Option<String>,

    /// Interface listen port
    #[arg(short = 'l', long)]
    port: Option<u16>,

    /// AllowedIPs of the generated peer
    #[arg(short = 'i', long)]
    allowed_ips: Option<String>,

    /// Peer display name in the dashboard (defaults to the instance name)
    #[arg(long)]
    peer_name: Option<String>,

    /// Server endpoint written into client configs
    #[arg(long)]
    endpoint: Option<String>,

    /// DNS written into client configs
    #[arg(long)]
    peer_dns: Option<String>,

    #[arg(long)]
    peer_mtu: Option<u32>,

    #[arg(long)]
    peer_keepalive: Option<u32>,

    /// AllowedIPs written into client configs
    #[arg(long)]
    endpoint_allowed_ips: Option<String>,

    /// Dashboard base URL, e.g. http://127.0.0.1:10086
    #[arg(long)]
    dashboard_url: Option<String>,

    /// systemd unit of the dashboard
    #[arg(long)]
    dashboard_service: Option<String>,

    /// Delete in-range configs before generating
    #[arg(long)]
    delete_existing: bool,

    /// Bring down and delete in-range configs, then exit
    #[arg(long, conflicts_with = "delete_existing")]
    delete_only: bool,

    /// Log what would happen without touching anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Restart the dashboard service before registering peers
    #[arg(long)]
    restart_dashboard: bool,

    /// Seconds to wait before each interface activation
    #[arg(long)]
    throttle_secs: Option<u64>,

    /// Seconds to wait between activation and registration
    #[arg(long)]
    settle_secs: Option<u64>,

    /// Key generation backend
    #[arg(long, value_enum, default_value_t = Keygen::Native)]
    keygen: Keygen,
}

impl Args {
    /// Turn the parsed flags into a request, prompting on stdin for required
    /// values that were not given.
    fn into_request(self) -> io::Result<RunRequest> {
        Ok(RunRequest {
            prefix: or_prompt(self.prefix, "Interface prefix")?,
            start: or_prompt(self.start, "Start number")?,
            end: or_prompt(self.end, "End number")?,
            api_key: or_prompt(self.api_key, "Dashboard API key")?,
            overrides: Defaults {
                address: self.address,
                listen_port: self.port,
                peer_allowed_ips: self.allowed_ips,
                target_dir: self.dir,
                peer_name: self.peer_name,
                server_endpoint: self.endpoint,
                peer_dns: self.peer_dns,
                endpoint_allowed_ips: self.endpoint_allowed_ips,
                peer_mtu: self.peer_mtu,
                peer_keepalive: self.peer_keepalive,
                dashboard_url: self.dashboard_url,
                dashboard_service: self.dashboard_service,
            },
            delete_existing: self.delete_existing,
            delete_only: self.delete_only,
            dry_run: self.dry_run,
            restart_dashboard: self.restart_dashboard,
            throttle_secs: self.throttle_secs,
            settle_secs: self.settle_secs,
        })
    }
}

fn or_prompt(value: Option<String>, label: &str) -> io::Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    let mut stdout = io::stdout().lock();
    write!(stdout, "{label}: ")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    info!(config = %args.config.display(), version = env!("GIT_VERSION"), "starting wgbatch");

    let file = config::load(&args.config).await?;
    let keygen = args.keygen;
    let params = RunParameters::resolve(args.into_request()?, file)?;

    let client = reqwest::Client::new();
    let report = match keygen {
        Keygen::Native => run::execute::<CurrentPlatform, _>(&client, &params, &NativeKeys).await?,
        Keygen::Wg => run::execute::<CurrentPlatform, _>(&client, &params, &WgToolKeys).await?,
    };

    print!("{report}");
    Ok(())
}
