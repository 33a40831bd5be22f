use std::net::{Ipv4Addr, SocketAddrV4};

use clap::{Args, Parser, Subcommand, ValueEnum};
use domain::common::entity::Protocol;
use domain::virtualserver::entity::{ForwardMethod, ServiceKey};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::{DEFAULT_CONFIG_PATH, DEFAULT_CONTROL_SOCKET, DEFAULT_HTTP_PORT};

#[derive(Parser, Debug)]
#[command(
    name = "ipvsd",
    about = "IPVS control daemon and administration tool",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Control socket of a running daemon
    #[arg(long, default_value = DEFAULT_CONTROL_SOCKET, env = "IPVSD_SOCKET", global = true)]
    pub socket: String,

    /// API key for authenticated HTTP requests
    #[arg(long, env = "IPVSD_TOKEN", global = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Table,
    /// JSON
    Json,
}

/// Connection parameters for the daemon's HTTP API.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Daemon API host
    #[arg(long, global = true, default_value = "127.0.0.1", env = "IPVSD_HOST")]
    pub host: String,

    /// Daemon API port
    #[arg(long, global = true, default_value_t = DEFAULT_HTTP_PORT, env = "IPVSD_PORT")]
    pub port: u16,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Display version information
    Version,

    /// Manage virtual services
    #[command(subcommand)]
    Service(ServiceCommand),

    /// Manage real servers of a virtual service
    #[command(subcommand)]
    Dest(DestCommand),

    /// List virtual services and their real servers
    List {
        #[command(flatten)]
        target: ServiceTarget,
    },

    /// Remove every virtual service
    Flush,

    /// Zero the counters of one service, or of all services
    Zero {
        #[command(flatten)]
        target: ServiceTarget,
    },

    /// Connection timeouts
    #[command(subcommand)]
    Timeout(TimeoutCommand),

    /// Connection-sync daemon state
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Show protocol version and table sizes
    Info,

    /// Read or change runtime tunables (HTTP API)
    Tunables(TunablesArgs),

    /// Query running daemon status (HTTP API)
    Status {
        #[command(flatten)]
        conn: ConnectionArgs,
    },
}

// ── Services ────────────────────────────────────────────────────────────

/// Names a virtual service by `-t`, `-u` or `-f`.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct ServiceTarget {
    /// TCP service address (`a.b.c.d:port`)
    #[arg(short = 't', long)]
    pub tcp_service: Option<SocketAddrV4>,

    /// UDP service address (`a.b.c.d:port`)
    #[arg(short = 'u', long)]
    pub udp_service: Option<SocketAddrV4>,

    /// Firewall-mark service
    #[arg(short = 'f', long)]
    pub fwmark_service: Option<u32>,
}

impl ServiceTarget {
    /// The named service, if any.
    pub fn key(&self) -> Option<ServiceKey> {
        if let Some(sa) = self.tcp_service {
            return Some(ServiceKey::addr(Protocol::Tcp, u32::from(*sa.ip()), sa.port()));
        }
        if let Some(sa) = self.udp_service {
            return Some(ServiceKey::addr(Protocol::Udp, u32::from(*sa.ip()), sa.port()));
        }
        self.fwmark_service
            .map(|mark| ServiceKey::fwmark(Protocol::Tcp, mark))
    }

    pub fn require_key(&self) -> anyhow::Result<ServiceKey> {
        self.key()
            .ok_or_else(|| anyhow::anyhow!("one of -t, -u or -f is required"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServiceOptions {
    #[command(flatten)]
    pub target: ServiceTarget,

    /// Scheduler name
    #[arg(short, long, default_value = "rr")]
    pub scheduler: String,

    /// Persistence timeout in seconds (0 disables persistence)
    #[arg(short, long, default_value_t = 0)]
    pub persistent: u32,

    /// Persistence netmask
    #[arg(short = 'M', long)]
    pub netmask: Option<Ipv4Addr>,
}

#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// Add a virtual service
    Add(ServiceOptions),
    /// Change scheduler or persistence of a virtual service
    Edit(ServiceOptions),
    /// Delete a virtual service and its real servers
    Delete {
        #[command(flatten)]
        target: ServiceTarget,
    },
}

// ── Destinations ────────────────────────────────────────────────────────

/// Forwarding method flag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Forward {
    Masq,
    Tunnel,
    Route,
}

impl From<Forward> for ForwardMethod {
    fn from(f: Forward) -> Self {
        match f {
            Forward::Masq => Self::Masq,
            Forward::Tunnel => Self::Tunnel,
            Forward::Route => Self::DirectRoute,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DestOptions {
    #[command(flatten)]
    pub target: ServiceTarget,

    /// Real server address (`a.b.c.d:port`)
    #[arg(short, long)]
    pub real_server: SocketAddrV4,

    /// Scheduling weight
    #[arg(short, long, default_value_t = 1)]
    pub weight: i32,

    /// Forwarding method
    #[arg(long, default_value = "masq")]
    pub forward: Forward,

    /// Upper connection threshold (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub u_threshold: u32,

    /// Lower connection threshold
    #[arg(long, default_value_t = 0)]
    pub l_threshold: u32,
}

#[derive(Subcommand, Debug)]
pub enum DestCommand {
    /// Add a real server to a virtual service
    Add(DestOptions),
    /// Change weight, forwarding or thresholds of a real server
    Edit(DestOptions),
    /// Remove a real server from a virtual service
    Delete {
        #[command(flatten)]
        target: ServiceTarget,

        /// Real server address (`a.b.c.d:port`)
        #[arg(short, long)]
        real_server: SocketAddrV4,
    },
}

// ── Timeouts ────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum TimeoutCommand {
    /// Show tcp, tcp-fin and udp timeouts
    Get,
    /// Set timeouts in seconds; 0 leaves a value unchanged
    Set {
        #[arg(long, default_value_t = 0)]
        tcp: u32,
        #[arg(long, default_value_t = 0)]
        tcp_fin: u32,
        #[arg(long, default_value_t = 0)]
        udp: u32,
    },
}

// ── Sync daemon ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncRoleArg {
    Master,
    Backup,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Start the master or backup sync role
    Start {
        #[arg(long)]
        role: SyncRoleArg,

        /// Multicast interface (at most 15 bytes)
        #[arg(long, default_value = "eth0")]
        mcast_interface: String,

        #[arg(long, default_value_t = 0)]
        syncid: u8,
    },
    /// Stop a sync role
    Stop {
        #[arg(long)]
        role: SyncRoleArg,
    },
    /// Show both sync roles
    Status,
}

// ── Tunables ────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct TunablesArgs {
    #[command(flatten)]
    pub conn: ConnectionArgs,

    #[command(subcommand)]
    pub command: TunablesCommand,
}

#[derive(Subcommand, Debug)]
pub enum TunablesCommand {
    /// Show every tunable
    Get,
    /// Change one or more tunables
    Set(TunablesSet),
}

#[derive(Args, Debug, Default)]
pub struct TunablesSet {
    /// Low-memory threshold in pages
    #[arg(long)]
    pub amemthresh: Option<u64>,
    #[arg(long)]
    pub am_droprate: Option<u32>,
    /// Defense mode 0..=3
    #[arg(long)]
    pub drop_entry: Option<i64>,
    #[arg(long)]
    pub drop_packet: Option<i64>,
    #[arg(long)]
    pub secure_tcp: Option<i64>,
    #[arg(long)]
    pub cache_bypass: Option<bool>,
    #[arg(long)]
    pub expire_nodest_conn: Option<bool>,
    #[arg(long)]
    pub nat_icmp_send: Option<bool>,
    /// `threshold,period`
    #[arg(long, value_delimiter = ',')]
    pub sync_threshold: Option<Vec<i32>>,
}

/// Parse CLI arguments. Exits with usage on invalid input.
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ipvsd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_no_args_runs_daemon() {
        let cli = parse_from(&[]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert_eq!(cli.socket, DEFAULT_CONTROL_SOCKET);
        assert_eq!(cli.output, OutputFormat::Table);
    }

    #[test]
    fn cli_config_and_log_overrides() {
        let cli = parse_from(&["--config", "/tmp/x.yaml", "--log-level", "debug", "--log-format", "text"]);
        assert_eq!(cli.config, "/tmp/x.yaml");
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Text));
    }

    #[test]
    fn cli_service_add() {
        let cli = parse_from(&["service", "add", "-t", "10.0.0.1:80", "-s", "rr", "-p", "300"]);
        let Some(Command::Service(ServiceCommand::Add(opts))) = cli.command else {
            panic!("expected service add");
        };
        assert_eq!(
            opts.target.key(),
            Some(ServiceKey::addr(Protocol::Tcp, 0x0A00_0001, 80))
        );
        assert_eq!(opts.scheduler, "rr");
        assert_eq!(opts.persistent, 300);
        assert!(opts.netmask.is_none());
    }

    #[test]
    fn cli_service_targets_are_exclusive() {
        let result = Cli::try_parse_from(["ipvsd", "service", "delete", "-t", "10.0.0.1:80", "-f", "3"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_fwmark_and_udp_targets() {
        let cli = parse_from(&["service", "delete", "-f", "7"]);
        let Some(Command::Service(ServiceCommand::Delete { target })) = cli.command else {
            panic!("expected service delete");
        };
        let key = target.require_key().unwrap();
        assert!(key.is_fwmark());
        assert_eq!(key.fwmark, 7);

        let cli = parse_from(&["zero", "-u", "10.0.0.1:53"]);
        let Some(Command::Zero { target }) = cli.command else {
            panic!("expected zero");
        };
        assert_eq!(target.key().unwrap().protocol, Protocol::Udp);
    }

    #[test]
    fn cli_list_without_target() {
        let cli = parse_from(&["list"]);
        let Some(Command::List { target }) = cli.command else {
            panic!("expected list");
        };
        assert!(target.key().is_none());
        assert!(target.require_key().is_err());
    }

    #[test]
    fn cli_dest_add_defaults() {
        let cli = parse_from(&["dest", "add", "-t", "10.0.0.1:80", "-r", "10.0.0.2:8080"]);
        let Some(Command::Dest(DestCommand::Add(opts))) = cli.command else {
            panic!("expected dest add");
        };
        assert_eq!(opts.weight, 1);
        assert_eq!(opts.forward, Forward::Masq);
        assert_eq!(*opts.real_server.ip(), Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn cli_dest_forward_route() {
        let cli = parse_from(&[
            "dest", "edit", "-t", "10.0.0.1:80", "-r", "10.0.0.2:80", "-w", "5", "--forward", "route",
        ]);
        let Some(Command::Dest(DestCommand::Edit(opts))) = cli.command else {
            panic!("expected dest edit");
        };
        assert_eq!(opts.weight, 5);
        assert_eq!(ForwardMethod::from(opts.forward), ForwardMethod::DirectRoute);
    }

    #[test]
    fn cli_timeout_set() {
        let cli = parse_from(&["timeout", "set", "--tcp", "600"]);
        assert!(matches!(
            cli.command,
            Some(Command::Timeout(TimeoutCommand::Set { tcp: 600, tcp_fin: 0, udp: 0 }))
        ));
    }

    #[test]
    fn cli_daemon_start() {
        let cli = parse_from(&["daemon", "start", "--role", "backup", "--mcast-interface", "eth1"]);
        let Some(Command::Daemon(DaemonCommand::Start { role, mcast_interface, syncid })) =
            cli.command
        else {
            panic!("expected daemon start");
        };
        assert_eq!(role, SyncRoleArg::Backup);
        assert_eq!(mcast_interface, "eth1");
        assert_eq!(syncid, 0);
    }

    #[test]
    fn cli_tunables_set() {
        let cli = parse_from(&[
            "tunables", "set", "--secure-tcp", "3", "--sync-threshold", "4,40", "--port", "9090",
        ]);
        let Some(Command::Tunables(args)) = cli.command else {
            panic!("expected tunables");
        };
        assert_eq!(args.conn.port, 9090);
        let TunablesCommand::Set(set) = args.command else {
            panic!("expected set");
        };
        assert_eq!(set.secure_tcp, Some(3));
        assert_eq!(set.sync_threshold, Some(vec![4, 40]));
        assert!(set.amemthresh.is_none());
    }

    #[test]
    fn cli_connection_args_either_side_of_subcommand() {
        let cli = parse_from(&["tunables", "--host", "10.1.1.1", "get", "--port", "9191"]);
        let Some(Command::Tunables(args)) = cli.command else {
            panic!("expected tunables");
        };
        assert_eq!(args.conn.host, "10.1.1.1");
        assert_eq!(args.conn.port, 9191);
        assert!(matches!(args.command, TunablesCommand::Get));

        let cli = parse_from(&["status", "--port", "9292"]);
        let Some(Command::Status { conn }) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(conn.port, 9292);
        assert_eq!(conn.host, "127.0.0.1");
    }

    #[test]
    fn cli_output_json_global() {
        let cli = parse_from(&["list", "--output", "json"]);
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn cli_output_invalid_rejected() {
        assert!(Cli::try_parse_from(["ipvsd", "--output", "xml"]).is_err());
    }
}
