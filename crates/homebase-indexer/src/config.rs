use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use homebase_common::db::PoolSettings;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Network {
    Mainnet,
    Testnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum App {
    Homebase,
    Afterme,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One poller task feeding a pool of workers
    Pipeline,
    /// Poll and handle in one loop
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Postgres,
    /// Nothing persists; for dry runs
    Memory,
}

/// Root contract addresses given on the command line. Each one takes
/// precedence over the matching field of the stored configuration documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootAddresses {
    pub wrapper: Option<Address>,
    pub wrapper_w: Option<Address>,
    pub will_factory: Option<Address>,
}

impl RootAddresses {
    pub fn has_homebase(&self) -> bool {
        self.wrapper.is_some() || self.wrapper_w.is_some()
    }
}

/// Per-network endpoint and document locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkProfile {
    pub rpc_url: &'static str,
    /// Document id under `contracts/` and `networks/`
    pub config_doc: &'static str,
    pub daos_collection: &'static str,
    pub wills_collection: &'static str,
}

impl Network {
    pub fn profile(self) -> NetworkProfile {
        match self {
            Network::Mainnet => NetworkProfile {
                rpc_url: "https://node.mainnet.etherlink.com",
                config_doc: "Etherlink",
                daos_collection: "idaosEtherlink",
                wills_collection: "willsEtherlink",
            },
            Network::Testnet => NetworkProfile {
                rpc_url: "https://node.ghostnet.etherlink.com",
                config_doc: "Etherlink-Testnet",
                daos_collection: "idaosEtherlink-Testnet",
                wills_collection: "willsEtherlink-Testnet",
            },
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "homebase-indexer", about = "Indexes Homebase governance and AfterMe wills into a document store")]
pub struct Cli {
    #[arg(value_enum)]
    pub network: Network,

    #[arg(value_enum, default_value_t = App::All)]
    pub app: App,

    /// Overrides the network's default node
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    #[arg(long, env = "INDEXER_MODE", value_enum, default_value_t = Mode::Pipeline)]
    pub mode: Mode,

    #[arg(long, env = "WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Seconds between poll cycles
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval: u64,

    /// Trailing blocks re-read every cycle
    #[arg(long, env = "BLOCK_WINDOW", default_value_t = 15)]
    pub block_window: u64,

    #[arg(long = "store", env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Postgres)]
    pub store: StoreBackend,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub db_max_connections: u32,

    /// Seconds a single database statement may run
    #[arg(long, env = "DB_STATEMENT_TIMEOUT_SECS", default_value_t = 10)]
    pub db_statement_timeout: u64,

    #[arg(long, env = "RPC_REQUESTS_PER_SECOND", default_value_t = 50)]
    pub rpc_requests_per_second: u32,

    /// Token-based organization factory; overrides `wrapper` in contracts/<network>
    #[arg(long, env = "HOMEBASE_WRAPPER")]
    pub wrapper: Option<Address>,

    /// Wrapped-token organization factory; overrides `wrapper_w` in contracts/<network>
    #[arg(long, env = "HOMEBASE_WRAPPER_W")]
    pub wrapper_w: Option<Address>,

    /// Will factory; overrides `sourceContractAddress` in networks/<network>
    #[arg(long, env = "AFTERME_SOURCE")]
    pub will_factory: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub app: App,
    pub profile: NetworkProfile,
    pub rpc_url: String,
    pub mode: Mode,
    pub workers: usize,
    pub poll_interval: Duration,
    pub block_window: u64,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub pool: PoolSettings,
    pub rpc_requests_per_second: u32,
    pub roots: RootAddresses,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let profile = cli.network.profile();

        if cli.workers == 0 && cli.mode == Mode::Pipeline {
            bail!("--workers must be at least 1 in pipeline mode");
        }
        if cli.store == StoreBackend::Postgres {
            cli.database_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .context("DATABASE_URL must be set when using the postgres store")?;
        }

        Ok(Self {
            network: cli.network,
            app: cli.app,
            profile,
            rpc_url: cli.rpc_url.unwrap_or_else(|| profile.rpc_url.to_string()),
            mode: cli.mode,
            workers: cli.workers,
            poll_interval: Duration::from_secs(cli.poll_interval),
            block_window: cli.block_window,
            store: cli.store,
            database_url: cli.database_url,
            pool: PoolSettings {
                max_connections: cli.db_max_connections,
                statement_timeout: Duration::from_secs(cli.db_statement_timeout),
                ..PoolSettings::default()
            },
            rpc_requests_per_second: cli.rpc_requests_per_second,
            roots: RootAddresses {
                wrapper: cli.wrapper,
                wrapper_w: cli.wrapper_w,
                will_factory: cli.will_factory,
            },
        })
    }

    pub fn run_homebase(&self) -> bool {
        matches!(self.app, App::Homebase | App::All)
    }

    pub fn run_afterme(&self) -> bool {
        matches!(self.app, App::Afterme | App::All)
    }

    #[cfg(test)]
    pub fn for_tests(network: Network, app: App) -> Self {
        let profile = network.profile();
        Self {
            network,
            app,
            profile,
            rpc_url: profile.rpc_url.to_string(),
            mode: Mode::Sequential,
            workers: 1,
            poll_interval: Duration::from_millis(10),
            block_window: 15,
            store: StoreBackend::Memory,
            database_url: None,
            pool: PoolSettings::default(),
            rpc_requests_per_second: 50,
            roots: RootAddresses::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["homebase-indexer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_positional_network_and_app() {
        let cli = parse(&["testnet", "afterme", "--store", "memory"]);
        assert_eq!(cli.network, Network::Testnet);
        assert_eq!(cli.app, App::Afterme);

        let cli = parse(&["mainnet", "--store", "memory"]);
        assert_eq!(cli.app, App::All);
    }

    #[test]
    fn test_rejects_unknown_network() {
        assert!(Cli::try_parse_from(["homebase-indexer", "devnet"]).is_err());
    }

    #[test]
    fn test_profile_drives_defaults() {
        let mut cli = parse(&["testnet", "--store", "memory"]);
        cli.rpc_url = None;
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.rpc_url, "https://node.ghostnet.etherlink.com");
        assert_eq!(config.profile.daos_collection, "idaosEtherlink-Testnet");
        assert_eq!(config.profile.config_doc, "Etherlink-Testnet");
        assert!(config.run_homebase() && config.run_afterme());
    }

    #[test]
    fn test_rpc_override() {
        let cli = parse(&["mainnet", "--store", "memory", "--rpc-url", "http://localhost:8545"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8545");
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let mut cli = parse(&["mainnet", "--store", "postgres"]);
        cli.database_url = None;
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn test_pipeline_requires_workers() {
        let mut cli = parse(&["mainnet", "--store", "memory"]);
        cli.workers = 0;
        cli.mode = Mode::Pipeline;
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn test_root_address_flags() {
        let cli = parse(&[
            "testnet",
            "--store",
            "memory",
            "--wrapper",
            "0x1111111111111111111111111111111111111111",
            "--will-factory",
            "0x3333333333333333333333333333333333333333",
        ]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.roots.wrapper, Some(Address::repeat_byte(0x11)));
        assert_eq!(config.roots.wrapper_w, None);
        assert_eq!(config.roots.will_factory, Some(Address::repeat_byte(0x33)));
        assert!(config.roots.has_homebase());

        assert!(Cli::try_parse_from(["homebase-indexer", "testnet", "--wrapper", "0xnope"]).is_err());
    }

    #[test]
    fn test_pool_settings_from_flags() {
        let cli = parse(&["mainnet", "--store", "memory", "--db-max-connections", "5", "--db-statement-timeout", "3"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.pool.max_connections, 5);
        assert_eq!(config.pool.statement_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_app_selection() {
        let config = Config::for_tests(Network::Mainnet, App::Homebase);
        assert!(config.run_homebase());
        assert!(!config.run_afterme());
    }
}
