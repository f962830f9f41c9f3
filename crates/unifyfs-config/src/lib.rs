//! Deployment configuration for a delegator process (spec.md §6, ambient
//! component A3): the knobs the original takes from its MPI-bootstrap
//! environment and a handful of config-file settings are here unified into
//! one TOML file plus CLI/env overrides, following the teacher's
//! `ServiceArgs` pattern (`data-plane-controller::service::ServiceArgs`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

pub type DelegatorId = u32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reading config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("delegator id {0} in --delegator-id is not present in the configured roster")]
    DelegatorNotInRoster(DelegatorId),
    #[error("delegator_id must be set via --delegator-id or the config file")]
    MissingDelegatorId,
    #[error("listen_addr must be set via --listen-addr or the config file")]
    MissingListenAddr,
}

pub type Result<T> = std::result::Result<T, Error>;

/// CLI surface for the delegator binary. Mirrors the teacher's
/// `ServiceArgs`: a small number of `#[clap(long, env = "...")]` fields
/// that either stand alone or override the matching field of a loaded
/// [`FileConfig`].
#[derive(clap::Parser, Debug, Serialize)]
pub struct Args {
    /// Path to a `unifyfs.toml` deployment config.
    #[clap(long = "config", env = "UNIFYFS_CONFIG", default_value = "unifyfs.toml")]
    pub config_path: PathBuf,

    /// This process's id within the delegator roster. Overrides the file.
    #[clap(long = "delegator-id", env = "UNIFYFS_DELEGATOR_ID")]
    pub delegator_id: Option<DelegatorId>,

    /// Address to bind the gRPC server to. Overrides the file.
    #[clap(long = "listen-addr", env = "UNIFYFS_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,
}

/// The on-disk shape of `unifyfs.toml`. Every field is optional so that a
/// deployment can split settings between the file and the environment;
/// [`Config::load`] fails if a required field is missing from both.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileConfig {
    pub delegator_id: Option<DelegatorId>,
    pub listen_addr: Option<SocketAddr>,

    /// `meta_db_path`: directory for the KV store (spec.md §6).
    pub meta_db_path: Option<PathBuf>,
    /// `meta_db_name`: KV store instance name (spec.md §6).
    pub meta_db_name: Option<String>,
    /// `meta_server_ratio`: one metadata server per N processes (spec.md §6).
    pub meta_server_ratio: Option<u32>,
    /// `meta_range_size`: stripe size in records for KV sharding (spec.md §6).
    pub meta_range_size: Option<u64>,

    /// Static delegator roster: id -> `host:port` gRPC endpoint. Stands in
    /// for the MPI-bootstrap-discovered roster of the original (spec.md §1).
    #[serde(default)]
    pub roster: HashMap<DelegatorId, String>,
}

/// Fully resolved configuration for one delegator process.
#[derive(Debug, Clone)]
pub struct Config {
    pub delegator_id: DelegatorId,
    pub listen_addr: SocketAddr,
    pub meta_db_path: PathBuf,
    pub meta_db_name: String,
    pub meta_server_ratio: u32,
    pub meta_range_size: u64,
    pub roster: HashMap<DelegatorId, String>,
}

impl Config {
    /// Read `args.config_path`, apply `args`' overrides, and validate the
    /// result.
    pub fn load(args: &Args) -> Result<Self> {
        let file = read_file_config(&args.config_path)?;
        Self::resolve(file, args)
    }

    fn resolve(file: FileConfig, args: &Args) -> Result<Self> {
        let delegator_id = args
            .delegator_id
            .or(file.delegator_id)
            .ok_or(Error::MissingDelegatorId)?;
        let listen_addr = args
            .listen_addr
            .or(file.listen_addr)
            .ok_or(Error::MissingListenAddr)?;

        if !file.roster.is_empty() && !file.roster.contains_key(&delegator_id) {
            return Err(Error::DelegatorNotInRoster(delegator_id));
        }

        Ok(Config {
            delegator_id,
            listen_addr,
            meta_db_path: file.meta_db_path.unwrap_or_else(|| PathBuf::from("unifyfs-meta")),
            meta_db_name: file.meta_db_name.unwrap_or_else(|| "unifyfs".to_string()),
            meta_server_ratio: file.meta_server_ratio.unwrap_or(1),
            meta_range_size: file.meta_range_size.unwrap_or(1024),
            roster: file.roster,
        })
    }

    /// This delegator's own endpoint, per its roster entry.
    pub fn own_endpoint(&self) -> Option<&str> {
        self.roster.get(&self.delegator_id).map(String::as_str)
    }

    /// The subset of the roster that also hosts a metadata shard: every
    /// `meta_server_ratio`-th delegator id, in ascending order (spec.md
    /// §6: "`meta_server_ratio`: one metadata server per N processes").
    pub fn shard_delegators(&self) -> Vec<DelegatorId> {
        let mut ids: Vec<DelegatorId> = self.roster.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().step_by(self.meta_server_ratio.max(1) as usize).collect()
    }

    /// Whether this process's own `delegator_id` is one of
    /// [`Config::shard_delegators`], i.e. whether it should also serve the
    /// `ExtentShard` RPC surface alongside `Delegator`.
    pub fn hosts_metadata_shard(&self) -> bool {
        self.shard_delegators().contains(&self.delegator_id)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}
