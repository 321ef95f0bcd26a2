//! Immutable runtime configuration, built once from argv before any thread
//! is spawned (per the "Global configuration" design note: all `jm_*`/`tm_*`
//! values are process-wide and read by many threads thereafter).

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Transport mode for the TM server's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TmMode {
    Tcp,
    Uds,
}

/// How a TM publishes its reachable address into the shared registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Announce {
    None,
    CatNodes,
    File,
}

/// `--key=value` flags shared by all three agents (`jm`, `tm`, `se`).
#[derive(Debug, Clone, Parser)]
pub struct SharedFlags {
    /// Opaque job-id exchanged during the handshake.
    #[arg(long, default_value = "spits-job")]
    pub jobid: String,

    /// Write a log file in addition to stderr.
    #[arg(long)]
    pub log: Option<String>,

    /// Verbose logging.
    #[arg(long)]
    pub verbose: bool,

    /// Enable profiling counters (consumed by the out-of-scope profiler;
    /// only parsed and threaded through here).
    #[arg(long)]
    pub profiling: bool,

    /// Connect deadline in seconds.
    #[arg(long, default_value_t = 5)]
    pub ctimeout: u64,

    /// Per-operation read/write deadline in seconds.
    #[arg(long, default_value_t = 10)]
    pub rtimeout: u64,

    /// Send deadline in seconds.
    #[arg(long, default_value_t = 10)]
    pub stimeout: u64,
}

/// Job Manager CLI flags, per spec §6.4.
#[derive(Debug, Clone, Parser)]
#[command(name = "jm", trailing_var_arg = true)]
pub struct JmArgs {
    #[command(flatten)]
    pub shared: SharedFlags,

    /// Send a `terminate` to every registered TM after the run completes.
    #[arg(long)]
    pub killtms: bool,

    /// Connect deadline in seconds for the heartbeat sweep's own
    /// connections, distinct from `ctimeout` (used for push/pull).
    #[arg(long, default_value_t = 600)]
    pub htimeout: u64,

    /// Committer/pusher backoff in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub rbackoff: u64,
    #[arg(long, default_value_t = 250)]
    pub sbackoff: u64,

    /// Memory-stats sampling (out of scope; parsed and ignored).
    #[arg(long)]
    pub memstat: bool,
    #[arg(long, default_value_t = 0)]
    pub rinterv: u64,
    #[arg(long, default_value_t = 0)]
    pub subsamp: u64,

    /// Heartbeat sweep cadence in seconds.
    #[arg(long, default_value_t = 30)]
    pub heartbeat_interval: u64,

    /// Path to the dynamically loadable computation module.
    pub module_path: String,

    /// Remaining argv, forwarded verbatim to the module.
    #[arg(allow_hyphen_values = true)]
    pub module_args: Vec<String>,
}

impl JmArgs {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.ctimeout)
    }
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.rtimeout)
    }
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.stimeout)
    }
    pub fn recv_backoff(&self) -> Duration {
        Duration::from_millis(self.rbackoff)
    }
    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.sbackoff)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
    /// The heartbeat connection's own connect deadline, distinct from
    /// `ctimeout` (used for the push/pull connections).
    pub fn htimeout(&self) -> Duration {
        Duration::from_secs(self.htimeout)
    }
}

/// Task Manager CLI flags, per spec §6.4.
#[derive(Debug, Clone, Parser)]
#[command(name = "tm", trailing_var_arg = true)]
pub struct TmArgs {
    #[command(flatten)]
    pub shared: SharedFlags,

    #[arg(long, value_enum, default_value_t = TmMode::Tcp)]
    pub tmmode: TmMode,

    #[arg(long, default_value = "0.0.0.0")]
    pub tmaddr: String,

    #[arg(long, default_value_t = 0)]
    pub tmport: u16,

    /// Path to the Unix domain socket, used when `tmmode=uds`.
    #[arg(long, default_value = "./spits.sock")]
    pub tmsock: String,

    /// Worker thread count; defaults to the CPU count when absent.
    #[arg(long)]
    pub nw: Option<usize>,

    /// Extra queue slack beyond `nw`.
    #[arg(long, default_value_t = 0)]
    pub overfill: usize,

    #[arg(long, value_enum, default_value_t = Announce::None)]
    pub announce: Announce,

    /// Idle timeout in seconds before the TM exits.
    #[arg(long, default_value_t = 600)]
    pub tm_timeout: u64,

    pub module_path: String,
    #[arg(allow_hyphen_values = true)]
    pub module_args: Vec<String>,
}

impl TmArgs {
    pub fn max_threads(&self) -> usize {
        self.nw.unwrap_or_else(num_cpus::get)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.ctimeout)
    }
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.rtimeout)
    }
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.stimeout)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tm_timeout)
    }
}

/// Single-executor flags: runs JM and TM logic in one process against the
/// in-memory static module, bypassing the network entirely. Out of scope
/// per §1 ("an alternate in-process 'single executor' mode" is listed as an
/// external collaborator) — this binary exists only so the ambient CLI
/// surface in §6.4 is complete; it delegates straight to the static module.
#[derive(Debug, Clone, Parser)]
#[command(name = "se", trailing_var_arg = true)]
pub struct SeArgs {
    #[command(flatten)]
    pub shared: SharedFlags,

    pub module_path: String,
    #[arg(allow_hyphen_values = true)]
    pub module_args: Vec<String>,
}
