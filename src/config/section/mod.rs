//! Configuration section definitions.
//!
//! Each module corresponds to a section of the config file:
//!
//! | Module      | TOML Section   | Purpose                                |
//! |-------------|----------------|----------------------------------------|
//! | `clients`   | `[clients]`    | Client heartbeats, sweeping, refresh   |
//! | `diff`      | `[diff]`       | Diff offload and early stop            |
//! | `listener`  | `[listener]`   | Event batching, reconnect backoff      |
//! | `recompute` | `[recompute]`  | Timeouts and coalesced reruns          |

mod clients;
mod diff;
mod listener;
mod recompute;

pub use clients::ClientsConfig;
pub use diff::DiffConfig;
pub use listener::ListenerConfig;
pub use recompute::RecomputeConfig;
