//! Epoch-based supervision of a hot-restartable data-plane proxy.
//!
//! The [`Supervisor`] tracks every running proxy epoch and its
//! configuration. Applying a configuration change launches a new proxy
//! process whose restart epoch is exactly one greater than the highest
//! epoch currently running; it is up to the proxy's own hot-restart
//! handshake to let older epochs hand over their listeners and exit. The
//! supervisor never terminates an older epoch on a successful rollover; it
//! requests aborts only when the newest epoch dies (cascading failure) or
//! after the drain period on shutdown.
//!
//! A [`Proxy`] supplies two operations: `run`, which starts one epoch and
//! blocks until that process exits while observing its abort channel, and
//! `cleanup`, which is invoked exactly once after a run returns and must
//! not block, since it executes on the supervisor's control loop.
//!
//! The control loop is strictly single-threaded: it alone mutates the
//! desired and current configurations, the epoch counter, and the
//! abort-channel map. Per-epoch runs execute as background tasks and
//! communicate only through the status channel and their abort channel.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod command;
mod proxy;
mod supervisor;

pub use self::{
    command::CommandProxy,
    proxy::{Aborted, AbortRx, Epoch, Proxy, ProxyConfig},
    supervisor::Supervisor,
};
