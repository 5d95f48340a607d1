//! ---
//! vms_section: "01-core-functionality"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Shared primitives and utilities for the bus runtime."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
//! Shared primitives for the VMS bus workspace.
//! This crate exposes configuration loading, logging setup, and version
//! metadata consumed by the protocol, dispatcher, and CLI crates.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, ChannelConfig, DispatcherConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    SubscribeAllScope, TrailingDataPolicy,
};
pub use logging::{init_cli, init_tracing, LogFormat};
pub use version::VersionInfo;
