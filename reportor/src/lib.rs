#![warn(
    unused_extern_crates,
    missing_copy_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![forbid(unsafe_code)]

//! Periodically publishes a node's devices, streams and heartbeat into shared
//! stores so the rest of the fleet can see who owns what and who is alive.

pub mod backend;
pub mod cli;
pub mod encode;
pub mod host;
pub mod identity;
pub mod keys;
pub mod lifecycle;
pub mod publish;
pub mod registry;
pub mod sync;
pub mod trace;
pub mod tracing_ext;

pub use crate::backend::{BackendSet, StoreError};
pub use crate::identity::{IdentityUnavailable, NodeIdentity};
pub use crate::lifecycle::{LifecycleEvent, Reportor};
pub use crate::publish::{PublishReport, Publisher};
pub use crate::registry::{DeviceRegistry, MemoryRegistry, StreamRegistry, StreamSnapshot, SystemInfo};
pub use crate::sync::{start, Registries, ServiceHandle, StartError};
