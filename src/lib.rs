pub mod auth;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod http;
pub mod isolate;
pub mod launch;
pub mod manifest;
pub mod platform;
pub mod reference;
pub mod registry;
pub mod rootfs;
pub mod runtime;

// Re-export main types and functions for easier testing
pub use auth::AuthToken;
pub use config::{RegistryConfig, RetryPolicy};
pub use digest::Digest;
pub use error::{Error, Result};
pub use fetch::{FetchedLayer, LayerFetcher};
pub use isolate::{IsolationBackend, Isolator, NoopBackend};
#[cfg(target_os = "linux")]
pub use isolate::{LinuxBackend, default_backend};
pub use launch::{ChildProcess, ProcessLauncher};
pub use manifest::{Manifest, ManifestList, resolve_manifest, select_platform};
pub use platform::Platform;
pub use reference::ImageReference;
pub use registry::{HttpRegistry, Registry};
pub use rootfs::{Workspace, assemble};
pub use runtime::{RunOptions, RunState, Stage, pull_image, run_container, supervise};
