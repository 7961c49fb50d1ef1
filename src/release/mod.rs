//! Published release handling: fetching the core server archive, locating
//! its binary, provisioning ONNX Runtime and bootstrapping the install tool.

pub mod discovery;
pub mod download;
mod fetcher;
mod install_tool;
pub mod layout;
pub mod onnx_runtime;
mod platform;

pub use discovery::{find_server_binary, DiscoveredBinary, DiscoveryMethod};
pub use fetcher::{FetchConfig, FetchError, FetchedRelease, ReleaseFetcher};
pub use install_tool::{InstallTool, ToolError, ToolStatus, DEFAULT_INSTALL_SCRIPT};
pub use layout::{extract_tar_gz, ArchiveLayout};
pub use onnx_runtime::{ensure_onnx_runtime, OnnxRuntimeError};
pub use platform::Platform;
