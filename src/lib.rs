// Library root
// ------------
// The binary (`main.rs`) is a thin shell over these modules.
//
// Module responsibilities:
// - `archive`: packs a source directory into one zip artifact.
// - `api`: authenticated HTTP transport to the CodeThreat service.
// - `scan`: archive + upload, yielding a remote scan job.
// - `monitor`: polls a job through its lifecycle until it is terminal.
// - `pipeline`: submit-then-monitor, the entry point for scanning.
// - `project`: project lookup/creation calls.
// - `config`: layered config (file, then environment).
// - `error`: the typed error kinds every layer returns.
// - `logging` / `ui`: tracing setup and terminal rendering for the CLI.
pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod project;
pub mod scan;
pub mod ui;

pub use error::{Result, ScanError};
pub use monitor::{MonitorConfig, ScanState, ScanStatus};
pub use pipeline::Pipeline;
