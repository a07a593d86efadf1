//! ddal command-line tool
//!
//! Routes one SQL statement with the reference rule engine and the override
//! store described by a `ddal.toml` file, then prints the rewritten SQL.
//!
//! ```bash
//! ddal --config ddal.toml --param 1=42 "SELECT * FROM orders WHERE uid = ?"
//! ddal --config ddal.toml --format json "DELETE FROM orders WHERE uid IN (1, 5)"
//! ddal -c ddal.toml -p 1=42 --validate 1=46 "UPDATE orders SET v = 1 WHERE uid = ?"
//! ```

pub mod args;
pub mod error;
pub mod logging;
pub mod report;

use std::path::Path;

use ddal_configs::DdalConfig;

pub use args::{Cli, OutputFormat};
pub use error::{CliError, Result};
pub use report::{execute, render, RouteReport};

/// Load the configuration file, or the built-in defaults without one.
pub fn load_config(path: Option<&Path>) -> Result<DdalConfig> {
    match path {
        Some(path) => DdalConfig::from_file(path).map_err(|e| CliError::Config(format!("{:#}", e))),
        None => Ok(DdalConfig::default()),
    }
}
