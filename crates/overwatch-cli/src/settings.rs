//! Effective configuration for the binary.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file,
//! then `OVERWATCH_<SECTION>_<KEY>` variables (including any loaded from
//! `.env`).

use overwatch_core::{OverwatchConfig, OverwatchError, OverwatchResult};
use std::path::Path;
use tracing::{info, warn};

/// File read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "overwatch.toml";

/// Load the config file at `path` and apply environment overrides.
///
/// A missing file is only an error when the operator named it explicitly;
/// otherwise the defaults are used.
pub fn load<I>(path: &Path, explicit: bool, vars: I) -> OverwatchResult<OverwatchConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut config = match std::fs::read_to_string(path) {
        Ok(source) => {
            info!(path = %path.display(), "Loaded config file");
            OverwatchConfig::from_toml(&source)?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            OverwatchConfig::default()
        }
        Err(e) => {
            return Err(OverwatchError::Config(format!(
                "failed to read config '{}': {e}",
                path.display()
            )))
        }
    };

    let applied = config.apply_env(vars)?;
    if !applied.is_empty() {
        info!(overrides = ?applied, "Applied environment overrides");
    }
    Ok(config)
}

/// Render the effective configuration as TOML.
pub fn render(config: &OverwatchConfig) -> OverwatchResult<String> {
    toml::to_string_pretty(config)
        .map_err(|e| OverwatchError::Config(format!("failed to render config: {e}")))
}
