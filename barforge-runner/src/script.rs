//! Driver generation: a configuration record plus a shell script that replays it.
//!
//! The script carries no logic of its own; it hands the TOML file to
//! `barforge run`.

use barforge_core::config::PipelineConfig;
use barforge_core::error::Result;
use barforge_core::sidecar::ENGINE_VERSION;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "barforge.toml";
pub const SCRIPT_FILE: &str = "run_barforge.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverScript {
    pub config_toml: String,
    pub shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPaths {
    pub config: PathBuf,
    pub script: PathBuf,
}

/// Render the driver pair. Relative paths in `config` are resolved against
/// the current directory, since the script runs from its own directory.
pub fn render_driver(config: &PipelineConfig) -> Result<DriverScript> {
    let cwd = std::env::current_dir()?;
    let mut config = config.clone();
    config.source_path = anchor(&cwd, &config.source_path);
    config.output_directory = anchor(&cwd, &config.output_directory);
    let record = config.to_toml_string()?;
    let config_toml = format!("# barforge {ENGINE_VERSION} pipeline configuration\n{record}");
    let shell = format!(
        "#!/bin/sh\n\
         # barforge {ENGINE_VERSION} driver\n\
         set -eu\n\
         cd \"$(dirname \"$0\")\"\n\
         exec barforge run --config {CONFIG_FILE} \"$@\"\n"
    );
    Ok(DriverScript { config_toml, shell })
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Write both files into `dir`, creating it if needed.
pub fn write_driver(config: &PipelineConfig, dir: &Path) -> Result<DriverPaths> {
    let driver = render_driver(config)?;
    fs::create_dir_all(dir)?;
    let paths = DriverPaths {
        config: dir.join(CONFIG_FILE),
        script: dir.join(SCRIPT_FILE),
    };
    fs::write(&paths.config, driver.config_toml)?;
    fs::write(&paths.script, driver.shell)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&paths.script, fs::Permissions::from_mode(0o755))?;
    }
    log::info!("driver written to {}", dir.display());
    Ok(paths)
}
