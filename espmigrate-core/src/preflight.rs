//! Checks that must pass before any board is touched.
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{PreconditionError, Result};
use crate::staging;

/// Runs every environment check: tools, key file and serial port.
///
/// Tool paths in `config` are replaced by the paths they resolved to.
/// The staged-image check is part of [`crate::workflow::MigrationWorkflow::run`]
/// so that it also guards migrations started without the CLI.
pub fn check_environment(config: &mut Config) -> Result<()> {
    check_tools(config)?;
    check_key_file(&config.key_file)?;
    check_port(&config.port, config.baud)?;
    Ok(())
}

/// Resolves a tool path: explicit paths must be files, bare names are looked
/// up on `PATH`.
pub fn resolve_tool(tool: &Path) -> Option<PathBuf> {
    if tool.components().count() > 1 || tool.is_absolute() {
        return tool.is_file().then(|| tool.to_path_buf());
    }
    if tool.is_file() {
        return Some(tool.to_path_buf());
    }
    which::which(tool).ok()
}

/// Fails unless every configured tool, and the interpreter if any, exists.
///
/// Each tool script is rewritten to its resolved path. An interpreter looks
/// its script argument up relative to the working directory, not on `PATH`,
/// so a bare `esptool.py` would otherwise only be found by the check.
pub fn check_tools(config: &mut Config) -> Result<()> {
    if let Some(python) = &config.python {
        let found = resolve_tool(python)
            .ok_or_else(|| PreconditionError::MissingTool(python.clone()))?;
        log::debug!("using interpreter {}", found.display());
    }

    for tool in [&mut config.esptool, &mut config.espefuse, &mut config.espsecure] {
        match resolve_tool(tool) {
            Some(found) => {
                log::debug!("using {}", found.display());
                *tool = found;
            }
            None => return Err(PreconditionError::MissingTool(tool.clone()).into()),
        }
    }
    Ok(())
}

pub fn check_key_file(key_file: &Path) -> Result<()> {
    if !key_file.is_file() {
        return Err(PreconditionError::MissingKeyFile(key_file.to_path_buf()).into());
    }
    Ok(())
}

/// Opens the serial port once to make sure it is available, then releases it.
pub fn check_port(port: &str, baud: u32) -> Result<()> {
    match serialport::new(port, baud).open() {
        Ok(handle) => {
            drop(handle);
            log::debug!("serial port {port} is available");
            Ok(())
        }
        Err(e) => Err(PreconditionError::PortUnavailable {
            port: port.to_string(),
            reason: e.to_string(),
        }
        .into()),
    }
}

/// Refuses to start when staged images from an earlier run are still around.
pub fn check_staging_dir(dir: &Path) -> Result<()> {
    let leftovers = staging::discover(dir)?;
    if !leftovers.is_empty() {
        let paths = leftovers.into_iter().map(|f| f.path).collect();
        return Err(PreconditionError::StagedImagesPresent(paths).into());
    }
    Ok(())
}
