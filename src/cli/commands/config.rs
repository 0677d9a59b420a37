//! Config Command
//!
//! Manage newsgist configuration.
//!
//! Usage:
//!   newsgist config show [-g] [-f json]
//!   newsgist config path
//!   newsgist config init [-g] [--force]

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str) -> Result<()> {
    if global {
        match ConfigLoader::global_config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                if format == "toml" {
                    println!("{}", content);
                } else {
                    println!("# Global Config: {}\n", path.display());
                    println!("{}", content);
                }
            }
            Some(_) => {
                println!("No global config found.");
                println!("Run 'newsgist config init --global' to create one.");
            }
            None => println!("Cannot determine global config directory."),
        }
        return Ok(());
    }

    let config = ConfigLoader::load()?;
    ConfigLoader::show_config(&config, format == "json")
}

/// Show configuration paths
pub fn path() -> Result<()> {
    let config = ConfigLoader::load()?;
    ConfigLoader::show_path(&config);
    Ok(())
}

/// Initialize global or project configuration
pub fn init(global: bool, force: bool) -> Result<()> {
    let out = Output::new();
    if global {
        let path = ConfigLoader::init_global(force)?;
        out.success("Initialized global configuration");
        out.field("Config", path.display());
    } else {
        let path = ConfigLoader::init_project(force)?;
        out.success("Initialized project configuration");
        out.field("Directory", ConfigLoader::project_dir().display());
        out.field("Config", path.display());
    }
    Ok(())
}
