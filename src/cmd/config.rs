//! Configuration view and validation: `analyst config`.

use anyhow::Result;

use analyst::config::AnalystConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config: &AnalystConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            print!("{}", config.to_display_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            config.validate()?;
            println!("Configuration is valid");
        }
    }
    Ok(())
}
