use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use crate::config::Config;
use crate::services::rtu_server::list_ports;
use crate::utils::error::ModbusError;

pub fn build_cli() -> Command {
    Command::new("modbus-server")
        .version(crate::VERSION)
        .about("Modbus RTU server exposing an in-memory register map")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(Arg::new("port").short('p').long("port").help("Serial port, e.g. /dev/ttyUSB0"))
        .arg(Arg::new("baud").short('b').long("baud").help("Baud rate"))
        .arg(Arg::new("parity").long("parity").help("none, even or odd"))
        .arg(
            Arg::new("device-id")
                .short('d')
                .long("device-id")
                .help("Modbus device id to answer to (1-247)"),
        )
        .arg(
            Arg::new("broadcast")
                .long("broadcast")
                .action(ArgAction::SetTrue)
                .help("Execute writes sent to device id 0"),
        )
        .subcommand(Command::new("serve").about("Run the server (default)"))
        .subcommand(Command::new("list-ports").about("List available serial ports"))
        .subcommand(
            Command::new("init-config")
                .about("Write the effective configuration to a TOML file")
                .arg(Arg::new("path").required(true).value_name("FILE")),
        )
}

/// Returns `true` when a subcommand was handled and the server should not start.
pub fn handle_subcommands(matches: &ArgMatches, config: &Config) -> Result<bool, ModbusError> {
    if matches.subcommand_matches("list-ports").is_some() {
        list_ports()?;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("init-config") {
        if let Some(path) = matches.get_one::<String>("path") {
            config.save_to_file(path)?;
            info!("📝 Configuration written to {}", path);
            println!("✅ Configuration written to {}", path);
        }
        return Ok(true);
    }

    Ok(false)
}
