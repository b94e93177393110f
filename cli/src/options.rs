use std::path::PathBuf;
use std::time::Duration;

const MAX_TIMEOUT_SECS: f64 = 20.0;

fn parse_timeout(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|err| format!("{arg} is not a number of seconds: {err}"))?;
    if secs <= 0.0 || secs >= MAX_TIMEOUT_SECS {
        return Err(format!("timeout must be between 0 and {MAX_TIMEOUT_SECS} seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_address(arg: &str) -> Result<u8, String> {
    if arg.eq_ignore_ascii_case("parking") {
        return Ok(sdaq::PARKING_ADDRESS);
    }
    match arg.parse::<u8>() {
        Ok(address) if (1..=sdaq::MAX_DEVICE_ADDRESS).contains(&address) => Ok(address),
        _ => Err(format!("address must be 1..={} or \"parking\"", sdaq::MAX_DEVICE_ADDRESS)),
    }
}

#[derive(clap_derive::Parser, Debug, Clone, Default)]
#[command(name = "sdaq", version, about = "Tools for SDAQ devices on a CAN bus")]
pub struct Options {
    #[command(subcommand)]
    command: Option<Command>,
    #[arg(short, long, global = true, default_value = "2", value_parser = parse_timeout)]
    ///Seconds to wait for devices to answer, between 0 and 20
    timeout: Duration,
    #[arg(short, long, global = true, default_value = "false")]
    ///Print results only
    silent: bool,
    #[arg(short, long, global = true, default_value = "false")]
    ///Add extra debugging information
    verbose: bool,
    #[arg(short, long, global = true)]
    ///JSON file to write (discover, getinfo) or read (setinfo)
    file: Option<PathBuf>,
    #[arg(long, global = true, default_value = "false")]
    ///Pretty-print JSON output
    formatted: bool,
    #[arg(short, long, default_value = "false")]
    ///Print the CAN interfaces of this machine and exit
    list_interfaces: bool,
}
impl Options {
    pub const fn command(&self) -> Option<&Command> { self.command.as_ref() }
    pub const fn timeout(&self) -> Duration { self.timeout }
    pub const fn silent(&self) -> bool { self.silent }
    pub const fn verbose(&self) -> bool { self.verbose }
    pub fn file(&self) -> Option<&std::path::Path> { self.file.as_deref() }
    pub const fn formatted(&self) -> bool { self.formatted }
    pub const fn list_interfaces(&self) -> bool { self.list_interfaces }
}

#[derive(clap_derive::Subcommand, Debug, Clone)]
pub enum Command {
    ///List every device on the bus
    Discover {
        interface: String,
    },
    ///Give every parked device a free address
    Autoconfig {
        interface: String,
    },
    ///Move the device with a serial number to an address
    Setaddress {
        interface: String,
        #[arg(value_parser = parse_address)]
        ///New address, 1..=62 or "parking"
        address: u8,
        serial: u32,
    },
    ///Print the identity and calibration of a device
    Getinfo {
        interface: String,
        #[arg(value_parser = parse_address)]
        address: u8,
    },
    ///Write a calibration configuration into a device
    Setinfo {
        interface: String,
        #[arg(value_parser = parse_address)]
        address: u8,
        #[arg(short, long)]
        ///Single write: "WriteCalibrationDate <ch> <YYYY/MM/DD> <period> <points> <unit>"
        /// or "WriteCalibrationPoint <ch> <value> <index> <type>"
        command: Option<String>,
        #[arg(long, default_value = "false")]
        ///Read the configuration back and compare it after writing
        verify: bool,
    },
    ///Print the measurements of a device, commands on stdin: start, stop, info, raw, quit
    Measure {
        interface: String,
        #[arg(value_parser = parse_address)]
        address: u8,
    },
    ///Append the measurements of a device to a CSV file until stdin closes
    Logging {
        interface: String,
        #[arg(value_parser = parse_address)]
        address: u8,
        directory: PathBuf,
    },
    ///Flash an Intel-HEX firmware image
    Program {
        interface: String,
        #[arg(value_parser = parse_address)]
        address: u8,
        image: PathBuf,
        #[arg(long)]
        ///Device type code for images that do not carry one
        device_type: Option<u8>,
    },
    ///Run pseudo devices on the bus
    Simulate {
        interface: String,
        count: u8,
        #[arg(long, default_value = "1")]
        ///Channels of each device
        channels: u8,
        #[arg(long, default_value = "1")]
        ///Serial number of the first device, the others count up
        first_serial: u32,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn timeout_range_is_open() {
        assert_eq!(parse_timeout("0.5"), Ok(Duration::from_millis(500)));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("20").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn parking_is_an_address() {
        assert_eq!(parse_address("parking"), Ok(sdaq::PARKING_ADDRESS));
        assert_eq!(parse_address("62"), Ok(62));
        assert!(parse_address("0").is_err());
        assert!(parse_address("63").is_err());
    }

    #[test]
    fn global_options_follow_the_subcommand() {
        let options = Options::try_parse_from(["sdaq", "getinfo", "vcan0", "5", "--file", "out.json", "-t", "1"]).unwrap();
        assert_eq!(options.timeout(), Duration::from_secs(1));
        assert_eq!(options.file(), Some(std::path::Path::new("out.json")));
        assert!(matches!(options.command(), Some(Command::Getinfo { address: 5, .. })));
    }
}
