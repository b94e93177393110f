use std::process::ExitCode;

use clap::Parser;

use crate::options::{Command, Options};

mod interfaces;
mod logging;
mod modes;
mod options;

fn main() -> ExitCode {
    let options = Options::parse();
    logging::init(&options);
    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(options: &Options) -> anyhow::Result<()> {
    if options.list_interfaces() {
        for name in interfaces::list(std::path::Path::new("/sys/class/net"))? {
            println!("{name}");
        }
        return Ok(());
    }
    let Some(command) = options.command() else {
        anyhow::bail!("No command given, see --help");
    };
    match command {
        Command::Discover { interface } => modes::scan::discover(options, interface),
        Command::Autoconfig { interface } => modes::scan::autoconfig(options, interface),
        Command::Setaddress { interface, address, serial } => {
            modes::scan::set_address(options, interface, *address, *serial)
        }
        Command::Getinfo { interface, address } => modes::info::get_info(options, interface, *address),
        Command::Setinfo { interface, address, command, verify } => {
            modes::info::set_info(options, interface, *address, command.as_deref(), *verify)
        }
        Command::Measure { interface, address } => modes::measure::measure(options, interface, *address),
        Command::Logging { interface, address, directory } => {
            modes::measure::logging(options, interface, *address, directory)
        }
        Command::Program { interface, address, image, device_type } => {
            modes::program::program(options, interface, *address, image, *device_type)
        }
        Command::Simulate { interface, count, channels, first_serial } => {
            modes::simulate::simulate(interface, *count, *channels, *first_serial)
        }
    }
}
