use std::str::FromStr;

use anyhow::Context;
use sdaq::calibration::{CalibrationSet, Calibrator};
use sdaq::catalog::PointType;
use sdaq::messages::{CalibrationDate, PointData};

use crate::options::Options;

/// One raw calibration write given on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawWrite {
    Date { channel: u8, date: CalibrationDate },
    Point { channel: u8, point: PointData },
}
impl FromStr for RawWrite {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let args: Vec<&str> = s.split_whitespace().collect();
        match args.as_slice() {
            ["WriteCalibrationDate", channel, date, period, points, unit] => {
                let day = chrono::NaiveDate::parse_from_str(date, "%Y/%m/%d")
                    .with_context(|| format!("{date} is not a YYYY/MM/DD date"))?;
                let wire = CalibrationDate {
                    period: period.parse().context("Invalid period")?,
                    points: points.parse().context("Invalid amount of points")?,
                    unit: unit.parse().context("Invalid unit")?,
                    ..CalibrationDate::default()
                };
                Ok(RawWrite::Date {
                    channel: channel.parse().context("Invalid channel")?,
                    date: wire.with_date(day).context("Year must be within 2000..=2255")?,
                })
            }
            ["WriteCalibrationPoint", channel, value, index, kind] => {
                let code: u8 = kind.parse().context("Invalid point type")?;
                Ok(RawWrite::Point {
                    channel: channel.parse().context("Invalid channel")?,
                    point: PointData {
                        value: value.parse().context("Invalid point value")?,
                        kind: PointType::from_code(code).with_context(|| format!("Unknown point type {code}"))?,
                        index: index.parse().context("Invalid point index")?,
                    },
                })
            }
            _ => anyhow::bail!("External command is unknown: {s}"),
        }
    }
}

fn print_set(set: &CalibrationSet, with_points: bool) {
    let device = &set.device;
    println!("Device: {}  S/N: {:010}", device.device_type, device.serial);
    println!("Firmware rev: {}  Hardware rev: {}", device.firmware_rev, device.hardware_rev);
    println!(
        "Channels: {}  Sample rate: {} Hz  Max calibration points: {}",
        device.channels, device.sample_rate, device.max_cal_points
    );
    for record in set.channels() {
        println!(
            "CH{:02}: {:04}/{:02}/{:02}  period: {} months  points: {}  unit: {}",
            record.channel,
            record.year,
            record.month,
            record.day,
            record.period,
            record.amount_of_points,
            record.unit_label()
        );
        if with_points {
            for point in record.points.iter().flatten() {
                println!("      {point}");
            }
        }
    }
}

pub fn get_info(options: &Options, interface: &str, address: u8) -> anyhow::Result<()> {
    let port = super::open_device(interface, address)?;
    let calibrator = Calibrator::new(&port, address).with_timeout(options.timeout());
    let Some(path) = options.file() else {
        print_set(&calibrator.read_info()?, false);
        return Ok(());
    };
    let set = calibrator.read_all()?;
    let json = if options.formatted() {
        serde_json::to_string_pretty(&set)?
    } else {
        serde_json::to_string(&set)?
    };
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    if !options.silent() {
        print_set(&set, options.verbose());
        println!("Configuration saved to {}", path.display());
    }
    Ok(())
}

pub fn set_info(
    options: &Options,
    interface: &str,
    address: u8,
    command: Option<&str>,
    verify: bool,
) -> anyhow::Result<()> {
    let port = super::open_device(interface, address)?;
    let calibrator = Calibrator::new(&port, address).with_timeout(options.timeout());
    if let Some(command) = command {
        match command.parse::<RawWrite>()? {
            RawWrite::Date { channel, date } => calibrator.write_date(channel, &date)?,
            RawWrite::Point { channel, point } => calibrator.write_point(channel, &point)?,
        }
        return Ok(());
    }
    let Some(path) = options.file() else {
        anyhow::bail!("setinfo needs --file or --command");
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let new: CalibrationSet =
        serde_json::from_str(&text).with_context(|| format!("{} is not a calibration file", path.display()))?;
    calibrator.apply(&new, verify)?;
    if !options.silent() {
        println!("Configuration written{}", if verify { " and verified" } else { "" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_command() {
        let write: RawWrite = "WriteCalibrationDate 3 2024/06/01 12 2 3".parse().unwrap();
        assert_eq!(write, RawWrite::Date {
            channel: 3,
            date: CalibrationDate { year: 24, month: 6, day: 1, period: 12, points: 2, unit: 3 },
        });
        assert!("WriteCalibrationDate 3 1999/06/01 12 2 3".parse::<RawWrite>().is_err());
        assert!("WriteCalibrationDate 3 2024-06-01 12 2 3".parse::<RawWrite>().is_err());
    }

    #[test]
    fn point_command() {
        let write: RawWrite = "WriteCalibrationPoint 1 -0.5 4 3".parse().unwrap();
        assert_eq!(write, RawWrite::Point {
            channel: 1,
            point: PointData { value: -0.5, kind: PointType::Offset, index: 4 },
        });
        assert!("WriteCalibrationPoint 1 -0.5 4 9".parse::<RawWrite>().is_err());
        assert!("Reset 1".parse::<RawWrite>().is_err());
    }
}
