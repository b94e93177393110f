use std::fmt::{Display, Formatter};

use super::{CalibrationSet, ChannelCalibration};
use crate::messages::PointData;

bitflags::bitflags! {
    /// Which parts of two configurations [`correlate`] compares.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Checks: u8 {
        const INFO = 1 << 0;
        const DATE = 1 << 1;
        const POINTS = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub current: String,
    pub expected: String,
}
impl Display for FieldMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is {}, configuration has {}", self.field, self.current, self.expected)
    }
}

fn joined(mismatches: &[FieldMismatch]) -> String {
    mismatches.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CorrelationError {
    #[error("Configuration is for another device: {}", joined(.0))]
    Identity(Vec<FieldMismatch>),
    #[error("Configuration holds no calibration dates")]
    NoDates,
    #[error("CH{channel} is not present on the device")]
    MissingChannel { channel: u8 },
    #[error("CH{channel}: {mismatch}")]
    Date { channel: u8, mismatch: FieldMismatch },
    #[error("CH{channel}: no calibration points were read from the device")]
    PointsUndefined { channel: u8 },
    #[error("CH{channel} point {index}: device holds {current}, configuration has {expected}")]
    Point {
        channel: u8,
        index: u8,
        current: PointData,
        expected: PointData,
    },
    #[error("CH{channel} point {index}: device holds only {current} points, configuration has {expected}")]
    PointCount {
        channel: u8,
        index: u8,
        current: usize,
        expected: usize,
    },
}

/// Compares what a device holds (`current`) with a configuration (`new`).
/// Only the fields `new` defines are checked, the first difference is returned.
pub fn correlate(current: &CalibrationSet, new: &CalibrationSet, checks: Checks) -> Result<(), CorrelationError> {
    if checks.contains(Checks::INFO) {
        identity(current, new)?;
    }
    if checks.contains(Checks::DATE) {
        dates(current, new)?;
    }
    if checks.contains(Checks::POINTS) {
        points(current, new)?;
    }
    Ok(())
}

fn mismatch(field: &'static str, current: impl ToString, expected: impl ToString) -> Option<FieldMismatch> {
    let (current, expected) = (current.to_string(), expected.to_string());
    (current != expected).then_some(FieldMismatch { field, current, expected })
}

fn identity(current: &CalibrationSet, new: &CalibrationSet) -> Result<(), CorrelationError> {
    let (cur, new) = (&current.device, &new.device);
    let mismatches: Vec<FieldMismatch> = [
        mismatch("serial number", cur.serial, new.serial),
        mismatch("device type", cur.device_type, new.device_type),
        mismatch("firmware revision", cur.firmware_rev, new.firmware_rev),
        mismatch("hardware revision", cur.hardware_rev, new.hardware_rev),
        mismatch("number of channels", cur.channels, new.channels),
        mismatch("sample rate", cur.sample_rate, new.sample_rate),
        mismatch("max calibration points", cur.max_cal_points, new.max_cal_points),
    ]
    .into_iter()
    .flatten()
    .collect();
    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(CorrelationError::Identity(mismatches))
    }
}

fn date_string(record: &ChannelCalibration) -> String {
    format!("{:04}/{:02}/{:02}", record.year, record.month, record.day)
}

/// Label and code, several codes share a label.
fn unit_string(record: &ChannelCalibration) -> String {
    format!("{} (code {})", record.unit_label(), record.unit)
}

fn dates(current: &CalibrationSet, new: &CalibrationSet) -> Result<(), CorrelationError> {
    if new.channels().is_empty() {
        return Err(CorrelationError::NoDates);
    }
    for expected in new.channels() {
        let channel = expected.channel;
        let found = current
            .channel(channel)
            .ok_or(CorrelationError::MissingChannel { channel })?;
        let first = mismatch("calibration date", date_string(found), date_string(expected))
            .or_else(|| mismatch("period", found.period, expected.period))
            .or_else(|| mismatch("amount of points", found.amount_of_points, expected.amount_of_points))
            .or_else(|| {
                (found.unit != expected.unit).then(|| FieldMismatch {
                    field: "unit",
                    current: unit_string(found),
                    expected: unit_string(expected),
                })
            });
        if let Some(mismatch) = first {
            return Err(CorrelationError::Date { channel, mismatch });
        }
    }
    Ok(())
}

fn points(current: &CalibrationSet, new: &CalibrationSet) -> Result<(), CorrelationError> {
    for record in new.channels().iter().filter(|record| record.has_points()) {
        let channel = record.channel;
        let found = current
            .channel(channel)
            .and_then(|found| found.points.as_deref())
            .filter(|points| !points.is_empty())
            .ok_or(CorrelationError::PointsUndefined { channel })?;
        let expected = record.points.as_deref().unwrap_or_default();
        for (at, want) in expected.iter().enumerate() {
            let Some(have) = found.get(at) else {
                return Err(CorrelationError::PointCount {
                    channel,
                    index: want.index,
                    current: found.len(),
                    expected: expected.len(),
                });
            };
            if have.value != want.value || have.kind != want.kind || have.index != want.index {
                return Err(CorrelationError::Point { channel, index: want.index, current: *have, expected: *want });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::DeviceIdentity;
    use crate::catalog::{DeviceType, PointType};
    use crate::messages::CalibrationDate;

    fn config() -> CalibrationSet {
        let mut set = CalibrationSet::new(DeviceIdentity {
            serial: 1234,
            device_type: DeviceType::TC16,
            firmware_rev: 3,
            hardware_rev: 1,
            channels: 2,
            sample_rate: 10,
            max_cal_points: 16,
        });
        for channel in 1..=2 {
            set.upsert_date(channel, &CalibrationDate { year: 24, month: 6, day: 1, period: 12, points: 2, unit: 3 });
            for index in 0..2 {
                for kind in PointType::ALL {
                    set.upsert_point(channel, PointData { value: index as f32 + 0.25, kind, index });
                }
            }
        }
        set
    }

    #[test]
    fn identical_configurations_pass_every_check() {
        let set = config();
        assert_eq!(correlate(&set, &set.clone(), Checks::all()), Ok(()));
    }

    #[test]
    fn identity_names_every_mismatched_field() {
        let current = config();
        let mut new = config();
        new.device.serial = 99;
        new.device.sample_rate = 20;
        let Err(CorrelationError::Identity(fields)) = correlate(&current, &new, Checks::INFO) else {
            panic!("identity mismatch expected");
        };
        let names: Vec<&str> = fields.iter().map(|field| field.field).collect();
        assert_eq!(names, vec!["serial number", "sample rate"]);
        assert_eq!(correlate(&current, &new, Checks::DATE | Checks::POINTS), Ok(()));
    }

    #[test]
    fn dates_are_compared_per_channel() {
        let current = config();
        let mut new = config();
        new.upsert_date(2, &CalibrationDate { year: 24, month: 6, day: 1, period: 6, points: 2, unit: 3 });
        let err = correlate(&current, &new, Checks::DATE).unwrap_err();
        assert!(matches!(err, CorrelationError::Date { channel: 2, mismatch: FieldMismatch { field: "period", .. } }));

        let mut new = config();
        new.upsert_date(5, &CalibrationDate::default());
        assert_eq!(
            correlate(&current, &new, Checks::DATE),
            Err(CorrelationError::MissingChannel { channel: 5 })
        );
    }

    #[test]
    fn units_sharing_a_label_still_differ() {
        let current = config();
        for (have, want) in [(7, 8), (150, 200)] {
            let mut current = current.clone();
            let mut new = config();
            current.upsert_date(1, &CalibrationDate { year: 24, month: 6, day: 1, period: 12, points: 2, unit: have });
            new.upsert_date(1, &CalibrationDate { year: 24, month: 6, day: 1, period: 12, points: 2, unit: want });
            let Err(CorrelationError::Date { channel: 1, mismatch }) = correlate(&current, &new, Checks::DATE) else {
                panic!("unit {have} against {want} must not correlate");
            };
            assert_eq!(mismatch.field, "unit");
            assert!(mismatch.current.ends_with(&format!("(code {have})")));
            assert!(mismatch.expected.ends_with(&format!("(code {want})")));
        }
    }

    #[test]
    fn a_changed_point_names_channel_and_index() {
        let current = config();
        let changes: [fn(&mut PointData); 3] = [
            |point| point.value += 1.0,
            |point| point.kind = PointType::C3,
            |point| point.index = 7,
        ];
        for change in changes {
            let mut new = config();
            let record = new.channels.iter_mut().find(|record| record.channel == 2).unwrap();
            let point = &mut record.points.as_mut().unwrap()[8];
            change(point);
            let err = correlate(&current, &new, Checks::POINTS).unwrap_err();
            let CorrelationError::Point { channel, index, .. } = err else {
                panic!("point mismatch expected, got {err:?}");
            };
            assert_eq!(channel, 2);
            assert_eq!(index, new.channel(2).unwrap().points.as_ref().unwrap()[8].index);
        }
    }

    #[test]
    fn missing_or_short_point_lists_fail() {
        let mut current = config();
        let new = config();
        current.channels[0].points.as_mut().unwrap().truncate(5);
        assert!(matches!(
            correlate(&current, &new, Checks::POINTS),
            Err(CorrelationError::PointCount { channel: 1, current: 5, expected: 12, .. })
        ));
        current.clear_points(1);
        assert_eq!(
            correlate(&current, &new, Checks::POINTS),
            Err(CorrelationError::PointsUndefined { channel: 1 })
        );
    }
}
