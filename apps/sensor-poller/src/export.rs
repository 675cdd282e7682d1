use crate::error::ExportError;
use crate::telemetry::{millis_to_dt, Reading};
use chrono::{FixedOffset, NaiveDate, Offset, Utc};

/// How reading timestamps are printed in exported rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeLabel {
    pub offset: FixedOffset,
    pub format: String,
}

impl Default for TimeLabel {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            format: "%H:%M".to_string(),
        }
    }
}

impl TimeLabel {
    pub fn new(offset: FixedOffset, format: impl Into<String>) -> Self {
        Self {
            offset,
            format: format.into(),
        }
    }

    pub fn render(&self, timestamp: i64) -> String {
        millis_to_dt(timestamp)
            .with_timezone(&self.offset)
            .format(&self.format)
            .to_string()
    }
}

/// One decimal, ties away from zero: `20.15` becomes `20.2`, `12` becomes `12.0`.
pub fn format_value(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    // avoid printing "-0.0" for values that round to zero
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.1}")
}

/// Header `time,<channels...>` then one row per reading. A reading missing a channel
/// leaves that cell empty.
pub fn export_csv(
    series: &[Reading],
    channels: &[String],
    time: &TimeLabel,
) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let mut header = Vec::with_capacity(channels.len() + 1);
    header.push("time");
    header.extend(channels.iter().map(String::as_str));
    writer.write_record(&header)?;

    for reading in series {
        let mut row = Vec::with_capacity(channels.len() + 1);
        row.push(time.render(reading.timestamp));
        row.extend(
            channels
                .iter()
                .map(|channel| reading.value(channel).map(format_value).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("sensor-data-{}.csv", date.format("%Y-%m-%d"))
}
