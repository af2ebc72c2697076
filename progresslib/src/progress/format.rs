use std::{
    fmt,
    time::Duration,
};

use number_prefix::NumberPrefix;

/// Type to represent a file size in base 2 units.
#[derive(Debug)]
pub struct BinarySize(pub u64);

impl fmt::Display for BinarySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NumberPrefix::binary(self.0 as f64) {
            NumberPrefix::Standalone(number) => {
                write!(f, "{number:.0}B")
            }
            NumberPrefix::Prefixed(prefix, number) => {
                write!(f, "{number:.2}{prefix}B")
            }
        }
    }
}

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Type to represent a duration in human readable form. Sub-second precision
/// is intentionally dropped; ETAs do not need it.
#[derive(Debug)]
pub struct HumanDuration(pub Duration);

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();

        if secs == 0 {
            return if f.alternate() {
                f.write_str("0 seconds")
            } else {
                f.write_str("0s")
            };
        }

        let days = secs / SECS_PER_DAY;
        let remain = secs % SECS_PER_DAY;

        let hours = remain / SECS_PER_HOUR;
        let remain = remain % SECS_PER_HOUR;

        let minutes = remain / SECS_PER_MINUTE;
        let secs = remain % SECS_PER_MINUTE;

        let mut first = true;

        for (value, full, abbrev) in &[
            (days, "day", "d"),
            (hours, "hour", "h"),
            (minutes, "minute", "m"),
            (secs, "second", "s"),
        ] {
            if *value > 0 {
                if first {
                    first = false;
                } else {
                    f.write_str(" ")?;
                }

                write!(f, "{value}")?;

                if f.alternate() {
                    write!(f, " {}{}", full, if *value > 1 { "s" } else { "" })?;
                } else {
                    f.write_str(abbrev)?;
                }
            }
        }

        Ok(())
    }
}

/// Type to represent a duration in a clock-like form.
#[derive(Debug)]
pub struct ClockDuration(pub Duration);

impl fmt::Display for ClockDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();

        let hours = secs / SECS_PER_HOUR;
        let remain = secs % SECS_PER_HOUR;

        let minutes = remain / SECS_PER_MINUTE;
        let secs = remain % SECS_PER_MINUTE;

        write!(f, "{hours:02}:{minutes:02}:{secs:02}")
    }
}
