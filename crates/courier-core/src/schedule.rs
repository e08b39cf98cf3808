use chrono::{Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Monthly,
    Yearly,
}

impl Frequency {
    /// Case-insensitive; anything unrecognized is yearly.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "daily" => Frequency::Daily,
            "monthly" => Frequency::Monthly,
            _ => Frequency::Yearly,
        }
    }

    pub fn period_label(self, at: NaiveDateTime) -> String {
        let pattern = match self {
            Frequency::Daily => "%Y-%m-%d",
            Frequency::Monthly => "%B%Y",
            Frequency::Yearly => "%Y",
        };
        at.format(pattern).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run { period: String },
    Weekend,
    TooEarly { hour: u32 },
    AlreadyReported { period: String },
}

impl Decision {
    pub fn should_run(&self) -> bool {
        matches!(self, Decision::Run { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleGate {
    pub start_hour: u32,
}

impl Default for ScheduleGate {
    fn default() -> Self {
        Self { start_hour: 6 }
    }
}

impl ScheduleGate {
    pub fn new(start_hour: u32) -> Self {
        Self { start_hour }
    }

    /// Weekdays only, not before `start_hour`, and only if no existing entry
    /// already carries the current period label.
    pub fn evaluate<I, S>(&self, now: NaiveDateTime, frequency: Frequency, existing: I) -> Decision
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return Decision::Weekend;
        }
        if now.hour() < self.start_hour {
            return Decision::TooEarly { hour: now.hour() };
        }

        let period = frequency.period_label(now);
        if existing.into_iter().any(|label| label.as_ref() == period) {
            return Decision::AlreadyReported { period };
        }
        Decision::Run { period }
    }
}

pub fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}
