use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Active display clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockFormat {
    #[serde(rename = "12h")]
    TwelveHour,
    #[default]
    #[serde(rename = "24h")]
    TwentyFourHour,
}

impl fmt::Display for ClockFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockFormat::TwelveHour => write!(f, "12h"),
            ClockFormat::TwentyFourHour => write!(f, "24h"),
        }
    }
}

impl FromStr for ClockFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "12h" | "12" => Ok(ClockFormat::TwelveHour),
            "24h" | "24" => Ok(ClockFormat::TwentyFourHour),
            other => Err(format!("unknown clock format '{}', expected 12h or 24h", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meridiem {
    AM,
    PM,
}

impl FromStr for Meridiem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AM" => Ok(Meridiem::AM),
            "PM" => Ok(Meridiem::PM),
            other => Err(format!("unknown meridiem '{}'", other)),
        }
    }
}

/// Editable fields of a [`Timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    Day,
    Month,
    Year,
    Hour,
    Minute,
    Meridiem,
}

impl FromStr for TimestampField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(TimestampField::Day),
            "month" => Ok(TimestampField::Month),
            "year" => Ok(TimestampField::Year),
            "hour" => Ok(TimestampField::Hour),
            "minute" => Ok(TimestampField::Minute),
            "meridiem" | "ampm" => Ok(TimestampField::Meridiem),
            other => Err(format!("unknown timestamp field '{}'", other)),
        }
    }
}

/// Display/edit form of an unlock time, held as digit strings.
///
/// `meridiem` is set exactly when the value is in 12-hour form. A value with
/// any empty field is incomplete and never converts to a unix time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub day: String,
    pub month: String,
    pub year: String,
    pub hour: String,
    pub minute: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meridiem: Option<Meridiem>,
}

impl Timestamp {
    pub fn is_complete(&self) -> bool {
        [&self.day, &self.month, &self.year, &self.hour, &self.minute]
            .iter()
            .all(|field| !field.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        [&self.day, &self.month, &self.year, &self.hour, &self.minute]
            .iter()
            .all(|field| field.trim().is_empty())
    }

    pub fn set_field(&mut self, field: TimestampField, value: &str) {
        let value = value.trim().to_string();
        match field {
            TimestampField::Day => self.day = value,
            TimestampField::Month => self.month = value,
            TimestampField::Year => self.year = value,
            TimestampField::Hour => self.hour = value,
            TimestampField::Minute => self.minute = value,
            TimestampField::Meridiem => self.meridiem = value.parse().ok(),
        }
    }

    /// Hour on the 24-hour clock, folding in the meridiem if present.
    fn hour_24(&self) -> Option<u32> {
        let hour: u32 = self.hour.trim().parse().ok()?;
        Some(match self.meridiem {
            Some(Meridiem::PM) if hour < 12 => hour + 12,
            Some(Meridiem::AM) if hour == 12 => 0,
            _ => hour,
        })
    }

    /// Rewrite a complete 12-hour value on the 24-hour clock. Anything else
    /// is returned unchanged, so repeated calls are harmless.
    pub fn to_twenty_four_hour(&self) -> Timestamp {
        if !self.is_complete() || self.meridiem.is_none() {
            return self.clone();
        }
        match self.hour_24() {
            Some(hour) => Timestamp {
                hour: format!("{:02}", hour),
                meridiem: None,
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// Rewrite a complete 24-hour value on the 12-hour clock. Anything else
    /// is returned unchanged.
    pub fn to_twelve_hour(&self) -> Timestamp {
        if !self.is_complete() || self.meridiem.is_some() {
            return self.clone();
        }
        match self.hour.trim().parse::<u32>() {
            Ok(hour) if hour < 24 => {
                let (hour_12, meridiem) = split_hour(hour);
                Timestamp {
                    hour: format!("{:02}", hour_12),
                    meridiem: Some(meridiem),
                    ..self.clone()
                }
            }
            _ => self.clone(),
        }
    }

    pub fn in_format(&self, format: ClockFormat) -> Timestamp {
        match format {
            ClockFormat::TwelveHour => self.to_twelve_hour(),
            ClockFormat::TwentyFourHour => self.to_twenty_four_hour(),
        }
    }

    /// Unix seconds in the local time zone, or 0 when incomplete or invalid.
    pub fn to_unix(&self) -> i64 {
        self.to_unix_in(&Local)
    }

    pub fn to_unix_in<Tz: TimeZone>(&self, tz: &Tz) -> i64 {
        self.try_to_unix_in(tz).unwrap_or(0)
    }

    /// `None` when a field is missing or the fields do not name a real
    /// moment, e.g. 31/02.
    pub fn try_to_unix(&self) -> Option<i64> {
        self.try_to_unix_in(&Local)
    }

    pub fn try_to_unix_in<Tz: TimeZone>(&self, tz: &Tz) -> Option<i64> {
        if !self.is_complete() {
            return None;
        }
        self.to_datetime_in(tz).map(|dt| dt.timestamp())
    }

    fn to_datetime_in<Tz: TimeZone>(&self, tz: &Tz) -> Option<DateTime<Tz>> {
        let day: u32 = self.day.trim().parse().ok()?;
        let month: u32 = self.month.trim().parse().ok()?;
        let year: i32 = self.year.trim().parse().ok()?;
        let minute: u32 = self.minute.trim().parse().ok()?;
        let hour = self.hour_24()?;

        let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
        tz.from_local_datetime(&naive).earliest()
    }

    /// Render unix seconds in the local time zone.
    pub fn from_unix(secs: i64, format: ClockFormat) -> Timestamp {
        Self::from_unix_in(secs, &Local, format)
    }

    pub fn from_unix_in<Tz: TimeZone>(secs: i64, tz: &Tz, format: ClockFormat) -> Timestamp {
        let Some(dt) = tz.timestamp_opt(secs, 0).earliest() else {
            return Timestamp::default();
        };
        Timestamp::from_datetime(&dt, format)
    }

    /// Render any date-time value, e.g. a `NaiveDateTime` typed by a user.
    pub fn from_datetime<T: Datelike + Timelike>(dt: &T, format: ClockFormat) -> Timestamp {
        let rendered = Timestamp {
            day: format!("{:02}", dt.day()),
            month: format!("{:02}", dt.month()),
            year: dt.year().to_string(),
            hour: format!("{:02}", dt.hour()),
            minute: format!("{:02}", dt.minute()),
            meridiem: None,
        };
        rendered.in_format(format)
    }
}

fn split_hour(hour: u32) -> (u32, Meridiem) {
    let meridiem = if hour >= 12 { Meridiem::PM } else { Meridiem::AM };
    let hour_12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    (hour_12, meridiem)
}
