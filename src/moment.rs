use std::cmp::Ordering;

use jiff::{
    Span, Zoned,
    civil::{Date, DateTime, Time, Weekday},
    tz::{AmbiguousOffset, Offset, TimeZone},
};

use crate::{error::Error, week};

/// A point on the calendar, with or without a time, with or without a
/// time zone.
///
/// Recurrence rules are agnostic about how precise their starting point
/// is: an all-day event recurs over dates, a meeting recurs over civil
/// datetimes, and a meeting pinned to a location recurs over zoned
/// datetimes. `Moment` captures all three shapes in one sum type, and
/// the occurrence generator emits moments of the same variant as the
/// rule's starting point.
///
/// The variants wrap Jiff's corresponding types, so all calendar
/// arithmetic (including the "constrain to the last valid day"
/// behavior of month and year addition) comes from Jiff.
#[derive(Clone, Debug)]
pub enum Moment {
    /// A calendar date with no time component.
    Date(Date),
    /// A calendar date and wall-clock time, in no particular time zone.
    DateTime(DateTime),
    /// A datetime in a specific time zone, i.e., a precise instant.
    Zoned(Zoned),
}

impl Moment {
    /// Creates a date moment, or an `InvalidMoment` error if the given
    /// components do not name a real date.
    pub fn date(year: i16, month: i8, day: i8) -> Result<Moment, Error> {
        Date::new(year, month, day).map(Moment::Date).map_err(|err| {
            Error::invalid_moment(format!(
                "invalid date `{year:04}-{month:02}-{day:02}`: {err}",
            ))
        })
    }

    /// Creates a datetime moment, or an `InvalidMoment` error if the
    /// given components do not name a real datetime.
    pub fn datetime(
        year: i16,
        month: i8,
        day: i8,
        hour: i8,
        minute: i8,
        second: i8,
        millisecond: i16,
    ) -> Result<Moment, Error> {
        let subsec = i32::from(millisecond)
            .checked_mul(1_000_000)
            .unwrap_or(i32::MAX);
        DateTime::new(year, month, day, hour, minute, second, subsec)
            .map(Moment::DateTime)
            .map_err(|err| {
                Error::invalid_moment(format!(
                    "invalid datetime \
                     `{year:04}-{month:02}-{day:02} \
                     {hour:02}:{minute:02}:{second:02}.{millisecond:03}`: \
                     {err}",
                ))
            })
    }

    /// The civil datetime underlying this moment.
    ///
    /// A date counts as midnight. A zoned moment contributes its
    /// wall-clock datetime, not its instant.
    pub(crate) fn civil(&self) -> DateTime {
        match *self {
            Moment::Date(date) => date.to_datetime(Time::midnight()),
            Moment::DateTime(dt) => dt,
            Moment::Zoned(ref zdt) => zdt.datetime(),
        }
    }

    /// Rebuilds a moment of the same variant from the given civil
    /// datetime.
    ///
    /// For a date moment the time component is dropped. For a zoned
    /// moment the datetime is interpreted in the moment's time zone:
    /// a reading repeated by a backward transition resolves to its
    /// later instant, and a reading skipped by a forward transition
    /// fails with `InvalidMoment`, since no such wall-clock time
    /// exists there.
    pub(crate) fn with_civil(&self, dt: DateTime) -> Result<Moment, Error> {
        match *self {
            Moment::Date(_) => Ok(Moment::Date(dt.date())),
            Moment::DateTime(_) => Ok(Moment::DateTime(dt)),
            Moment::Zoned(ref zdt) => {
                resolve_in_zone(zdt.time_zone(), dt).map(Moment::Zoned)
            }
        }
    }

    /// The time zone of this moment, if it has one.
    pub fn time_zone(&self) -> Option<&TimeZone> {
        match *self {
            Moment::Zoned(ref zdt) => Some(zdt.time_zone()),
            _ => None,
        }
    }

    /// Converts this moment to the given time zone.
    ///
    /// A civil date or datetime is interpreted as a wall-clock reading
    /// in that zone (a date means midnight). A zoned moment is
    /// converted instant-preserving. A reading repeated by a backward
    /// transition resolves to its later instant; a reading skipped by
    /// a forward transition fails with `InvalidMoment`, since no such
    /// wall-clock time exists there.
    pub fn in_time_zone(&self, tz: TimeZone) -> Result<Moment, Error> {
        match *self {
            Moment::Date(_) | Moment::DateTime(_) => {
                resolve_in_zone(&tz, self.civil()).map(Moment::Zoned)
            }
            Moment::Zoned(ref zdt) => {
                Ok(Moment::Zoned(zdt.timestamp().to_zoned(tz)))
            }
        }
    }

    /// The year of this moment.
    pub fn year(&self) -> i16 {
        self.civil().year()
    }

    /// The month of this moment, in `1..=12`.
    pub fn month(&self) -> i8 {
        self.civil().month()
    }

    /// The day of the month of this moment, in `1..=31`.
    pub fn day(&self) -> i8 {
        self.civil().day()
    }

    /// The weekday of this moment.
    pub fn weekday(&self) -> Weekday {
        self.civil().weekday()
    }

    /// The weekday of this moment as an index in `0..=6`, with Monday
    /// at `0`.
    pub fn weekday_index(&self) -> i8 {
        self.weekday().to_monday_zero_offset()
    }

    /// The day of the year of this moment, in `1..=366`.
    pub fn day_of_year(&self) -> i16 {
        self.civil().day_of_year()
    }

    /// The number of days in this moment's month.
    pub fn days_in_month(&self) -> i8 {
        self.civil().days_in_month()
    }

    /// The number of days in this moment's year.
    pub fn days_in_year(&self) -> i16 {
        self.civil().days_in_year()
    }

    /// Whether this moment falls in a leap year.
    pub fn in_leap_year(&self) -> bool {
        self.civil().in_leap_year()
    }

    /// The ISO 8601 week number of this moment, in `1..=53`.
    ///
    /// This is the fixed Monday-based week numbering where week one is
    /// the week containing the year's first Thursday. Recurrence rules
    /// number weeks relative to `WKST` instead; see the `week` module.
    pub fn iso_week(&self) -> i8 {
        self.civil().date().iso_week_date().week()
    }

    /// The hour of this moment, or `None` for a date.
    pub fn hour(&self) -> Option<i8> {
        match *self {
            Moment::Date(_) => None,
            _ => Some(self.civil().hour()),
        }
    }

    /// The minute of this moment, or `None` for a date.
    pub fn minute(&self) -> Option<i8> {
        match *self {
            Moment::Date(_) => None,
            _ => Some(self.civil().minute()),
        }
    }

    /// The second of this moment, or `None` for a date.
    pub fn second(&self) -> Option<i8> {
        match *self {
            Moment::Date(_) => None,
            _ => Some(self.civil().second()),
        }
    }

    /// The millisecond of this moment, or `None` for a date.
    pub fn millisecond(&self) -> Option<i16> {
        match *self {
            Moment::Date(_) => None,
            _ => Some(self.civil().millisecond()),
        }
    }

    /// This moment moved to January 1 of its year, preserving any time
    /// component.
    pub fn start_of_year(&self) -> Result<Moment, Error> {
        let dt = self.civil();
        self.with_civil(dt.first_of_year())
    }

    /// This moment moved to December 31 of its year, preserving any
    /// time component.
    pub fn end_of_year(&self) -> Result<Moment, Error> {
        let dt = self.civil();
        self.with_civil(dt.last_of_year())
    }

    /// This moment moved back to the first day of the week containing
    /// it, where weeks begin on `wkst`. Preserves any time component.
    pub fn start_of_week(&self, wkst: Weekday) -> Result<Moment, Error> {
        let dt = self.civil();
        let start = week::start_of_week(wkst, dt.date())?;
        self.with_civil(dt.with().date(start).build().map_err(|err| {
            Error::invalid_moment(format!(
                "failed to move `{dt}` to the start of its week: {err}",
            ))
        })?)
    }

    /// This moment moved forward to the last day of the week
    /// containing it, where weeks begin on `wkst`. Preserves any time
    /// component.
    pub fn end_of_week(&self, wkst: Weekday) -> Result<Moment, Error> {
        let dt = self.civil();
        let end = week::end_of_week(wkst, dt.date())?;
        self.with_civil(dt.with().date(end).build().map_err(|err| {
            Error::invalid_moment(format!(
                "failed to move `{dt}` to the end of its week: {err}",
            ))
        })?)
    }

    /// Adds a span to this moment, preserving its variant.
    ///
    /// Year and month arithmetic constrains: landing on a day that does
    /// not exist in the target month clamps to the month's last day.
    /// Adding units finer than a day to a date moment is an
    /// `InvalidMoment` error, as is arithmetic that overflows the
    /// supported calendar range.
    pub fn checked_add(&self, span: Span) -> Result<Moment, Error> {
        let map_err = |err: jiff::Error| {
            Error::invalid_moment(format!(
                "failed to add span to `{self}`: {err}",
            ))
        };
        match *self {
            Moment::Date(date) => {
                date.checked_add(span).map(Moment::Date).map_err(map_err)
            }
            Moment::DateTime(dt) => {
                dt.checked_add(span).map(Moment::DateTime).map_err(map_err)
            }
            Moment::Zoned(ref zdt) => {
                zdt.checked_add(span).map(Moment::Zoned).map_err(map_err)
            }
        }
    }

    /// Subtracts a span from this moment, preserving its variant.
    ///
    /// The counterpart of `checked_add`, with the same constrain
    /// semantics and error conditions.
    pub fn checked_sub(&self, span: Span) -> Result<Moment, Error> {
        self.checked_add(span.negate())
    }

    /// Returns this moment with the given year.
    pub fn with_year(&self, year: i16) -> Result<Moment, Error> {
        self.with_date_field("year", year, |dt| {
            dt.with().year(year).build()
        })
    }

    /// Returns this moment with the given month.
    pub fn with_month(&self, month: i8) -> Result<Moment, Error> {
        self.with_date_field("month", i16::from(month), |dt| {
            dt.with().month(month).build()
        })
    }

    /// Returns this moment with the given day of the month.
    pub fn with_day(&self, day: i8) -> Result<Moment, Error> {
        self.with_date_field("day", i16::from(day), |dt| {
            dt.with().day(day).build()
        })
    }

    /// Returns this moment with the given day of the year.
    pub fn with_day_of_year(&self, day: i16) -> Result<Moment, Error> {
        self.with_date_field("day of the year", day, |dt| {
            dt.with().day_of_year(day).build()
        })
    }

    /// Returns this moment with the given hour. Fails on a date
    /// moment, which has no time to mutate.
    pub fn with_hour(&self, hour: i8) -> Result<Moment, Error> {
        self.with_time_field("hour", i16::from(hour), |dt| {
            dt.with().hour(hour).build()
        })
    }

    /// Returns this moment with the given minute. Fails on a date
    /// moment, which has no time to mutate.
    pub fn with_minute(&self, minute: i8) -> Result<Moment, Error> {
        self.with_time_field("minute", i16::from(minute), |dt| {
            dt.with().minute(minute).build()
        })
    }

    /// Returns this moment with the given second. Fails on a date
    /// moment, which has no time to mutate.
    pub fn with_second(&self, second: i8) -> Result<Moment, Error> {
        self.with_time_field("second", i16::from(second), |dt| {
            dt.with().second(second).build()
        })
    }

    /// Returns this moment with the given millisecond. Fails on a date
    /// moment, which has no time to mutate.
    pub fn with_millisecond(&self, millisecond: i16) -> Result<Moment, Error> {
        self.with_time_field("millisecond", millisecond, |dt| {
            dt.with().millisecond(millisecond).build()
        })
    }

    fn with_date_field(
        &self,
        what: &str,
        value: i16,
        set: impl Fn(DateTime) -> Result<DateTime, jiff::Error>,
    ) -> Result<Moment, Error> {
        let dt = set(self.civil()).map_err(|err| {
            Error::invalid_moment(format!(
                "cannot set {what} of `{self}` to `{value}`: {err}",
            ))
        })?;
        self.with_civil(dt)
    }

    fn with_time_field(
        &self,
        what: &str,
        value: i16,
        set: impl Fn(DateTime) -> Result<DateTime, jiff::Error>,
    ) -> Result<Moment, Error> {
        if let Moment::Date(_) = *self {
            return Err(Error::invalid_moment(format!(
                "cannot set {what} of `{self}`: a date has no time fields",
            )));
        }
        self.with_date_field(what, value, set)
    }

    /// The tiebreak rank of this moment's variant, used to keep the
    /// total order lawful when variants are mixed.
    fn rank(&self) -> u8 {
        match *self {
            Moment::Date(_) => 0,
            Moment::DateTime(_) => 1,
            Moment::Zoned(_) => 2,
        }
    }
}

/// Resolves a civil datetime to an instant in the given time zone.
///
/// A wall-clock reading repeated by a backward transition resolves to
/// its later instant. A reading skipped by a forward transition is an
/// `InvalidMoment` error, the same way the occurrence generator
/// treats times that do not exist in a rule's zone.
fn resolve_in_zone(tz: &TimeZone, dt: DateTime) -> Result<Zoned, Error> {
    let to_zoned = |offset: Offset| {
        offset.to_timestamp(dt).map(|ts| ts.to_zoned(tz.clone())).map_err(
            |err| {
                Error::invalid_moment(format!(
                    "datetime `{dt}` is out of range for time zone \
                     {zone:?}: {err}",
                    zone = tz.iana_name().unwrap_or("unknown"),
                ))
            },
        )
    };
    match tz.to_ambiguous_zoned(dt).offset() {
        AmbiguousOffset::Unambiguous { offset } => to_zoned(offset),
        AmbiguousOffset::Gap { .. } => Err(Error::invalid_moment(format!(
            "datetime `{dt}` does not exist in time zone {zone:?} \
             (it falls in a transition gap)",
            zone = tz.iana_name().unwrap_or("unknown"),
        ))),
        AmbiguousOffset::Fold { after, .. } => to_zoned(after),
    }
}

/// Moments are totally ordered across variants.
///
/// The primary key is the civil datetime: a date counts as midnight
/// and a zoned moment compares by its wall-clock reading. Ties between
/// different variants break by variant (date, then datetime, then
/// zoned); ties between two zoned moments break by instant, so the two
/// readings of a repeated wall-clock time during a backward transition
/// order correctly.
impl Ord for Moment {
    fn cmp(&self, other: &Moment) -> Ordering {
        self.civil()
            .cmp(&other.civil())
            .then_with(|| self.rank().cmp(&other.rank()))
            .then_with(|| match (self, other) {
                (Moment::Zoned(lhs), Moment::Zoned(rhs)) => {
                    lhs.timestamp().cmp(&rhs.timestamp())
                }
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for Moment {
    fn partial_cmp(&self, other: &Moment) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Moment {
    fn eq(&self, other: &Moment) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Moment {}

impl From<Date> for Moment {
    fn from(date: Date) -> Moment {
        Moment::Date(date)
    }
}

impl From<DateTime> for Moment {
    fn from(dt: DateTime) -> Moment {
        Moment::DateTime(dt)
    }
}

impl From<Zoned> for Moment {
    fn from(zdt: Zoned) -> Moment {
        Moment::Zoned(zdt)
    }
}

impl std::fmt::Display for Moment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Moment::Date(ref date) => date.fmt(f),
            Moment::DateTime(ref dt) => dt.fmt(f),
            Moment::Zoned(ref zdt) => zdt.fmt(f),
        }
    }
}

impl std::str::FromStr for Moment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Moment, Error> {
        if s.contains('[') {
            return s.parse::<Zoned>().map(Moment::Zoned).map_err(|err| {
                Error::invalid_moment(format!(
                    "failed to parse `{s}` as a zoned datetime: {err}",
                ))
            });
        }
        if let Ok(dt) = s.parse::<DateTime>() {
            return Ok(Moment::DateTime(dt));
        }
        s.parse::<Date>().map(Moment::Date).map_err(|err| {
            Error::invalid_moment(format!(
                "failed to parse `{s}` as a date or datetime: {err}",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use jiff::ToSpan;

    use super::*;

    fn moment(s: &str) -> Moment {
        s.parse().unwrap()
    }

    #[test]
    fn ordering_within_variant() {
        assert!(moment("2025-03-01") < moment("2025-03-02"));
        assert!(moment("2025-03-01T09:00:00") < moment("2025-03-01T09:30:00"));
        assert!(
            moment("2025-03-01T09:00:00[America/New_York]")
                < moment("2025-03-01T09:00:01[America/New_York]"),
        );
    }

    #[test]
    fn ordering_across_variants() {
        // A date counts as midnight and sorts before any datetime of
        // the same day with a nonzero time.
        assert!(moment("2025-03-01") < moment("2025-03-01T00:00:01"));
        // At exactly midnight, the coarser variant sorts first.
        assert!(moment("2025-03-01") < moment("2025-03-01T00:00:00"));
        assert!(moment("2025-03-01") != moment("2025-03-01T00:00:00"));
    }

    #[test]
    fn constrain_semantics() {
        let jan31 = moment("2025-01-31T09:00:00");
        let feb = jan31.checked_add(1.month()).unwrap();
        assert_eq!(feb, moment("2025-02-28T09:00:00"));

        let leap = moment("2024-02-29");
        assert_eq!(
            leap.checked_add(1.year()).unwrap(),
            moment("2025-02-28"),
        );
    }

    #[test]
    fn time_fields_absent_on_dates() {
        let date = moment("2025-03-01");
        assert_eq!(date.hour(), None);
        assert_eq!(date.minute(), None);
        assert_eq!(date.second(), None);
        assert_eq!(date.millisecond(), None);

        let err = date.with_hour(9).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"cannot set hour of `2025-03-01`: a date has no time fields",
        );
    }

    #[test]
    fn field_mutation() {
        let dt = moment("2025-03-01T09:15:30");
        assert_eq!(dt.with_day(15).unwrap(), moment("2025-03-15T09:15:30"));
        assert_eq!(dt.with_hour(17).unwrap(), moment("2025-03-01T17:15:30"));
        assert!(dt.with_day(32).is_err());
        assert!(moment("2025-02-01").with_day(30).is_err());
    }

    #[test]
    fn calendar_accessors() {
        let dt = moment("2025-12-31T09:00:00");
        assert_eq!(dt.day_of_year(), 365);
        assert_eq!(dt.weekday(), Weekday::Wednesday);
        assert_eq!(dt.weekday_index(), 2);
        assert_eq!(dt.days_in_month(), 31);
        assert!(!dt.in_leap_year());
        // 2025-12-31 falls in ISO week 1 of 2026.
        assert_eq!(dt.iso_week(), 1);

        assert!(moment("2024-07-01").in_leap_year());
        assert_eq!(moment("2024-07-01").days_in_year(), 366);
    }

    #[test]
    fn year_boundaries() {
        let dt = moment("2025-06-15T09:00:00");
        assert_eq!(
            dt.start_of_year().unwrap(),
            moment("2025-01-01T09:00:00"),
        );
        assert_eq!(dt.end_of_year().unwrap(), moment("2025-12-31T09:00:00"));
    }

    #[test]
    fn week_bounds_respect_wkst() {
        // 2025-03-05 is a Wednesday.
        let dt = moment("2025-03-05");
        assert_eq!(
            dt.start_of_week(Weekday::Monday).unwrap(),
            moment("2025-03-03"),
        );
        assert_eq!(
            dt.end_of_week(Weekday::Monday).unwrap(),
            moment("2025-03-09"),
        );
        assert_eq!(
            dt.start_of_week(Weekday::Sunday).unwrap(),
            moment("2025-03-02"),
        );
        assert_eq!(
            dt.end_of_week(Weekday::Sunday).unwrap(),
            moment("2025-03-08"),
        );
        assert_eq!(
            dt.start_of_week(Weekday::Wednesday).unwrap(),
            moment("2025-03-05"),
        );
        assert_eq!(
            dt.end_of_week(Weekday::Thursday).unwrap(),
            moment("2025-03-05"),
        );
    }

    #[test]
    fn zone_conversion() {
        let dt = moment("2025-03-01T09:00:00");
        let tz = TimeZone::get("America/New_York").unwrap();
        let zoned = dt.in_time_zone(tz).unwrap();
        assert_eq!(
            zoned,
            moment("2025-03-01T09:00:00[America/New_York]"),
        );

        // Instant-preserving for already-zoned moments.
        let utc = zoned.in_time_zone(TimeZone::UTC).unwrap();
        assert_eq!(utc.civil(), moment("2025-03-01T14:00:00").civil());
    }

    #[test]
    fn gap_times_do_not_exist() {
        // 2:30am was skipped in New York on 2025-03-09.
        let tz = TimeZone::get("America/New_York").unwrap();
        let err =
            moment("2025-03-09T02:30:00").in_time_zone(tz).unwrap_err();
        insta::assert_snapshot!(
            err,
            @r#"datetime `2025-03-09T02:30:00` does not exist in time zone "America/New_York" (it falls in a transition gap)"#,
        );

        // Field mutation that lands a zoned moment in the gap fails
        // the same way.
        let zoned = moment("2025-03-08T02:30:00[America/New_York]");
        assert!(matches!(zoned.with_day(9), Err(Error::InvalidMoment(_))));
        // One day further is fine again.
        assert_eq!(
            zoned.with_day(10).unwrap(),
            moment("2025-03-10T02:30:00[America/New_York]"),
        );
    }

    #[test]
    fn repeated_times_resolve_to_the_later_reading() {
        // 1:30am happened twice in New York on 2025-11-02; conversion
        // picks the post-transition instant.
        let tz = TimeZone::get("America/New_York").unwrap();
        let zoned = moment("2025-11-02T01:30:00").in_time_zone(tz).unwrap();
        assert_eq!(
            zoned.to_string(),
            "2025-11-02T01:30:00-05:00[America/New_York]",
        );

        let mutated = moment("2025-11-01T01:30:00[America/New_York]")
            .with_day(2)
            .unwrap();
        assert_eq!(
            mutated.to_string(),
            "2025-11-02T01:30:00-05:00[America/New_York]",
        );
    }

    #[test]
    fn display_round_trips() {
        for s in [
            "2025-03-01",
            "2025-03-01T09:00:00",
            "2025-03-01T09:00:00-05:00[America/New_York]",
        ] {
            assert_eq!(moment(s).to_string(), s);
        }
    }
}
