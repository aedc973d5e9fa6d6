// Week arithmetic relative to an arbitrary week start.
//
// RFC 5545 lets `WKST` move the first day of the week anywhere, which
// affects both how WEEKLY intervals group days and how `BYWEEKNO`
// numbers weeks. Jiff's own `ISOWeekDate` is hard-wired to Monday, so
// the wkst-relative pieces live here.

use jiff::{
    ToSpan,
    civil::{Date, Weekday},
};

use crate::error::Error;

/// Returns the first day of the week containing `date`, for weeks
/// starting on `wkst`.
pub(crate) fn start_of_week(
    wkst: Weekday,
    date: Date,
) -> Result<Date, Error> {
    if date.weekday() == wkst {
        return Ok(date);
    }
    date.nth_weekday(-1, wkst).map_err(|err| {
        Error::invalid_moment(format!(
            "failed to find the start of the week containing {date} \
             (weeks starting on {wkst:?}): {err}",
        ))
    })
}

/// Returns the last day of the week containing `date`, for weeks
/// starting on `wkst`.
pub(crate) fn end_of_week(wkst: Weekday, date: Date) -> Result<Date, Error> {
    let last = wkst.wrapping_sub(1);
    if date.weekday() == last {
        return Ok(date);
    }
    date.nth_weekday(1, last).map_err(|err| {
        Error::invalid_moment(format!(
            "failed to find the end of the week containing {date} \
             (weeks starting on {wkst:?}): {err}",
        ))
    })
}

/// Returns the first day of week one of the given year, for weeks
/// starting on `wkst`.
///
/// RFC 5545 defines week one as the first week with at least four days
/// in the year, which means January 4 is always in it. The date
/// returned always has weekday `wkst` and may fall in the previous
/// calendar year.
pub(crate) fn week_one_start(
    wkst: Weekday,
    year: i16,
) -> Result<Date, Error> {
    let in_week_one = Date::new(year, 1, 4).map_err(|err| {
        Error::invalid_moment(format!(
            "failed to anchor week one of year `{year}`: {err}",
        ))
    })?;
    let days_from_start = in_week_one.weekday().since(wkst);
    in_week_one.checked_sub(days_from_start.days()).map_err(|err| {
        Error::invalid_moment(format!(
            "start of week one of year `{year}` (weeks starting on \
             {wkst:?}) is out of the supported range: {err}",
        ))
    })
}

/// Returns the number of weeks in the given year, for weeks starting
/// on `wkst`: 53 when January 1 falls on `wkst`, or when the year is a
/// leap year and January 1 falls on the day before `wkst`; 52
/// otherwise.
///
/// This is the count used to resolve negative `BYWEEKNO` values. It
/// counts the weeks a year's days spill into when weeks tile from its
/// first `wkst`, which is not the same thing as ISO long-year
/// detection.
pub(crate) fn weeks_in_year(wkst: Weekday, year: i16) -> i8 {
    let jan1 = jiff::civil::date(year, 1, 1);
    if jan1.weekday() == wkst
        || (jan1.in_leap_year() && jan1.weekday() == wkst.wrapping_sub(1))
    {
        53
    } else {
        52
    }
}
