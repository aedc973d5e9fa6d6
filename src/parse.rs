use std::borrow::Cow;

use jiff::{
    civil::{Date, DateTime, Time},
    tz::TimeZone,
};

use crate::{
    error::Error,
    moment::Moment,
    rule::{
        Frequency, Rule, Strictness, WeekdayTerm, weekday_from_token,
        weekday_token,
    },
};

impl Rule {
    /// Parses a rule from a block of iCalendar text.
    ///
    /// The block must contain an `RRULE:` line and may contain a
    /// `DTSTART` line, in either order. Blank lines are ignored and
    /// folded lines are unfolded first. In strict mode every malformed
    /// token, out-of-range value or unknown key fails the parse; in
    /// lenient mode recoverable faults are dropped with a logged
    /// warning and only structural faults remain fatal.
    pub fn parse(text: &str, strictness: Strictness) -> Result<Rule, Error> {
        let unfolded = unfold(text);
        let mut dtstart: Option<Moment> = None;
        let mut rrule: Option<&str> = None;
        for line in unfolded.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let name_end = line.find([':', ';']).unwrap_or(line.len());
            let rest = &line[name_end..];
            match &*line[..name_end].to_ascii_uppercase() {
                "DTSTART" => {
                    if dtstart.is_some() {
                        if strictness == Strictness::Strict {
                            return Err(Error::malformed(
                                "input contains more than one `DTSTART` line",
                            ));
                        }
                        log::warn!(
                            "input contains more than one `DTSTART` line; \
                             the last one wins",
                        );
                    }
                    dtstart = Some(parse_dtstart(rest, strictness)?);
                }
                "RRULE" => {
                    let Some(value) = rest.strip_prefix(':') else {
                        return Err(Error::malformed(
                            "missing `:` after `RRULE`",
                        ));
                    };
                    if rrule.is_some() {
                        if strictness == Strictness::Strict {
                            return Err(Error::malformed(
                                "input contains more than one `RRULE` line",
                            ));
                        }
                        log::warn!(
                            "input contains more than one `RRULE` line; \
                             the last one wins",
                        );
                    }
                    rrule = Some(value);
                }
                name => {
                    if strictness == Strictness::Strict {
                        return Err(Error::malformed(format!(
                            "unrecognized line `{name}` \
                             (expected `DTSTART` or `RRULE`)",
                        )));
                    }
                    log::warn!("ignoring unrecognized line `{name}`");
                }
            }
        }
        let Some(value) = rrule else {
            return Err(Error::malformed("input contains no `RRULE:` line"));
        };

        let mut builder = Rule::builder();
        if let Some(dtstart) = dtstart {
            builder.dtstart(dtstart);
        }
        parse_rrule_value(value, &mut builder, strictness)?;
        builder.build_with(strictness)
    }
}

impl std::str::FromStr for Rule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Rule, Error> {
        Rule::parse(s, Strictness::Strict)
    }
}

/// Removes iCalendar line folds: a `CRLF` (or bare `LF`) immediately
/// followed by a single space or tab marks a continuation and is
/// deleted together with that space or tab.
pub(crate) fn unfold(text: &str) -> Cow<'_, str> {
    if !text
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'\n' && (w[1] == b' ' || w[1] == b'\t'))
    {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('\n') {
        let (before, after) = (&rest[..at], &rest[at + 1..]);
        if after.starts_with([' ', '\t']) {
            out.push_str(before.strip_suffix('\r').unwrap_or(before));
            rest = &after[1..];
        } else {
            out.push_str(before);
            out.push('\n');
            rest = after;
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// The shape of one `DTSTART` or `UNTIL` wire value.
enum WireValue {
    /// `YYYYMMDD`
    Date(Date),
    /// `YYYYMMDDTHHMMSS`
    Floating(DateTime),
    /// `YYYYMMDDTHHMMSSZ`
    Utc(DateTime),
}

impl WireValue {
    fn into_moment(self) -> Result<Moment, Error> {
        match self {
            WireValue::Date(date) => Ok(Moment::Date(date)),
            WireValue::Floating(dt) => Ok(Moment::DateTime(dt)),
            WireValue::Utc(dt) => {
                Moment::DateTime(dt).in_time_zone(TimeZone::UTC)
            }
        }
    }
}

fn parse_wire_value(s: &str) -> Result<WireValue, Error> {
    let bad = || {
        Error::invalid_moment(format!(
            "invalid date/time literal `{s}` (expected `YYYYMMDD`, \
             `YYYYMMDDTHHMMSS` or `YYYYMMDDTHHMMSSZ`)",
        ))
    };
    let bytes = s.as_bytes();
    let (date_part, time_part) = match bytes.len() {
        8 => (&s[..8], None),
        15 if bytes[8] == b'T' => (&s[..8], Some((&s[9..15], false))),
        16 if bytes[8] == b'T' && bytes[15] == b'Z' => {
            (&s[..8], Some((&s[9..15], true)))
        }
        _ => return Err(bad()),
    };
    if !date_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let year = date_part[..4].parse::<i16>().map_err(|_| bad())?;
    let month = date_part[4..6].parse::<i8>().map_err(|_| bad())?;
    let day = date_part[6..8].parse::<i8>().map_err(|_| bad())?;
    let date = Date::new(year, month, day).map_err(|err| {
        Error::invalid_moment(format!("invalid date literal `{s}`: {err}"))
    })?;
    let Some((time_str, utc)) = time_part else {
        return Ok(WireValue::Date(date));
    };
    if !time_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let hour = time_str[..2].parse::<i8>().map_err(|_| bad())?;
    let minute = time_str[2..4].parse::<i8>().map_err(|_| bad())?;
    let second = time_str[4..6].parse::<i8>().map_err(|_| bad())?;
    let time = Time::new(hour, minute, second, 0).map_err(|err| {
        Error::invalid_moment(format!("invalid time literal `{s}`: {err}"))
    })?;
    let dt = date.to_datetime(time);
    Ok(if utc { WireValue::Utc(dt) } else { WireValue::Floating(dt) })
}

/// Parses everything after the `DTSTART` name: optional `;`-separated
/// parameters, a `:` and the value.
fn parse_dtstart(
    rest: &str,
    strictness: Strictness,
) -> Result<Moment, Error> {
    let Some(colon) = rest.find(':') else {
        return Err(Error::malformed("missing `:` in `DTSTART` line"));
    };
    let (params, value) = (&rest[..colon], &rest[colon + 1..]);

    let mut tzid: Option<&str> = None;
    // `true` means the line declared `VALUE=DATE`.
    let mut value_type: Option<bool> = None;
    for param in params.split(';').filter(|p| !p.is_empty()) {
        let Some((key, val)) = param.split_once('=') else {
            if strictness == Strictness::Strict {
                return Err(Error::malformed(format!(
                    "malformed `DTSTART` parameter `{param}` \
                     (expected `KEY=VALUE`)",
                )));
            }
            log::warn!("ignoring malformed `DTSTART` parameter `{param}`");
            continue;
        };
        match &*key.to_ascii_uppercase() {
            "TZID" => tzid = Some(val),
            "VALUE" => match &*val.to_ascii_uppercase() {
                "DATE" => value_type = Some(true),
                "DATE-TIME" => value_type = Some(false),
                _ => {
                    if strictness == Strictness::Strict {
                        return Err(Error::malformed(format!(
                            "unrecognized `DTSTART` value type `{val}` \
                             (expected `DATE` or `DATE-TIME`)",
                        )));
                    }
                    log::warn!(
                        "ignoring unrecognized `DTSTART` value type `{val}`",
                    );
                }
            },
            _ => {
                if strictness == Strictness::Strict {
                    return Err(Error::malformed(format!(
                        "unrecognized `DTSTART` parameter `{key}`",
                    )));
                }
                log::warn!(
                    "ignoring unrecognized `DTSTART` parameter `{key}`",
                );
            }
        }
    }

    let value = parse_wire_value(value)?;
    if let Some(wants_date) = value_type {
        let is_date = matches!(value, WireValue::Date(_));
        if wants_date != is_date {
            let msg = format!(
                "`DTSTART` value type says `{}` but the value is a {}",
                if wants_date { "DATE" } else { "DATE-TIME" },
                if is_date { "date" } else { "datetime" },
            );
            if strictness == Strictness::Strict {
                return Err(Error::malformed(msg));
            }
            log::warn!("{msg}; using the value's own shape");
        }
    }

    let Some(name) = tzid else { return value.into_moment() };
    match value {
        WireValue::Date(_) => {
            if strictness == Strictness::Strict {
                return Err(Error::malformed(
                    "`TZID` cannot be combined with a date-only `DTSTART`",
                ));
            }
            log::warn!(
                "dropping `TZID={name}` on a date-only `DTSTART` \
                 (a date has no time to localize)",
            );
            value.into_moment()
        }
        WireValue::Utc(_) => {
            if strictness == Strictness::Strict {
                return Err(Error::malformed(
                    "`TZID` cannot be combined with a UTC (`Z`) `DTSTART`",
                ));
            }
            log::warn!(
                "dropping `TZID={name}` on a UTC `DTSTART` \
                 (the `Z` suffix already names the zone)",
            );
            value.into_moment()
        }
        WireValue::Floating(dt) => match TimeZone::get(name) {
            Ok(tz) => Moment::DateTime(dt).in_time_zone(tz),
            Err(err) => {
                let msg = format!(
                    "unrecognized time zone `{name}` in `DTSTART`: {err}",
                );
                if strictness == Strictness::Strict {
                    return Err(Error::malformed(msg));
                }
                log::warn!("{msg}; treating the value as a civil datetime");
                Ok(Moment::DateTime(dt))
            }
        },
    }
}

/// Parses the `KEY=VALUE;…` payload of an `RRULE` line into the given
/// builder.
fn parse_rrule_value(
    value: &str,
    builder: &mut crate::rule::RuleBuilder,
    strictness: Strictness,
) -> Result<(), Error> {
    for part in value.split(';').filter(|p| !p.is_empty()) {
        let Some((key, val)) = part.split_once('=') else {
            if strictness == Strictness::Strict {
                return Err(Error::malformed(format!(
                    "malformed `RRULE` part `{part}` (expected `KEY=VALUE`)",
                )));
            }
            log::warn!("ignoring malformed `RRULE` part `{part}`");
            continue;
        };
        let key = key.to_ascii_uppercase();
        match &*key {
            "FREQ" => match val.parse::<Frequency>() {
                Ok(freq) => {
                    builder.freq(freq);
                }
                Err(err) => {
                    if strictness == Strictness::Strict {
                        return Err(Error::malformed(format!(
                            "malformed `FREQ` value `{val}`: {err}",
                        )));
                    }
                    log::warn!(
                        "malformed `FREQ` value `{val}`; \
                         falling back to YEARLY",
                    );
                    builder.freq(Frequency::Yearly);
                }
            },
            "INTERVAL" => {
                if let Some(n) = parse_int::<i32>(&key, val, strictness)? {
                    builder.interval(n);
                }
            }
            "COUNT" => {
                if let Some(n) = parse_int::<u32>(&key, val, strictness)? {
                    builder.count(n);
                }
            }
            "UNTIL" => {
                match parse_wire_value(val).and_then(WireValue::into_moment) {
                    Ok(until) => {
                        builder.until(until);
                    }
                    Err(err) => {
                        if strictness == Strictness::Strict {
                            return Err(err);
                        }
                        log::warn!(
                            "dropping malformed `UNTIL` value `{val}`: {err}",
                        );
                    }
                }
            }
            "WKST" => match weekday_from_token(val) {
                Ok(weekday) => {
                    builder.week_start(weekday);
                }
                Err(_) => {
                    if strictness == Strictness::Strict {
                        return Err(Error::malformed(format!(
                            "malformed `WKST` value `{val}` \
                             (expected a weekday abbreviation)",
                        )));
                    }
                    log::warn!("dropping malformed `WKST` value `{val}`");
                }
            },
            "BYDAY" | "BYWEEKDAY" => {
                let mut terms: Vec<WeekdayTerm> = vec![];
                for token in val.split(',') {
                    match token.parse::<WeekdayTerm>() {
                        Ok(term) => terms.push(term),
                        Err(err) => {
                            if strictness == Strictness::Strict {
                                return Err(Error::malformed(format!(
                                    "malformed `{key}` value: {err}",
                                )));
                            }
                            log::warn!(
                                "dropping malformed `{key}` token `{token}`",
                            );
                        }
                    }
                }
                builder.by_week_day(terms);
            }
            "BYMONTH" => {
                builder.by_month(parse_int_list(&key, val, strictness)?);
            }
            "BYMONTHDAY" => {
                builder.by_month_day(parse_int_list(&key, val, strictness)?);
            }
            "BYYEARDAY" => {
                builder.by_year_day(parse_int_list(&key, val, strictness)?);
            }
            "BYWEEKNO" => {
                builder.by_week(parse_int_list(&key, val, strictness)?);
            }
            "BYHOUR" => {
                builder.by_hour(parse_int_list(&key, val, strictness)?);
            }
            "BYMINUTE" => {
                builder.by_minute(parse_int_list(&key, val, strictness)?);
            }
            "BYSECOND" => {
                builder.by_second(parse_int_list(&key, val, strictness)?);
            }
            "BYSETPOS" => {
                builder.by_set_pos(parse_int_list(&key, val, strictness)?);
            }
            _ => {
                if strictness == Strictness::Strict {
                    return Err(Error::malformed(format!(
                        "unrecognized `RRULE` key `{key}`",
                    )));
                }
                log::warn!("ignoring unrecognized `RRULE` key `{key}`");
            }
        }
    }
    Ok(())
}

fn parse_int<T: std::str::FromStr>(
    key: &str,
    val: &str,
    strictness: Strictness,
) -> Result<Option<T>, Error> {
    match val.parse::<T>() {
        Ok(n) => Ok(Some(n)),
        Err(_) => {
            if strictness == Strictness::Strict {
                return Err(Error::malformed(format!(
                    "malformed `{key}` value `{val}` (expected an integer)",
                )));
            }
            log::warn!("dropping malformed `{key}` value `{val}`");
            Ok(None)
        }
    }
}

fn parse_int_list<T: std::str::FromStr>(
    key: &str,
    val: &str,
    strictness: Strictness,
) -> Result<Vec<T>, Error> {
    let mut out = vec![];
    for item in val.split(',') {
        if let Some(n) = parse_int::<T>(key, item, strictness)? {
            out.push(n);
        }
    }
    Ok(out)
}

/// Serialises a rule in its canonical wire form: the `DTSTART` line
/// (when the rule has a starting point), a newline, then the `RRULE`
/// line with its keys in a fixed order. Parsing the output of this
/// impl always reproduces the rule.
impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(dtstart) = self.dtstart() {
            write_dtstart(f, dtstart)?;
            f.write_str("\n")?;
        }
        write!(f, "RRULE:FREQ={}", self.freq())?;
        if self.interval() != 1 {
            write!(f, ";INTERVAL={}", self.interval())?;
        }
        if let Some(count) = self.count() {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(until) = self.until() {
            f.write_str(";UNTIL=")?;
            write_until(f, self.dtstart(), until)?;
        }
        if let Some(wkst) = self.wkst() {
            write!(f, ";WKST={}", weekday_token(wkst))?;
        }
        write_list(f, "BYMONTH", self.by_month())?;
        write_list(f, "BYMONTHDAY", self.by_month_day())?;
        write_list(f, "BYYEARDAY", self.by_year_day())?;
        write_list(f, "BYWEEKNO", self.by_week())?;
        write_list(f, "BYDAY", self.by_week_day())?;
        write_list(f, "BYHOUR", self.by_hour())?;
        write_list(f, "BYMINUTE", self.by_minute())?;
        write_list(f, "BYSECOND", self.by_second())?;
        write_list(f, "BYSETPOS", self.by_set_pos())?;
        Ok(())
    }
}

fn write_compact_date(
    f: &mut std::fmt::Formatter,
    date: Date,
) -> std::fmt::Result {
    write!(f, "{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

fn write_compact_datetime(
    f: &mut std::fmt::Formatter,
    dt: DateTime,
) -> std::fmt::Result {
    write_compact_date(f, dt.date())?;
    write!(f, "T{:02}{:02}{:02}", dt.hour(), dt.minute(), dt.second())
}

fn write_dtstart(
    f: &mut std::fmt::Formatter,
    dtstart: &Moment,
) -> std::fmt::Result {
    match *dtstart {
        Moment::Date(date) => {
            f.write_str("DTSTART;VALUE=DATE:")?;
            write_compact_date(f, date)
        }
        Moment::DateTime(dt) => {
            f.write_str("DTSTART:")?;
            write_compact_datetime(f, dt)
        }
        Moment::Zoned(ref zdt) => match zdt.time_zone().iana_name() {
            Some("UTC") => {
                f.write_str("DTSTART:")?;
                write_compact_datetime(f, zdt.datetime())?;
                f.write_str("Z")
            }
            Some(name) => {
                write!(f, "DTSTART;TZID={name}:")?;
                write_compact_datetime(f, zdt.datetime())
            }
            // A zone with no IANA name (a fixed offset) has no wire
            // representation; fall back to the instant in UTC.
            None => {
                f.write_str("DTSTART:")?;
                let utc = zdt.timestamp().to_zoned(TimeZone::UTC);
                write_compact_datetime(f, utc.datetime())?;
                f.write_str("Z")
            }
        },
    }
}

/// Writes an `UNTIL` value in the form compatible with the rule's
/// starting point: the date form for a date rule, the naked datetime
/// form for a civil rule, and the UTC `Z` form for a zoned rule.
fn write_until(
    f: &mut std::fmt::Formatter,
    dtstart: Option<&Moment>,
    until: &Moment,
) -> std::fmt::Result {
    match *dtstart.unwrap_or(until) {
        Moment::Date(_) => write_compact_date(f, until.civil().date()),
        Moment::DateTime(_) => write_compact_datetime(f, until.civil()),
        Moment::Zoned(_) => {
            let utc = match *until {
                Moment::Zoned(ref zdt) => {
                    zdt.timestamp().to_zoned(TimeZone::UTC).datetime()
                }
                _ => until.civil(),
            };
            write_compact_datetime(f, utc)?;
            f.write_str("Z")
        }
    }
}

fn write_list<T: std::fmt::Display>(
    f: &mut std::fmt::Formatter,
    key: &str,
    values: &[T],
) -> std::fmt::Result {
    if values.is_empty() {
        return Ok(());
    }
    write!(f, ";{key}=")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use jiff::civil::Weekday;

    use super::*;

    fn strict(text: &str) -> Rule {
        Rule::parse(text, Strictness::Strict).unwrap()
    }

    fn lenient(text: &str) -> Rule {
        Rule::parse(text, Strictness::Lenient).unwrap()
    }

    fn moment(s: &str) -> Moment {
        s.parse().unwrap()
    }

    #[test]
    fn unfolding() {
        assert!(matches!(unfold("RRULE:FREQ=DAILY"), Cow::Borrowed(_)));
        assert_eq!(
            unfold("RRULE:FREQ=DAILY;\r\n COUNT=10"),
            "RRULE:FREQ=DAILY;COUNT=10",
        );
        assert_eq!(
            unfold("RRULE:FREQ=DAILY;\n\tCOUNT=10"),
            "RRULE:FREQ=DAILY;COUNT=10",
        );
        // A newline not followed by whitespace is a real line break.
        assert_eq!(
            unfold("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;\n COUNT=1"),
            "DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=1",
        );
        // Only a single space or tab is absorbed.
        assert_eq!(unfold("A\n  B"), "A B");
    }

    #[test]
    fn dtstart_value_forms() {
        let rule = strict("DTSTART;VALUE=DATE:19970902\nRRULE:FREQ=DAILY");
        assert_eq!(rule.dtstart().unwrap(), &moment("1997-09-02"));

        let rule = strict("DTSTART:19970902T090000\nRRULE:FREQ=DAILY");
        assert_eq!(rule.dtstart().unwrap(), &moment("1997-09-02T09:00:00"));

        let rule = strict("DTSTART:19970902T090000Z\nRRULE:FREQ=DAILY");
        assert_eq!(
            rule.dtstart().unwrap(),
            &moment("1997-09-02T09:00:00[UTC]"),
        );

        let rule = strict(
            "DTSTART;TZID=America/New_York:19970902T090000\n\
             RRULE:FREQ=DAILY",
        );
        assert_eq!(
            rule.dtstart().unwrap(),
            &moment("1997-09-02T09:00:00[America/New_York]"),
        );
    }

    #[test]
    fn dtstart_conflicting_parameters() {
        let err = Rule::parse(
            "DTSTART;TZID=America/New_York;VALUE=DATE:19970902\n\
             RRULE:FREQ=DAILY",
            Strictness::Strict,
        )
        .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"`TZID` cannot be combined with a date-only `DTSTART`",
        );

        let err = Rule::parse(
            "DTSTART;TZID=America/New_York:19970902T090000Z\n\
             RRULE:FREQ=DAILY",
            Strictness::Strict,
        )
        .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"`TZID` cannot be combined with a UTC (`Z`) `DTSTART`",
        );

        // Lenient mode drops the conflicting parameter instead.
        let rule = lenient(
            "DTSTART;TZID=America/New_York;VALUE=DATE:19970902\n\
             RRULE:FREQ=DAILY",
        );
        assert_eq!(rule.dtstart().unwrap(), &moment("1997-09-02"));

        let rule = lenient(
            "DTSTART;TZID=America/New_York:19970902T090000Z\n\
             RRULE:FREQ=DAILY",
        );
        assert_eq!(
            rule.dtstart().unwrap(),
            &moment("1997-09-02T09:00:00[UTC]"),
        );
    }

    #[test]
    fn malformed_literals() {
        let err = Rule::parse(
            "DTSTART:1997-09-02\nRRULE:FREQ=DAILY",
            Strictness::Strict,
        )
        .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"invalid date/time literal `1997-09-02` (expected `YYYYMMDD`, `YYYYMMDDTHHMMSS` or `YYYYMMDDTHHMMSSZ`)",
        );

        assert!(matches!(
            Rule::parse(
                "DTSTART:19971332T090000\nRRULE:FREQ=DAILY",
                Strictness::Strict,
            ),
            Err(Error::InvalidMoment(_)),
        ));
    }

    #[test]
    fn rrule_keys_are_case_insensitive() {
        let rule = strict(
            "DTSTART:19970902T090000\n\
             rrule:freq=weekly;interval=2;wkst=SU;byday=tu,th",
        );
        assert_eq!(rule.freq(), Frequency::Weekly);
        assert_eq!(rule.interval(), 2);
        assert_eq!(rule.wkst(), Some(Weekday::Sunday));
        assert_eq!(
            rule.by_week_day(),
            &[
                WeekdayTerm::Every(Weekday::Tuesday),
                WeekdayTerm::Every(Weekday::Thursday),
            ],
        );
    }

    #[test]
    fn byweekday_alias() {
        let rule = strict(
            "DTSTART:19970902T090000\nRRULE:FREQ=MONTHLY;BYWEEKDAY=MO,-2FR",
        );
        assert_eq!(
            rule.by_week_day(),
            &[
                WeekdayTerm::Every(Weekday::Monday),
                WeekdayTerm::Nth { nth: -2, weekday: Weekday::Friday },
            ],
        );
    }

    #[test]
    fn line_order_does_not_matter() {
        let a = strict("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=10");
        let b = strict(
            "\nRRULE:FREQ=DAILY;COUNT=10\n\nDTSTART:19970902T090000\n",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn strict_rejects_unknown_keys() {
        let err =
            Rule::parse("RRULE:FREQ=DAILY;X-MOOD=FESTIVE", Strictness::Strict)
                .unwrap_err();
        insta::assert_snapshot!(err, @"unrecognized `RRULE` key `X-MOOD`");

        let rule = lenient("RRULE:FREQ=DAILY;X-MOOD=FESTIVE");
        assert_eq!(rule.freq(), Frequency::Daily);
    }

    #[test]
    fn lenient_freq_falls_back_to_yearly() {
        let rule = lenient("RRULE:FREQ=FORTNIGHTLY");
        assert_eq!(rule.freq(), Frequency::Yearly);

        let err = Rule::parse("RRULE:FREQ=FORTNIGHTLY", Strictness::Strict)
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"malformed `FREQ` value `FORTNIGHTLY`: unrecognized frequency `FORTNIGHTLY`",
        );
    }

    #[test]
    fn lenient_drops_bad_list_entries() {
        let rule =
            lenient("RRULE:FREQ=YEARLY;BYMONTH=1,owl,13,6;BYDAY=MO,XX,99FR");
        assert_eq!(rule.by_month(), &[1, 6]);
        assert_eq!(rule.by_week_day(), &[WeekdayTerm::Every(Weekday::Monday)]);
    }

    #[test]
    fn missing_rrule_line() {
        let err =
            Rule::parse("DTSTART:19970902T090000\n", Strictness::Lenient)
                .unwrap_err();
        insta::assert_snapshot!(err, @"input contains no `RRULE:` line");
    }

    #[test]
    fn canonical_formatting() {
        let rule = strict(
            "DTSTART;TZID=America/New_York:19970902T090000\n\
             RRULE:BYDAY=TU,TH;INTERVAL=2;FREQ=WEEKLY;WKST=SU;COUNT=8",
        );
        insta::assert_snapshot!(
            rule,
            @r"
        DTSTART;TZID=America/New_York:19970902T090000
        RRULE:FREQ=WEEKLY;INTERVAL=2;COUNT=8;WKST=SU;BYDAY=TU,TH
        ",
        );
    }

    #[test]
    fn until_formats_follow_dtstart() {
        let rule = strict(
            "DTSTART;VALUE=DATE:19970902\nRRULE:FREQ=DAILY;UNTIL=19971224",
        );
        insta::assert_snapshot!(
            rule,
            @r"
        DTSTART;VALUE=DATE:19970902
        RRULE:FREQ=DAILY;UNTIL=19971224
        ",
        );

        let rule = strict(
            "DTSTART:19970902T090000\n\
             RRULE:FREQ=DAILY;UNTIL=19971224T000000",
        );
        insta::assert_snapshot!(
            rule,
            @r"
        DTSTART:19970902T090000
        RRULE:FREQ=DAILY;UNTIL=19971224T000000
        ",
        );

        // A zoned rule emits UNTIL as a UTC instant.
        let rule = strict(
            "DTSTART;TZID=America/New_York:19970902T090000\n\
             RRULE:FREQ=DAILY;UNTIL=19971224T000000Z",
        );
        insta::assert_snapshot!(
            rule,
            @r"
        DTSTART;TZID=America/New_York:19970902T090000
        RRULE:FREQ=DAILY;UNTIL=19971224T000000Z
        ",
        );
    }

    #[test]
    fn parse_format_round_trip() {
        let texts = [
            "RRULE:FREQ=YEARLY",
            "DTSTART;VALUE=DATE:19970902\nRRULE:FREQ=DAILY;COUNT=10",
            "DTSTART:19970902T090000\n\
             RRULE:FREQ=WEEKLY;INTERVAL=2;COUNT=4;WKST=SU;BYDAY=TU,TH",
            "DTSTART:19970902T090000Z\n\
             RRULE:FREQ=MONTHLY;BYMONTHDAY=2,15;BYSETPOS=-1",
            "DTSTART;TZID=America/New_York:19970902T090000\n\
             RRULE:FREQ=YEARLY;UNTIL=20000131T140000Z;BYMONTH=1,2;\
             BYYEARDAY=1,-1;BYWEEKNO=20;BYDAY=MO,-2FR;BYHOUR=9;\
             BYMINUTE=30;BYSECOND=0",
        ];
        for text in texts {
            let rule = strict(text);
            let formatted = rule.to_string();
            let reparsed = strict(&formatted);
            assert_eq!(rule, reparsed, "round trip failed for: {text}");
            // Formatting is canonical, so it is a fixed point.
            assert_eq!(formatted, reparsed.to_string());
        }
    }

    #[test]
    fn folded_input_parses() {
        let rule = strict(
            "DTSTART;TZID=America/New_York:19970902T090000\r\n\
             RRULE:FREQ=WEEKLY;INTERVAL=2;\r\n COUNT=4;WKST=SU;\r\n\
             \tBYDAY=TU,TH",
        );
        assert_eq!(rule.count(), Some(4));
        assert_eq!(rule.week_start(), Weekday::Sunday);
        assert_eq!(rule.by_week_day().len(), 2);
    }
}
