use std::sync::{Arc, LazyLock};

use {
    jiff::{
        Span, ToSpan,
        civil::{Time, Weekday},
    },
    regex::Regex,
};

use crate::{error::Error, moment::Moment};

/// The default cap on the number of periods a generator will step
/// through before giving up on an unbounded rule.
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// How forgiving rule construction and parsing should be.
///
/// Strict mode turns every out-of-range value and malformed token into
/// an error. Lenient mode drops recoverable faults with a logged
/// warning and keeps going; only structural faults (like `COUNT` and
/// `UNTIL` both set) remain fatal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strictness {
    Strict,
    Lenient,
}

/// The frequency at which a recurrence rule repeats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Frequency {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
    Minutely,
    Secondly,
}

impl Frequency {
    /// The wire name of this frequency, as it appears in `FREQ=`.
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Yearly => "YEARLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Daily => "DAILY",
            Frequency::Hourly => "HOURLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Secondly => "SECONDLY",
        }
    }

    /// Whether this frequency's period is shorter than a day.
    pub(crate) fn is_sub_daily(self) -> bool {
        matches!(
            self,
            Frequency::Hourly | Frequency::Minutely | Frequency::Secondly,
        )
    }

    /// The span covered by `interval` periods of this frequency.
    fn to_span(self, interval: i32) -> Result<Span, Error> {
        let base = match self {
            Frequency::Yearly => 1.year(),
            Frequency::Monthly => 1.month(),
            Frequency::Weekly => 1.week(),
            Frequency::Daily => 1.day(),
            Frequency::Hourly => 1.hour(),
            Frequency::Minutely => 1.minute(),
            Frequency::Secondly => 1.second(),
        };
        base.checked_mul(i64::from(interval)).map_err(|err| {
            Error::unsupported(format!(
                "could not convert {freq} interval of `{interval}` to a \
                 time span: {err}",
                freq = self.as_str(),
            ))
        })
    }
}

impl std::str::FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Frequency, Error> {
        use self::Frequency::*;

        let freq = match &*s.to_ascii_uppercase() {
            "YEARLY" => Yearly,
            "MONTHLY" => Monthly,
            "WEEKLY" => Weekly,
            "DAILY" => Daily,
            "HOURLY" => Hourly,
            "MINUTELY" => Minutely,
            "SECONDLY" => Secondly,
            unk => {
                return Err(Error::malformed(format!(
                    "unrecognized frequency `{unk}`",
                )));
            }
        };
        Ok(freq)
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `BYDAY` entry: either every occurrence of a weekday, or
/// the nth occurrence of it within the rule's period.
///
/// `nth` counts from the start of the period when positive and from
/// the end when negative, and is meaningful only at MONTHLY and YEARLY
/// frequencies (the period being the month or the year). The weekday
/// alone also acts as a filter at the finer frequencies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WeekdayTerm {
    /// Every occurrence of the weekday in the period.
    Every(Weekday),
    /// The nth occurrence of the weekday in the period, `nth` in
    /// `[-53, 53]` and never zero.
    Nth { nth: i8, weekday: Weekday },
}

impl WeekdayTerm {
    /// The weekday this term refers to.
    pub fn weekday(&self) -> Weekday {
        match *self {
            WeekdayTerm::Every(weekday) => weekday,
            WeekdayTerm::Nth { weekday, .. } => weekday,
        }
    }

    /// The ordinal of this term, if it has one.
    pub fn nth(&self) -> Option<i8> {
        match *self {
            WeekdayTerm::Every(_) => None,
            WeekdayTerm::Nth { nth, .. } => Some(nth),
        }
    }
}

impl From<Weekday> for WeekdayTerm {
    fn from(weekday: Weekday) -> WeekdayTerm {
        WeekdayTerm::Every(weekday)
    }
}

impl From<(i8, Weekday)> for WeekdayTerm {
    fn from((nth, weekday): (i8, Weekday)) -> WeekdayTerm {
        WeekdayTerm::Nth { nth, weekday }
    }
}

/// Matches one `BYDAY` token: an optional signed ordinal of at most
/// two digits followed by a two-letter weekday abbreviation.
static BYDAY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([+-]?[0-9]{1,2})?(MO|TU|WE|TH|FR|SA|SU)$").unwrap()
});

impl std::str::FromStr for WeekdayTerm {
    type Err = Error;

    fn from_str(s: &str) -> Result<WeekdayTerm, Error> {
        let Some(caps) = BYDAY_TOKEN.captures(s) else {
            return Err(Error::malformed(format!(
                "unrecognized weekday token `{s}` (expected an optional \
                 ordinal followed by one of MO, TU, WE, TH, FR, SA, SU)",
            )));
        };
        // OK because the token regex guarantees a weekday group.
        let weekday = weekday_from_token(&caps[2])?;
        let Some(nth) = caps.get(1) else {
            return Ok(WeekdayTerm::Every(weekday));
        };
        let nth = nth.as_str().parse::<i8>().map_err(|_| {
            Error::malformed(format!(
                "invalid ordinal in weekday token `{s}`",
            ))
        })?;
        if nth == 0 || !(-53..=53).contains(&nth) {
            return Err(Error::malformed(format!(
                "invalid ordinal `{nth}` in weekday token `{s}` \
                 (ordinals must be in range 1..=53 or -53..=-1)",
            )));
        }
        Ok(WeekdayTerm::Nth { nth, weekday })
    }
}

impl std::fmt::Display for WeekdayTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            WeekdayTerm::Every(weekday) => {
                f.write_str(weekday_token(weekday))
            }
            WeekdayTerm::Nth { nth, weekday } => {
                write!(f, "{nth}{}", weekday_token(weekday))
            }
        }
    }
}

/// Parses a two-letter weekday abbreviation, case-insensitively.
pub(crate) fn weekday_from_token(s: &str) -> Result<Weekday, Error> {
    let weekday = match &*s.to_ascii_uppercase() {
        "MO" => Weekday::Monday,
        "TU" => Weekday::Tuesday,
        "WE" => Weekday::Wednesday,
        "TH" => Weekday::Thursday,
        "FR" => Weekday::Friday,
        "SA" => Weekday::Saturday,
        "SU" => Weekday::Sunday,
        unk => {
            return Err(Error::malformed(format!(
                "unrecognized weekday `{unk}`",
            )));
        }
    };
    Ok(weekday)
}

/// The wire abbreviation of a weekday.
pub(crate) fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "MO",
        Weekday::Tuesday => "TU",
        Weekday::Wednesday => "WE",
        Weekday::Thursday => "TH",
        Weekday::Friday => "FR",
        Weekday::Saturday => "SA",
        Weekday::Sunday => "SU",
    }
}

/// A sanitized RFC 5545 recurrence rule.
///
/// A `Rule` is immutable once built. It is constructed either through
/// [`Rule::builder`] or by parsing the textual wire format, and both
/// paths run the same sanitizer, so a `Rule` in hand always satisfies
/// the cross-field invariants (at most one of `COUNT`/`UNTIL`, an
/// `UNTIL` never before the starting point, `BYSETPOS` only alongside
/// another selector).
///
/// The compiled rule data is reference counted, so cloning is cheap
/// and generators snapshot the rule they were created from: rebuilding
/// a rule via [`Rule::to_builder`] never perturbs in-flight iteration.
#[derive(Clone, Debug)]
pub struct Rule {
    pub(crate) inner: Arc<RuleInner>,
}

#[derive(Debug)]
pub(crate) struct RuleInner {
    pub(crate) freq: Frequency,
    pub(crate) dtstart: Option<Moment>,
    pub(crate) interval: i32,
    pub(crate) count: Option<u32>,
    pub(crate) until: Option<Moment>,
    pub(crate) wkst: Option<Weekday>,
    pub(crate) by_month: Box<[i8]>,
    pub(crate) by_month_day: Box<[i8]>,
    pub(crate) by_year_day: Box<[i16]>,
    pub(crate) by_week: Box<[i8]>,
    pub(crate) by_week_day: Box<[WeekdayTerm]>,
    pub(crate) by_hour: Box<[i8]>,
    pub(crate) by_minute: Box<[i8]>,
    pub(crate) by_second: Box<[i8]>,
    pub(crate) by_set_pos: Box<[i32]>,
    /// The span covered by one interval step, precomputed from
    /// `freq` and `interval`.
    pub(crate) interval_span: Span,
    pub(crate) max_iterations: usize,
}

impl Rule {
    /// Returns a builder for constructing a rule.
    pub fn builder() -> RuleBuilder {
        RuleBuilder::new()
    }

    /// Returns a builder initialized with this rule's fields, for
    /// deriving a modified rule. The result is re-validated on
    /// `build`.
    pub fn to_builder(&self) -> RuleBuilder {
        let r = &*self.inner;
        RuleBuilder {
            freq: Some(r.freq),
            dtstart: r.dtstart.clone(),
            interval: r.interval,
            count: r.count,
            until: r.until.clone(),
            wkst: r.wkst,
            by_month: r.by_month.to_vec(),
            by_month_day: r.by_month_day.to_vec(),
            by_year_day: r.by_year_day.to_vec(),
            by_week: r.by_week.to_vec(),
            by_week_day: r.by_week_day.to_vec(),
            by_hour: r.by_hour.to_vec(),
            by_minute: r.by_minute.to_vec(),
            by_second: r.by_second.to_vec(),
            by_set_pos: r.by_set_pos.to_vec(),
            max_iterations: r.max_iterations,
        }
    }

    /// The rule's frequency.
    pub fn freq(&self) -> Frequency {
        self.inner.freq
    }

    /// The rule's starting point, if it has one.
    pub fn dtstart(&self) -> Option<&Moment> {
        self.inner.dtstart.as_ref()
    }

    /// The number of periods between repetitions. Always at least 1.
    pub fn interval(&self) -> i32 {
        self.inner.interval
    }

    /// The total number of occurrences to emit, if bounded that way.
    pub fn count(&self) -> Option<u32> {
        self.inner.count
    }

    /// The moment after which no occurrences are emitted, if bounded
    /// that way. Normalized to the starting point's variant and zone.
    pub fn until(&self) -> Option<&Moment> {
        self.inner.until.as_ref()
    }

    /// The explicitly configured week start, if any.
    pub fn wkst(&self) -> Option<Weekday> {
        self.inner.wkst
    }

    /// The effective week start: the configured one, or Monday.
    pub fn week_start(&self) -> Weekday {
        self.inner.wkst.unwrap_or(Weekday::Monday)
    }

    /// The `BYMONTH` selector values.
    pub fn by_month(&self) -> &[i8] {
        &self.inner.by_month
    }

    /// The `BYMONTHDAY` selector values.
    pub fn by_month_day(&self) -> &[i8] {
        &self.inner.by_month_day
    }

    /// The `BYYEARDAY` selector values.
    pub fn by_year_day(&self) -> &[i16] {
        &self.inner.by_year_day
    }

    /// The `BYWEEKNO` selector values.
    pub fn by_week(&self) -> &[i8] {
        &self.inner.by_week
    }

    /// The `BYDAY` selector terms.
    pub fn by_week_day(&self) -> &[WeekdayTerm] {
        &self.inner.by_week_day
    }

    /// The `BYHOUR` selector values.
    pub fn by_hour(&self) -> &[i8] {
        &self.inner.by_hour
    }

    /// The `BYMINUTE` selector values.
    pub fn by_minute(&self) -> &[i8] {
        &self.inner.by_minute
    }

    /// The `BYSECOND` selector values.
    pub fn by_second(&self) -> &[i8] {
        &self.inner.by_second
    }

    /// The `BYSETPOS` selector values.
    pub fn by_set_pos(&self) -> &[i32] {
        &self.inner.by_set_pos
    }

    /// The cap on the number of periods a generator for this rule will
    /// step through.
    pub fn max_iterations(&self) -> usize {
        self.inner.max_iterations
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Rule) -> bool {
        let (lhs, rhs) = (&*self.inner, &*other.inner);
        lhs.freq == rhs.freq
            && lhs.dtstart == rhs.dtstart
            && lhs.interval == rhs.interval
            && lhs.count == rhs.count
            && lhs.until == rhs.until
            && lhs.wkst == rhs.wkst
            && lhs.by_month == rhs.by_month
            && lhs.by_month_day == rhs.by_month_day
            && lhs.by_year_day == rhs.by_year_day
            && lhs.by_week == rhs.by_week
            && lhs.by_week_day == rhs.by_week_day
            && lhs.by_hour == rhs.by_hour
            && lhs.by_minute == rhs.by_minute
            && lhs.by_second == rhs.by_second
            && lhs.by_set_pos == rhs.by_set_pos
    }
}

impl Eq for Rule {}

/// A builder for constructing a valid recurrence rule.
///
/// Every setter takes and returns `&mut self`, so rules can be built
/// in a single expression. [`RuleBuilder::build`] sanitizes leniently,
/// dropping out-of-range selector values with a logged warning;
/// [`RuleBuilder::build_strict`] turns those drops into errors.
#[derive(Clone, Debug)]
pub struct RuleBuilder {
    freq: Option<Frequency>,
    dtstart: Option<Moment>,
    interval: i32,
    count: Option<u32>,
    until: Option<Moment>,
    wkst: Option<Weekday>,
    by_month: Vec<i8>,
    by_month_day: Vec<i8>,
    by_year_day: Vec<i16>,
    by_week: Vec<i8>,
    by_week_day: Vec<WeekdayTerm>,
    by_hour: Vec<i8>,
    by_minute: Vec<i8>,
    by_second: Vec<i8>,
    by_set_pos: Vec<i32>,
    max_iterations: usize,
}

impl RuleBuilder {
    fn new() -> RuleBuilder {
        RuleBuilder {
            freq: None,
            dtstart: None,
            interval: 1,
            count: None,
            until: None,
            wkst: None,
            by_month: vec![],
            by_month_day: vec![],
            by_year_day: vec![],
            by_week: vec![],
            by_week_day: vec![],
            by_hour: vec![],
            by_minute: vec![],
            by_second: vec![],
            by_set_pos: vec![],
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Sets the frequency. When never called, the frequency defaults
    /// to YEARLY.
    pub fn freq(&mut self, freq: Frequency) -> &mut RuleBuilder {
        self.freq = Some(freq);
        self
    }

    /// Sets the starting point of the rule.
    pub fn dtstart(&mut self, start: impl Into<Moment>) -> &mut RuleBuilder {
        self.dtstart = Some(start.into());
        self
    }

    /// Sets the number of periods between repetitions.
    pub fn interval(&mut self, interval: i32) -> &mut RuleBuilder {
        self.interval = interval;
        self
    }

    /// Bounds the rule to a total number of occurrences. Mutually
    /// exclusive with `until`.
    pub fn count(&mut self, count: u32) -> &mut RuleBuilder {
        self.count = Some(count);
        self
    }

    /// Bounds the rule to occurrences at or before the given moment.
    /// Mutually exclusive with `count`.
    pub fn until(&mut self, until: impl Into<Moment>) -> &mut RuleBuilder {
        self.until = Some(until.into());
        self
    }

    /// Sets the weekday on which weeks begin, for WEEKLY interval
    /// grouping and `BYWEEKNO` numbering.
    pub fn week_start(&mut self, weekday: Weekday) -> &mut RuleBuilder {
        self.wkst = Some(weekday);
        self
    }

    /// Adds `BYMONTH` values.
    pub fn by_month(
        &mut self,
        months: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_month.extend(months);
        self
    }

    /// Adds `BYMONTHDAY` values.
    pub fn by_month_day(
        &mut self,
        days: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_month_day.extend(days);
        self
    }

    /// Adds `BYYEARDAY` values.
    pub fn by_year_day(
        &mut self,
        days: impl IntoIterator<Item = i16>,
    ) -> &mut RuleBuilder {
        self.by_year_day.extend(days);
        self
    }

    /// Adds `BYWEEKNO` values.
    pub fn by_week(
        &mut self,
        weeks: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_week.extend(weeks);
        self
    }

    /// Adds `BYDAY` terms. Accepts bare weekdays and `(nth, weekday)`
    /// pairs.
    pub fn by_week_day<T: Into<WeekdayTerm>>(
        &mut self,
        terms: impl IntoIterator<Item = T>,
    ) -> &mut RuleBuilder {
        self.by_week_day.extend(terms.into_iter().map(Into::into));
        self
    }

    /// Adds `BYHOUR` values.
    pub fn by_hour(
        &mut self,
        hours: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_hour.extend(hours);
        self
    }

    /// Adds `BYMINUTE` values.
    pub fn by_minute(
        &mut self,
        minutes: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_minute.extend(minutes);
        self
    }

    /// Adds `BYSECOND` values.
    pub fn by_second(
        &mut self,
        seconds: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_second.extend(seconds);
        self
    }

    /// Adds `BYSETPOS` values.
    pub fn by_set_pos(
        &mut self,
        positions: impl IntoIterator<Item = i32>,
    ) -> &mut RuleBuilder {
        self.by_set_pos.extend(positions);
        self
    }

    /// Overrides the cap on the number of periods a generator will
    /// step through before failing with `MaxIterationsExceeded`. Must
    /// be at least 1.
    pub fn max_iterations(&mut self, max: usize) -> &mut RuleBuilder {
        self.max_iterations = max;
        self
    }

    /// Builds the rule, sanitizing leniently: selector values outside
    /// their declared ranges are dropped with a logged warning, and
    /// the remainder deduplicated preserving first-seen order.
    /// Structural faults still fail with `InvalidRule`.
    pub fn build(&self) -> Result<Rule, Error> {
        self.build_with(Strictness::Lenient)
    }

    /// Builds the rule, failing with `Unsupported` on any selector
    /// value outside its declared range.
    pub fn build_strict(&self) -> Result<Rule, Error> {
        self.build_with(Strictness::Strict)
    }

    pub(crate) fn build_with(
        &self,
        strictness: Strictness,
    ) -> Result<Rule, Error> {
        let freq = self.freq.unwrap_or(Frequency::Yearly);

        let interval = if self.interval >= 1 {
            self.interval
        } else {
            let msg = format!(
                "interval value of `{}` is invalid \
                 (interval must be greater than or equal to 1)",
                self.interval,
            );
            if strictness == Strictness::Strict {
                return Err(Error::unsupported(msg));
            }
            log::warn!("{msg}; using the default interval of 1");
            1
        };

        let count = match self.count {
            Some(0) => {
                let msg = "count value of `0` is invalid \
                           (count must be greater than or equal to 1)";
                if strictness == Strictness::Strict {
                    return Err(Error::unsupported(msg));
                }
                log::warn!("{msg}; dropping the count bound");
                None
            }
            count => count,
        };

        let by_month = sanitize_list(
            "by month",
            &self.by_month,
            1..=12,
            "values must be in range 1..=12",
            strictness,
        )?;
        let by_month_day = sanitize_signed_list(
            "by day of the month",
            &self.by_month_day,
            31,
            "values must be in range 1..=31 or -31..=-1",
            strictness,
        )?;
        let by_year_day = sanitize_signed_list(
            "by day of the year",
            &self.by_year_day,
            366,
            "values must be in range 1..=366 or -366..=-1",
            strictness,
        )?;
        let by_week = sanitize_signed_list(
            "by week",
            &self.by_week,
            53,
            "values must be in range 1..=53 or -53..=-1",
            strictness,
        )?;
        let by_hour = sanitize_list(
            "by hour",
            &self.by_hour,
            0..=23,
            "values must be in range 0..=23",
            strictness,
        )?;
        let by_minute = sanitize_list(
            "by minute",
            &self.by_minute,
            0..=59,
            "values must be in range 0..=59",
            strictness,
        )?;
        // RFC 5545 technically allows 60 for a leap second. Jiff does
        // not represent leap seconds, so 60 is out of range here, the
        // same choice python-dateutil makes.
        let by_second = sanitize_list(
            "by second",
            &self.by_second,
            0..=59,
            "values must be in range 0..=59",
            strictness,
        )?;
        let by_set_pos = sanitize_signed_list(
            "by set position",
            &self.by_set_pos,
            366,
            "values must be in range 1..=366 or -366..=-1",
            strictness,
        )?;
        let by_week_day =
            sanitize_week_day_terms(&self.by_week_day, strictness)?;

        // A BYSETPOS specific invariant: if it's given, then there
        // MUST be another BY* selector for it to index into.
        if !by_set_pos.is_empty()
            && by_month.is_empty()
            && by_week.is_empty()
            && by_year_day.is_empty()
            && by_month_day.is_empty()
            && by_week_day.is_empty()
            && by_hour.is_empty()
            && by_minute.is_empty()
            && by_second.is_empty()
        {
            return Err(Error::invalid_rule(
                "when 'by set position' is used, at least one other \
                 'by' selector must be specified, but all are empty",
            ));
        }

        if count.is_some() && self.until.is_some() {
            return Err(Error::invalid_rule(
                "`COUNT` and `UNTIL` cannot both be set on the same rule",
            ));
        }

        if let Some(ref dtstart) = self.dtstart {
            if freq.is_sub_daily() {
                if let Moment::Date(_) = *dtstart {
                    return Err(Error::invalid_rule(format!(
                        "a {freq} frequency requires a starting point \
                         with a time, but `{dtstart}` is a date",
                        freq = freq.as_str(),
                    )));
                }
            }
        }

        let until = match self.until {
            None => None,
            Some(ref until) => {
                let until = anchor_until(self.dtstart.as_ref(), until)?;
                if let Some(ref dtstart) = self.dtstart {
                    if until < *dtstart {
                        return Err(Error::invalid_rule(format!(
                            "`UNTIL` (`{until}`) is before the starting \
                             point (`{dtstart}`)",
                        )));
                    }
                }
                Some(until)
            }
        };

        let max_iterations = if self.max_iterations >= 1 {
            self.max_iterations
        } else {
            let msg = "maximum iteration count of `0` is invalid \
                       (the cap must be greater than or equal to 1)";
            if strictness == Strictness::Strict {
                return Err(Error::unsupported(msg));
            }
            log::warn!("{msg}; using the default of {DEFAULT_MAX_ITERATIONS}");
            DEFAULT_MAX_ITERATIONS
        };

        let interval_span = freq.to_span(interval)?;
        let inner = Arc::new(RuleInner {
            freq,
            dtstart: self.dtstart.clone(),
            interval,
            count,
            until,
            wkst: self.wkst,
            by_month,
            by_month_day,
            by_year_day,
            by_week,
            by_week_day,
            by_hour,
            by_minute,
            by_second,
            by_set_pos,
            interval_span,
            max_iterations,
        });
        Ok(Rule { inner })
    }
}

/// Re-anchors an `UNTIL` bound to the starting point's variant, so
/// that every comparison the generator makes is between like moments.
///
/// A zoned bound against a zoned start converts by instant into the
/// start's zone. A civil bound against a zoned start is read as a
/// wall-clock time in that zone. A date-only bound against a datetime
/// rule means midnight of that date, and a date rule truncates any
/// bound to its date.
fn anchor_until(
    dtstart: Option<&Moment>,
    until: &Moment,
) -> Result<Moment, Error> {
    let Some(dtstart) = dtstart else { return Ok(until.clone()) };
    match (dtstart, until) {
        (&Moment::Date(_), until) => {
            Ok(Moment::Date(until.civil().date()))
        }
        (&Moment::DateTime(_), &Moment::Date(date)) => {
            Ok(Moment::DateTime(date.to_datetime(Time::midnight())))
        }
        (&Moment::DateTime(_), &Moment::DateTime(dt)) => {
            Ok(Moment::DateTime(dt))
        }
        (&Moment::DateTime(_), &Moment::Zoned(ref zdt)) => {
            Ok(Moment::DateTime(zdt.datetime()))
        }
        (&Moment::Zoned(ref start), &Moment::Zoned(ref zdt)) => Ok(
            Moment::Zoned(zdt.timestamp().to_zoned(start.time_zone().clone())),
        ),
        (&Moment::Zoned(ref start), until) => {
            until.in_time_zone(start.time_zone().clone())
        }
    }
}

fn dedup_preserving<T: Copy + PartialEq>(values: Vec<T>) -> Box<[T]> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out.into_boxed_slice()
}

/// Range-checks a selector whose values live in a simple inclusive
/// range, then deduplicates preserving first-seen order.
fn sanitize_list(
    what: &str,
    values: &[i8],
    range: std::ops::RangeInclusive<i8>,
    bounds: &str,
    strictness: Strictness,
) -> Result<Box<[i8]>, Error> {
    let mut kept = Vec::with_capacity(values.len());
    for &v in values {
        if range.contains(&v) {
            kept.push(v);
        } else if strictness == Strictness::Strict {
            return Err(Error::unsupported(format!(
                "invalid '{what}' value `{v}` ({bounds})",
            )));
        } else {
            log::warn!("dropping invalid '{what}' value `{v}` ({bounds})");
        }
    }
    Ok(dedup_preserving(kept))
}

/// Range-checks a selector whose values may be negative but never
/// zero, then deduplicates preserving first-seen order.
fn sanitize_signed_list<T: Copy + PartialEq + Into<i64>>(
    what: &str,
    values: &[T],
    magnitude: i64,
    bounds: &str,
    strictness: Strictness,
) -> Result<Box<[T]>, Error> {
    let mut kept = Vec::with_capacity(values.len());
    for &v in values {
        let n: i64 = v.into();
        if n != 0 && (-magnitude..=magnitude).contains(&n) {
            kept.push(v);
        } else if strictness == Strictness::Strict {
            return Err(Error::unsupported(format!(
                "invalid '{what}' value `{n}` ({bounds})",
            )));
        } else {
            log::warn!("dropping invalid '{what}' value `{n}` ({bounds})");
        }
    }
    Ok(dedup_preserving(kept))
}

fn sanitize_week_day_terms(
    terms: &[WeekdayTerm],
    strictness: Strictness,
) -> Result<Box<[WeekdayTerm]>, Error> {
    let mut kept = Vec::with_capacity(terms.len());
    for &term in terms {
        match term.nth() {
            None => kept.push(term),
            Some(nth) if nth != 0 && (-53..=53).contains(&nth) => {
                kept.push(term);
            }
            Some(nth) => {
                let msg = format!(
                    "invalid numbered 'by week day' value `{term}` \
                     (ordinal `{nth}` must be in range 1..=53 or -53..=-1)",
                );
                if strictness == Strictness::Strict {
                    return Err(Error::unsupported(msg));
                }
                log::warn!("dropping {msg}");
            }
        }
    }
    Ok(dedup_preserving(kept))
}

#[cfg(feature = "serde")]
impl serde::Serialize for Rule {
    fn serialize<S: serde::Serializer>(
        &self,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Rule {
    fn deserialize<D: serde::Deserializer<'de>>(
        d: D,
    ) -> Result<Rule, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = Rule;

            fn expecting(
                &self,
                f: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                f.write_str("an iCalendar RRULE string")
            }

            fn visit_str<E: serde::de::Error>(
                self,
                value: &str,
            ) -> Result<Rule, E> {
                value.parse().map_err(serde::de::Error::custom)
            }
        }

        d.deserialize_str(Visitor)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Frequency {
    fn serialize<S: serde::Serializer>(
        &self,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Frequency {
    fn deserialize<D: serde::Deserializer<'de>>(
        d: D,
    ) -> Result<Frequency, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = Frequency;

            fn expecting(
                &self,
                f: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                f.write_str("an RFC 5545 frequency name")
            }

            fn visit_str<E: serde::de::Error>(
                self,
                value: &str,
            ) -> Result<Frequency, E> {
                value.parse().map_err(serde::de::Error::custom)
            }
        }

        d.deserialize_str(Visitor)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for WeekdayTerm {
    fn serialize<S: serde::Serializer>(
        &self,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for WeekdayTerm {
    fn deserialize<D: serde::Deserializer<'de>>(
        d: D,
    ) -> Result<WeekdayTerm, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = WeekdayTerm;

            fn expecting(
                &self,
                f: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                f.write_str("a BYDAY weekday token")
            }

            fn visit_str<E: serde::de::Error>(
                self,
                value: &str,
            ) -> Result<WeekdayTerm, E> {
                value.parse().map_err(serde::de::Error::custom)
            }
        }

        d.deserialize_str(Visitor)
    }
}

#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;

    #[test]
    fn rule_serializes_as_wire_text() {
        let rule: Rule = "DTSTART:19970902T090000\n\
                          RRULE:FREQ=DAILY;COUNT=3"
            .parse()
            .unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(
            json,
            "\"DTSTART:19970902T090000\\nRRULE:FREQ=DAILY;COUNT=3\"",
        );
        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
    }

    #[test]
    fn tokens_serialize_as_wire_tokens() {
        let freq: Frequency = serde_json::from_str("\"WEEKLY\"").unwrap();
        assert_eq!(freq, Frequency::Weekly);
        assert_eq!(serde_json::to_string(&freq).unwrap(), "\"WEEKLY\"");

        let term: WeekdayTerm = serde_json::from_str("\"-2FR\"").unwrap();
        assert_eq!(
            term,
            WeekdayTerm::Nth { nth: -2, weekday: Weekday::Friday },
        );
        assert_eq!(serde_json::to_string(&term).unwrap(), "\"-2FR\"");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moment(s: &str) -> Moment {
        s.parse().unwrap()
    }

    #[test]
    fn freq_defaults_to_yearly() {
        let rule = Rule::builder().build().unwrap();
        assert_eq!(rule.freq(), Frequency::Yearly);
        assert_eq!(rule.interval(), 1);
        assert_eq!(rule.wkst(), None);
        assert_eq!(rule.week_start(), Weekday::Monday);
    }

    #[test]
    fn weekday_term_tokens() {
        let term: WeekdayTerm = "MO".parse().unwrap();
        assert_eq!(term, WeekdayTerm::Every(Weekday::Monday));

        let term: WeekdayTerm = "+1we".parse().unwrap();
        assert_eq!(
            term,
            WeekdayTerm::Nth { nth: 1, weekday: Weekday::Wednesday },
        );

        let term: WeekdayTerm = "-2FR".parse().unwrap();
        assert_eq!(
            term,
            WeekdayTerm::Nth { nth: -2, weekday: Weekday::Friday },
        );
        assert_eq!(term.to_string(), "-2FR");

        let err = "0MO".parse::<WeekdayTerm>().unwrap_err();
        insta::assert_snapshot!(
            err,
            @"invalid ordinal `0` in weekday token `0MO` (ordinals must be in range 1..=53 or -53..=-1)",
        );
        let err = "54SA".parse::<WeekdayTerm>().unwrap_err();
        insta::assert_snapshot!(
            err,
            @"invalid ordinal `54` in weekday token `54SA` (ordinals must be in range 1..=53 or -53..=-1)",
        );
        let err = "FOO".parse::<WeekdayTerm>().unwrap_err();
        insta::assert_snapshot!(
            err,
            @"unrecognized weekday token `FOO` (expected an optional ordinal followed by one of MO, TU, WE, TH, FR, SA, SU)",
        );
    }

    #[test]
    fn lenient_build_filters_and_dedups() {
        let rule = Rule::builder()
            .freq(Frequency::Yearly)
            .by_month([4, 13, 4, 2, 0, 2])
            .by_month_day([31, 0, -32, -1, 31])
            .build()
            .unwrap();
        assert_eq!(rule.by_month(), &[4, 2]);
        assert_eq!(rule.by_month_day(), &[31, -1]);
    }

    #[test]
    fn strict_build_rejects_out_of_range() {
        let err = Rule::builder()
            .freq(Frequency::Yearly)
            .by_month([13])
            .build_strict()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"invalid 'by month' value `13` (values must be in range 1..=12)",
        );

        let err = Rule::builder()
            .freq(Frequency::Yearly)
            .by_week([54])
            .build_strict()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"invalid 'by week' value `54` (values must be in range 1..=53 or -53..=-1)",
        );

        let err = Rule::builder()
            .freq(Frequency::Yearly)
            .by_second([60])
            .build_strict()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"invalid 'by second' value `60` (values must be in range 0..=59)",
        );

        let err =
            Rule::builder().interval(0).build_strict().unwrap_err();
        insta::assert_snapshot!(
            err,
            @"interval value of `0` is invalid (interval must be greater than or equal to 1)",
        );
    }

    #[test]
    fn count_and_until_are_mutually_exclusive() {
        let err = Rule::builder()
            .freq(Frequency::Daily)
            .dtstart(moment("1997-09-02T09:00:00"))
            .count(10)
            .until(moment("1997-12-24T00:00:00"))
            .build()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"`COUNT` and `UNTIL` cannot both be set on the same rule",
        );
    }

    #[test]
    fn until_before_dtstart_is_rejected() {
        let err = Rule::builder()
            .freq(Frequency::Daily)
            .dtstart(moment("1997-09-02T09:00:00"))
            .until(moment("1997-09-01T09:00:00"))
            .build()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"`UNTIL` (`1997-09-01T09:00:00`) is before the starting point (`1997-09-02T09:00:00`)",
        );
    }

    #[test]
    fn set_pos_requires_a_partner() {
        let err = Rule::builder()
            .freq(Frequency::Monthly)
            .by_set_pos([3])
            .build()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"when 'by set position' is used, at least one other 'by' selector must be specified, but all are empty",
        );

        // Leniently dropping every partner value also trips it.
        let err = Rule::builder()
            .freq(Frequency::Monthly)
            .by_month([0, 13])
            .by_set_pos([3])
            .build()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"when 'by set position' is used, at least one other 'by' selector must be specified, but all are empty",
        );
    }

    #[test]
    fn sub_daily_needs_a_time() {
        let err = Rule::builder()
            .freq(Frequency::Hourly)
            .dtstart(moment("2025-03-01"))
            .build()
            .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"a HOURLY frequency requires a starting point with a time, but `2025-03-01` is a date",
        );
    }

    #[test]
    fn until_is_anchored_to_the_start() {
        // A UTC until against a zoned start converts into the start's
        // zone by instant.
        let rule = Rule::builder()
            .freq(Frequency::Daily)
            .dtstart(moment("1997-09-02T09:00:00[America/New_York]"))
            .until(moment("1997-12-24T00:00:00[UTC]"))
            .build()
            .unwrap();
        assert_eq!(
            rule.until().unwrap(),
            &moment("1997-12-23T19:00:00[America/New_York]"),
        );

        // A date-only until against a datetime rule means midnight.
        let rule = Rule::builder()
            .freq(Frequency::Daily)
            .dtstart(moment("1997-09-02T09:00:00"))
            .until(moment("1997-12-24"))
            .build()
            .unwrap();
        assert_eq!(rule.until().unwrap(), &moment("1997-12-24T00:00:00"));

        // A date rule truncates the bound to its date.
        let rule = Rule::builder()
            .freq(Frequency::Daily)
            .dtstart(moment("1997-09-02"))
            .until(moment("1997-12-24T09:00:00"))
            .build()
            .unwrap();
        assert_eq!(rule.until().unwrap(), &moment("1997-12-24"));
    }

    #[test]
    fn to_builder_round_trips() {
        let rule = Rule::builder()
            .freq(Frequency::Weekly)
            .dtstart(moment("1997-09-02T09:00:00"))
            .interval(2)
            .week_start(Weekday::Sunday)
            .by_week_day([Weekday::Tuesday, Weekday::Thursday])
            .count(8)
            .build()
            .unwrap();
        let rebuilt = rule.to_builder().build().unwrap();
        assert_eq!(rule, rebuilt);

        let mut builder = rule.to_builder();
        builder.interval(3);
        let changed = builder.build().unwrap();
        assert_ne!(rule, changed);
        assert_eq!(changed.interval(), 3);
    }
}
