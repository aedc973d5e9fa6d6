use jiff::{
    ToSpan,
    civil::{Date, DateTime, Time},
    tz::AmbiguousOffset,
};

use crate::{
    error::Error,
    moment::Moment,
    rule::{Frequency, Rule, WeekdayTerm},
    week,
};

/// How many consecutive empty periods the generator tolerates before
/// concluding that a rule which has produced nothing never will.
const EMPTY_PERIOD_LIMIT: usize = 1_000;

impl Rule {
    /// Returns a lazy iterator over the moments at which this rule
    /// occurs, in strictly increasing order.
    ///
    /// The sequence may be unbounded when the rule has neither `count`
    /// nor `until`; callers should bound it themselves (for example
    /// with `take`) or rely on the iteration cap, which surfaces as an
    /// `Err(MaxIterationsExceeded)` item. A rule without a starting
    /// point yields a single `Err(MissingDtstart)`.
    ///
    /// The iterator snapshots the rule at creation. Two iterators from
    /// the same rule are independent and produce identical sequences.
    pub fn occurrences(&self) -> Occurrences {
        Occurrences::new(self.clone(), None)
    }

    /// Like `occurrences`, but allowed to skip whole periods that end
    /// before `target`. Never skips an occurrence at or after
    /// `target`; occurrences before it may or may not be produced.
    pub(crate) fn occurrences_from(&self, target: &Moment) -> Occurrences {
        Occurrences::new(self.clone(), Some(target))
    }
}

/// The lazy occurrence sequence of one rule.
///
/// Created by [`Rule::occurrences`]. The iterator works one period at
/// a time: it expands the period containing its cursor into a scratch
/// set of candidate datetimes, drains that set in chronological order,
/// then steps the cursor forward by the rule's interval and repeats.
#[derive(Clone, Debug)]
pub struct Occurrences {
    rule: Rule,
    set: PeriodSet,
    /// The interval index along with the current cursor datetime.
    ///
    /// The cursor for attempt `n` is always computed as the start plus
    /// `n` intervals, never by adding one interval to the previous
    /// cursor. Accumulating would bake constrained days in: once
    /// 2025-03-31 clamps to 2025-04-30, adding further months could
    /// never reach a 31st again.
    ///
    /// `None` means no further periods will be expanded.
    cur: Option<(i64, DateTime)>,
    /// The civil reading of the rule's starting point.
    start: DateTime,
    /// Whether the first period has been located yet. Deferred so that
    /// construction stays infallible and errors surface as items.
    initialized: bool,
    /// The attempt index to start from, precomputed from the seek
    /// target.
    seek_attempt: i64,
    /// Whether at least one period has been expanded.
    expanded: bool,
    emitted: u32,
    iterations: usize,
    consecutive_empty: usize,
    done: bool,
}

impl Occurrences {
    fn new(rule: Rule, target: Option<&Moment>) -> Occurrences {
        // The placeholder start is never used: iteration bails with
        // `MissingDtstart` before the cursor is ever computed.
        let start = rule
            .dtstart()
            .map(Moment::civil)
            .unwrap_or_else(|| Date::MIN.to_datetime(Time::midnight()));
        // A `COUNT` bound counts from the very first occurrence, so a
        // count-bounded rule can never skip ahead.
        let seek_attempt = match target {
            Some(target) if rule.count().is_none() => {
                seek_attempt(&rule, start, target)
            }
            _ => 0,
        };
        Occurrences {
            rule,
            set: PeriodSet::new(),
            cur: None,
            start,
            initialized: false,
            seek_attempt,
            expanded: false,
            emitted: 0,
            iterations: 0,
            consecutive_empty: 0,
            done: false,
        }
    }

    /// Finds the first non-skipped period at or after the given
    /// attempt index. Returns `Ok(None)` when iteration is exhausted
    /// (arithmetic overflow or every remaining period starts past
    /// `until`), and an error when the iteration cap is hit.
    fn find_cursor(
        &mut self,
        from: i64,
    ) -> Result<Option<(i64, DateTime)>, Error> {
        let limit = self.rule.max_iterations();
        let span = self.rule.inner.interval_span;
        let mut attempt = from;
        loop {
            if attempt > 0 {
                self.iterations += 1;
                if self.iterations > limit {
                    return Err(Error::MaxIterationsExceeded { limit });
                }
            }
            let Ok(step) = span.checked_mul(attempt) else {
                return Ok(None);
            };
            let Ok(next) = self.start.checked_add(step) else {
                return Ok(None);
            };
            // Not required for correctness (emission filtering handles
            // `until` too), but it bounds the work done on rules whose
            // periods stop producing anything before the bound.
            if let Some(until) = self.rule.until() {
                if self.period_floor(next) > until.civil() {
                    return Ok(None);
                }
            }
            if self.should_skip(next) {
                attempt += 1;
                continue;
            }
            return Ok(Some((attempt, next)));
        }
    }

    /// The earliest civil datetime any candidate of the period
    /// anchored at `cursor` can have.
    fn period_floor(&self, cursor: DateTime) -> DateTime {
        let midnight = |date: Date| date.to_datetime(Time::midnight());
        match self.rule.freq() {
            Frequency::Yearly => midnight(cursor.date().first_of_year()),
            Frequency::Monthly => midnight(cursor.date().first_of_month()),
            Frequency::Weekly => {
                week::start_of_week(self.rule.week_start(), cursor.date())
                    .map(midnight)
                    .unwrap_or(cursor)
            }
            Frequency::Daily => midnight(cursor.date()),
            Frequency::Hourly => cursor
                .with()
                .minute(0)
                .second(0)
                .subsec_nanosecond(0)
                .build()
                .unwrap_or(cursor),
            Frequency::Minutely => cursor
                .with()
                .second(0)
                .subsec_nanosecond(0)
                .build()
                .unwrap_or(cursor),
            Frequency::Secondly => cursor,
        }
    }

    /// Whether a period must be skipped because month or year
    /// arithmetic clamped the cursor's day.
    ///
    /// When adding N months or years lands on a day that does not
    /// exist (2025-01-31 plus one month), Jiff constrains to the last
    /// valid day. RFC 5545 instead wants the nonexistent date treated
    /// as an empty period. A constrained cursor is detectable as a
    /// changed day number, and matters only when no date selector
    /// would override the day anyway.
    fn should_skip(&self, next: DateTime) -> bool {
        if next.day() == self.start.day() {
            return false;
        }
        let r = &*self.rule.inner;
        match r.freq {
            Frequency::Yearly => {
                r.by_month.is_empty()
                    && r.by_week.is_empty()
                    && r.by_year_day.is_empty()
                    && r.by_month_day.is_empty()
                    && r.by_week_day.is_empty()
            }
            Frequency::Monthly => {
                r.by_week_day.is_empty() && r.by_month_day.is_empty()
            }
            _ => false,
        }
    }

    fn advance(&mut self) -> Result<(), Error> {
        let Some((attempt, _)) = self.cur else { return Ok(()) };
        self.cur = self.find_cursor(attempt + 1)?;
        Ok(())
    }
}

impl Iterator for Occurrences {
    type Item = Result<Moment, Error>;

    fn next(&mut self) -> Option<Result<Moment, Error>> {
        if self.done {
            return None;
        }
        if !self.initialized {
            self.initialized = true;
            if self.rule.dtstart().is_none() {
                self.done = true;
                return Some(Err(Error::MissingDtstart));
            }
            match self.find_cursor(self.seek_attempt) {
                Ok(cur) => self.cur = cur,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        loop {
            match self.set.pop(&self.rule) {
                Pop::One(moment) => {
                    self.emitted += 1;
                    if let Some(count) = self.rule.count() {
                        if self.emitted >= count {
                            self.done = true;
                        }
                    }
                    return Some(Ok(moment));
                }
                Pop::PastUntil => {
                    self.done = true;
                    return None;
                }
                Pop::Empty => {
                    if self.expanded && self.emitted == 0 {
                        self.consecutive_empty += 1;
                        if self.consecutive_empty >= EMPTY_PERIOD_LIMIT {
                            log::debug!(
                                "rule produced no occurrences in \
                                 {EMPTY_PERIOD_LIMIT} consecutive periods; \
                                 treating it as exhausted",
                            );
                            self.done = true;
                            return None;
                        }
                    }
                    let Some((_, cursor)) = self.cur else {
                        self.done = true;
                        return None;
                    };
                    Expander { rule: &self.rule, start: self.start, cursor }
                        .expand(&mut self.set);
                    self.expanded = true;
                    if let Err(err) = self.advance() {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }
        }
    }
}

impl std::iter::FusedIterator for Occurrences {}

/// Computes a conservative attempt index for a seek target: the
/// number of whole intervals between the start and the target, minus
/// one. Rounding down (twice) guarantees that the period containing
/// the first occurrence at or after the target is still expanded.
/// Sub-daily frequencies are not optimized and scan from the start.
fn seek_attempt(rule: &Rule, start: DateTime, target: &Moment) -> i64 {
    let target = target.civil();
    if target <= start {
        return 0;
    }
    let periods = match rule.freq() {
        Frequency::Yearly => i64::from(target.year() - start.year()),
        Frequency::Monthly => {
            i64::from(target.year() - start.year()) * 12
                + i64::from(target.month() - start.month())
        }
        Frequency::Weekly => {
            let wkst = rule.week_start();
            let weeks = week::start_of_week(wkst, start.date()).and_then(
                |start_week| {
                    let target_week =
                        week::start_of_week(wkst, target.date())?;
                    start_week.until(target_week).map_err(|err| {
                        Error::invalid_moment(err.to_string())
                    })
                },
            );
            match weeks {
                Ok(span) => span.get_days() as i64 / 7,
                Err(_) => 0,
            }
        }
        Frequency::Daily => match start.date().until(target.date()) {
            Ok(span) => span.get_days() as i64,
            Err(_) => 0,
        },
        _ => 0,
    };
    let attempt = (periods / i64::from(rule.interval()) - 1).max(0);
    if attempt > 0 {
        log::trace!(
            "seeking to {target}: starting {attempt} intervals \
             after the rule start",
        );
    }
    attempt
}

/// What draining one element from the period set produced.
enum Pop {
    /// The next occurrence, in order.
    One(Moment),
    /// The set is empty; the next period needs expanding.
    Empty,
    /// A candidate landed past `until`; the whole sequence is over.
    PastUntil,
}

/// The scratch set of candidates for a single period.
///
/// Candidates accumulate as civil datetimes while the expander runs,
/// get sorted in reverse so that popping from the end yields
/// chronological order, and resolve to moments of the rule's variant
/// as they are drained. When `BYSETPOS` is in play the whole set is
/// resolved up front instead, because negative positions need the
/// final set length, and for zoned rules a candidate skipped by a
/// time zone gap must not occupy a position.
#[derive(Clone, Debug)]
struct PeriodSet {
    civil: Vec<DateTime>,
    resolved: Vec<Moment>,
    /// The later twin of a wall-clock time repeated by a backward
    /// transition, queued to be emitted right after the earlier one.
    pending: Option<Moment>,
}

impl PeriodSet {
    fn new() -> PeriodSet {
        PeriodSet { civil: vec![], resolved: vec![], pending: None }
    }

    fn insert(&mut self, dt: DateTime) {
        self.civil.push(dt);
    }

    fn clear(&mut self) {
        self.civil.clear();
        self.resolved.clear();
        self.pending = None;
    }

    fn retain(&mut self, predicate: impl FnMut(&mut DateTime) -> bool) {
        self.civil.retain_mut(predicate);
    }

    /// Replaces every candidate with its expansion under the given
    /// closure.
    fn expand<E, I>(&mut self, expand: E)
    where
        E: Fn(DateTime) -> I,
        I: Iterator<Item = DateTime>,
    {
        let len = self.civil.len();
        for i in 0..len {
            let dt = self.civil[i];
            self.civil.extend(expand(dt));
        }
        self.civil.drain(..len);
    }

    /// Sorts candidates newest-first (so popping from the end is
    /// chronological) and removes duplicates.
    fn canonicalize(&mut self) {
        self.civil.sort_by(|dt1, dt2| dt1.cmp(dt2).reverse());
        self.civil.dedup();
    }

    fn pop(&mut self, rule: &Rule) -> Pop {
        loop {
            let next = match self.resolved.pop().or_else(|| {
                self.pop_civil(rule)
            }) {
                None => return Pop::Empty,
                Some(next) => next,
            };
            // The expander is allowed to produce candidates before the
            // starting point (this generally only happens in the first
            // period); they are not occurrences, but BYSETPOS wants
            // them present while positions resolve, so the filter
            // lives here at the very end.
            if let Some(start) = rule.dtstart() {
                if next < *start {
                    continue;
                }
            }
            if let Some(until) = rule.until() {
                if next > *until {
                    // Emission is chronological, so nothing after this
                    // candidate can be in bounds either.
                    self.clear();
                    return Pop::PastUntil;
                }
            }
            return Pop::One(next);
        }
    }

    /// Pops the chronologically next civil candidate and resolves it
    /// to a moment of the rule's variant.
    fn pop_civil(&mut self, rule: &Rule) -> Option<Moment> {
        loop {
            if let Some(moment) = self.pending.take() {
                return Some(moment);
            }
            let dt = self.civil.pop()?;
            match rule.dtstart() {
                None | Some(&Moment::DateTime(_)) => {
                    return Some(Moment::DateTime(dt));
                }
                Some(&Moment::Date(_)) => {
                    return Some(Moment::Date(dt.date()));
                }
                Some(&Moment::Zoned(ref zdt)) => {
                    let tz = zdt.time_zone();
                    match tz.to_ambiguous_zoned(dt).offset() {
                        AmbiguousOffset::Unambiguous { offset } => {
                            let Ok(ts) = offset.to_timestamp(dt) else {
                                continue;
                            };
                            return Some(Moment::Zoned(
                                ts.to_zoned(tz.clone()),
                            ));
                        }
                        // RFC 5545 says a time that does not exist in
                        // the rule's time zone is skipped.
                        AmbiguousOffset::Gap { .. } => continue,
                        // A repeated time is emitted once per reading,
                        // earlier instant first.
                        AmbiguousOffset::Fold { before, after } => {
                            if let Ok(ts) = after.to_timestamp(dt) {
                                self.pending = Some(Moment::Zoned(
                                    ts.to_zoned(tz.clone()),
                                ));
                            }
                            if let Ok(ts) = before.to_timestamp(dt) {
                                return Some(Moment::Zoned(
                                    ts.to_zoned(tz.clone()),
                                ));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Drains the civil set into resolved moments, keeping order.
    fn resolve_all(&mut self, rule: &Rule) {
        while let Some(moment) = self.pop_civil(rule) {
            self.resolved.push(moment);
        }
    }
}

/// Expands a single period of a rule into its candidate set.
#[derive(Clone, Copy, Debug)]
struct Expander<'r> {
    rule: &'r Rule,
    /// The civil reading of the rule's starting point.
    start: DateTime,
    /// The anchor of the period being expanded.
    cursor: DateTime,
}

impl<'r> Expander<'r> {
    fn expand(&self, set: &mut PeriodSet) {
        match self.rule.freq() {
            Frequency::Yearly => self.yearly(set),
            Frequency::Monthly => self.monthly(set),
            Frequency::Weekly => self.weekly(set),
            Frequency::Daily => self.daily(set),
            Frequency::Hourly => self.hourly(set),
            Frequency::Minutely => self.minutely(set),
            Frequency::Secondly => self.secondly(set),
        }
        set.canonicalize();

        // BYSETPOS indexes into the chronological period set, so the
        // set has to be complete (and, for zoned rules, resolved, so
        // that gap-skipped candidates don't occupy positions) before
        // positions can be applied. Negative positions additionally
        // need the set's final length.
        if !self.rule.by_set_pos().is_empty() {
            set.resolve_all(self.rule);
            set.resolved.sort();
            set.resolved.dedup();
            let len = set.resolved.len();
            let mut position = 0;
            set.resolved.retain(|_| {
                let keep = self.satisfies_set_pos(position, len);
                position += 1;
                keep
            });
            set.resolved.reverse();
        }
    }

    /// YEARLY expansion. The branches are mutually exclusive and in
    /// precedence order: a year-wide ordinal weekday expansion, then
    /// `BYYEARDAY`, then `BYWEEKNO`, then month-by-month expansion.
    fn yearly(&self, set: &mut PeriodSet) {
        let r = &*self.rule.inner;
        let has_ordinal =
            r.by_week_day.iter().any(|term| term.nth().is_some());
        if has_ordinal && r.by_month.is_empty() {
            self.expand_week_days_in_year(set);
        } else if !r.by_year_day.is_empty() {
            self.expand_year_days(set);
            self.limit_by_month(set);
        } else if !r.by_week.is_empty() {
            self.expand_week_numbers(set);
        } else {
            let months: Vec<i8> = if !r.by_month.is_empty() {
                r.by_month.to_vec()
            } else if !r.by_month_day.is_empty() || !r.by_week_day.is_empty()
            {
                (1..=12).collect()
            } else {
                vec![self.cursor.month()]
            };
            for month in months {
                self.month_candidates(set, self.cursor.year(), month);
            }
        }
        self.expand_hours(set);
        self.expand_minutes(set);
        self.expand_seconds(set);
    }

    /// MONTHLY expansion. `BYMONTH` acts as a limiter on the whole
    /// period; the day set combines `BYMONTHDAY` and `BYDAY`.
    fn monthly(&self, set: &mut PeriodSet) {
        if !self.satisfies_by_month(self.cursor) {
            return;
        }
        self.month_candidates(set, self.cursor.year(), self.cursor.month());
        self.expand_hours(set);
        self.expand_minutes(set);
        self.expand_seconds(set);
    }

    /// WEEKLY expansion: walk the seven days of the cursor's week
    /// (per the rule's week start) and keep the selected weekdays,
    /// then limit by month and month day individually, since a week
    /// can straddle a month boundary.
    fn weekly(&self, set: &mut PeriodSet) {
        let r = &*self.rule.inner;
        let Ok(week_start) = week::start_of_week(
            self.rule.week_start(),
            self.cursor.date(),
        ) else {
            return;
        };
        for offset in 0..7 {
            let Ok(date) = week_start.checked_add((offset as i32).days())
            else {
                continue;
            };
            let selected = if r.by_week_day.is_empty() {
                date.weekday() == self.start.weekday()
            } else {
                // Ordinals are meaningless inside a single week; a
                // numbered term selects by its weekday alone here.
                r.by_week_day
                    .iter()
                    .any(|term| term.weekday() == date.weekday())
            };
            if !selected {
                continue;
            }
            if let Ok(dt) = self.cursor.with().date(date).build() {
                set.insert(dt);
            }
        }
        self.limit_by_month(set);
        self.limit_by_month_day(set);
        self.expand_hours(set);
        self.expand_minutes(set);
        self.expand_seconds(set);
    }

    /// DAILY: the cursor day either passes the date-level limiters or
    /// the period is empty. Ordinal weekday terms do not apply at this
    /// frequency and are ignored.
    fn daily(&self, set: &mut PeriodSet) {
        if !self.satisfies_by_month(self.cursor)
            || !self.satisfies_by_month_day(self.cursor)
            || !self.satisfies_bare_week_day(self.cursor)
        {
            return;
        }
        set.insert(self.cursor);
        self.expand_hours(set);
        self.expand_minutes(set);
        self.expand_seconds(set);
    }

    fn hourly(&self, set: &mut PeriodSet) {
        if !self.satisfies_by_month(self.cursor)
            || !self.satisfies_by_month_day(self.cursor)
            || !self.satisfies_bare_week_day(self.cursor)
            || !self.satisfies_by_hour(self.cursor)
        {
            return;
        }
        set.insert(self.cursor);
        self.expand_minutes(set);
        self.expand_seconds(set);
    }

    fn minutely(&self, set: &mut PeriodSet) {
        if !self.satisfies_by_month(self.cursor)
            || !self.satisfies_by_month_day(self.cursor)
            || !self.satisfies_bare_week_day(self.cursor)
            || !self.satisfies_by_hour(self.cursor)
            || !self.satisfies_by_minute(self.cursor)
        {
            return;
        }
        set.insert(self.cursor);
        self.expand_seconds(set);
    }

    fn secondly(&self, set: &mut PeriodSet) {
        if !self.satisfies_by_month(self.cursor)
            || !self.satisfies_by_month_day(self.cursor)
            || !self.satisfies_bare_week_day(self.cursor)
            || !self.satisfies_by_hour(self.cursor)
            || !self.satisfies_by_minute(self.cursor)
            || !self.satisfies_by_second(self.cursor)
        {
            return;
        }
        set.insert(self.cursor);
    }

    /// Whether the rule's starting point carries no time, which makes
    /// time expansion a no-op.
    fn date_only(&self) -> bool {
        matches!(self.rule.dtstart(), Some(&Moment::Date(_)))
    }

    /// Emits the day candidates of one month: the intersection of
    /// `BYMONTHDAY` and `BYDAY` when both are present, either alone
    /// otherwise, and the rule start's day number when neither is set.
    /// Days that don't exist in the month are silently absent.
    fn month_candidates(&self, set: &mut PeriodSet, year: i16, month: i8) {
        let r = &*self.rule.inner;
        let Ok(first) = Date::new(year, month, 1) else { return };
        let days_in_month = first.days_in_month();
        let time = self.cursor.time();
        let mut push = |day: i8| {
            if let Ok(date) = Date::new(year, month, day) {
                set.insert(date.to_datetime(time));
            }
        };
        if !r.by_week_day.is_empty() {
            let days = week_day_days_in_month(first, &r.by_week_day);
            for day in days {
                if r.by_month_day.is_empty()
                    || month_day_selected(&r.by_month_day, day, days_in_month)
                {
                    push(day);
                }
            }
        } else if !r.by_month_day.is_empty() {
            for &d in r.by_month_day.iter() {
                let day = if d < 0 { days_in_month + d + 1 } else { d };
                if (1..=days_in_month).contains(&day) {
                    push(day);
                }
            }
        } else {
            push(self.start.day());
        }
    }

    /// Year-wide `BYDAY` expansion: bare terms contribute every
    /// matching weekday of the cursor's year; a numbered term walks to
    /// the nth matching weekday from the start of the year (or the
    /// |nth|th from its end) and contributes it if the walk stays in
    /// the year.
    fn expand_week_days_in_year(&self, set: &mut PeriodSet) {
        let first = self.cursor.date().first_of_year();
        let last = self.cursor.date().last_of_year();
        let time = self.cursor.time();
        for &term in self.rule.by_week_day() {
            match term {
                WeekdayTerm::Every(weekday) => {
                    let Some(mut date) = on_or_after(first, weekday) else {
                        continue;
                    };
                    while date <= last {
                        set.insert(date.to_datetime(time));
                        let Ok(next) = date.checked_add(7.days()) else {
                            break;
                        };
                        date = next;
                    }
                }
                WeekdayTerm::Nth { nth, weekday } => {
                    let target = if nth > 0 {
                        on_or_after(first, weekday).and_then(|date| {
                            date.checked_add(
                                (7 * (i32::from(nth) - 1)).days(),
                            )
                            .ok()
                        })
                    } else {
                        on_or_before(last, weekday).and_then(|date| {
                            date.checked_sub(
                                (7 * (i32::from(-nth) - 1)).days(),
                            )
                            .ok()
                        })
                    };
                    if let Some(date) = target {
                        if date.year() == self.cursor.year() {
                            set.insert(date.to_datetime(time));
                        }
                    }
                }
            }
        }
    }

    /// `BYYEARDAY` expansion, negatives counted from the end of the
    /// cursor's year.
    fn expand_year_days(&self, set: &mut PeriodSet) {
        let days_in_year = self.cursor.days_in_year();
        for &d in self.rule.by_year_day() {
            let day = if d < 0 { days_in_year + d + 1 } else { d };
            if !(1..=days_in_year).contains(&day) {
                continue;
            }
            if let Ok(dt) = self.cursor.with().day_of_year(day).build() {
                set.insert(dt);
            }
        }
    }

    /// `BYWEEKNO` expansion: week one is the week containing January
    /// 4 (per the rule's week start); each selected week contributes
    /// the days that fall in the cursor's year and match `BYDAY` (all
    /// seven when `BYDAY` is empty). Week numbers beyond the year's
    /// week count select nothing, which is also how negative numbers
    /// resolve.
    fn expand_week_numbers(&self, set: &mut PeriodSet) {
        let r = &*self.rule.inner;
        let wkst = self.rule.week_start();
        let year = self.cursor.year();
        let weeks_in_year = week::weeks_in_year(wkst, year);
        let Ok(anchor) = week::week_one_start(wkst, year) else { return };
        for &w in r.by_week.iter() {
            let n = if w < 0 { weeks_in_year + w + 1 } else { w };
            if !(1..=weeks_in_year).contains(&n) {
                continue;
            }
            let Ok(week_start) =
                anchor.checked_add((7 * (i32::from(n) - 1)).days())
            else {
                continue;
            };
            for offset in 0..7 {
                let Ok(date) =
                    week_start.checked_add((offset as i32).days())
                else {
                    continue;
                };
                if date.year() != year {
                    continue;
                }
                let selected = r.by_week_day.is_empty()
                    || r
                        .by_week_day
                        .iter()
                        .any(|term| term.weekday() == date.weekday());
                if !selected {
                    continue;
                }
                if let Ok(dt) = self.cursor.with().date(date).build() {
                    set.insert(dt);
                }
            }
        }
    }

    fn expand_hours(&self, set: &mut PeriodSet) {
        let by_hour = &self.rule.inner.by_hour;
        if by_hour.is_empty() || self.date_only() {
            return;
        }
        set.expand(|dt| {
            by_hour
                .iter()
                .filter_map(move |&h| dt.with().hour(h).build().ok())
        });
    }

    fn expand_minutes(&self, set: &mut PeriodSet) {
        let by_minute = &self.rule.inner.by_minute;
        if by_minute.is_empty() || self.date_only() {
            return;
        }
        set.expand(|dt| {
            by_minute
                .iter()
                .filter_map(move |&m| dt.with().minute(m).build().ok())
        });
    }

    fn expand_seconds(&self, set: &mut PeriodSet) {
        let by_second = &self.rule.inner.by_second;
        if by_second.is_empty() || self.date_only() {
            return;
        }
        set.expand(|dt| {
            by_second
                .iter()
                .filter_map(move |&s| dt.with().second(s).build().ok())
        });
    }

    fn limit_by_month(&self, set: &mut PeriodSet) {
        if self.rule.by_month().is_empty() {
            return;
        }
        set.retain(|dt| self.satisfies_by_month(*dt));
    }

    fn limit_by_month_day(&self, set: &mut PeriodSet) {
        if self.rule.by_month_day().is_empty() {
            return;
        }
        set.retain(|dt| self.satisfies_by_month_day(*dt));
    }

    fn satisfies_by_month(&self, dt: DateTime) -> bool {
        let by_month = &self.rule.inner.by_month;
        by_month.is_empty() || by_month.contains(&dt.month())
    }

    fn satisfies_by_month_day(&self, dt: DateTime) -> bool {
        let by_month_day = &self.rule.inner.by_month_day;
        by_month_day.is_empty()
            || month_day_selected(by_month_day, dt.day(), dt.days_in_month())
    }

    /// The bare-weekday filter used at DAILY and finer frequencies.
    /// Ordinal terms are meaningless there and do not participate;
    /// when only ordinal terms are present, nothing is constrained.
    fn satisfies_bare_week_day(&self, dt: DateTime) -> bool {
        let mut any_bare = false;
        for term in self.rule.by_week_day() {
            if let WeekdayTerm::Every(weekday) = *term {
                any_bare = true;
                if weekday == dt.weekday() {
                    return true;
                }
            }
        }
        !any_bare
    }

    fn satisfies_by_hour(&self, dt: DateTime) -> bool {
        let by_hour = &self.rule.inner.by_hour;
        by_hour.is_empty() || by_hour.contains(&dt.hour())
    }

    fn satisfies_by_minute(&self, dt: DateTime) -> bool {
        let by_minute = &self.rule.inner.by_minute;
        by_minute.is_empty() || by_minute.contains(&dt.minute())
    }

    fn satisfies_by_second(&self, dt: DateTime) -> bool {
        let by_second = &self.rule.inner.by_second;
        by_second.is_empty() || by_second.contains(&dt.second())
    }

    /// Whether the 0-indexed `position` in an ordered set of `len`
    /// candidates is selected by `BYSETPOS` (1-indexed from the front
    /// for positive values, from the back for negative ones).
    fn satisfies_set_pos(&self, position: usize, len: usize) -> bool {
        let by_set_pos = &self.rule.inner.by_set_pos;
        let (Ok(position), Ok(len)) =
            (i32::try_from(position), i32::try_from(len))
        else {
            return false;
        };
        let positive = position + 1;
        let negative = positive - 1 - len;
        by_set_pos.contains(&positive) || by_set_pos.contains(&negative)
    }
}

/// The days of one month selected by the given `BYDAY` terms: every
/// day in a bare term's weekday bucket, plus the nth element (from
/// either end) of a numbered term's bucket.
fn week_day_days_in_month(first: Date, terms: &[WeekdayTerm]) -> Vec<i8> {
    let mut buckets: [Vec<i8>; 7] = Default::default();
    let mut weekday = first.weekday();
    for day in 1..=first.days_in_month() {
        buckets[weekday.to_monday_zero_offset() as usize].push(day);
        weekday = weekday.wrapping_add(1);
    }
    let mut days = vec![];
    for term in terms {
        let bucket =
            &buckets[term.weekday().to_monday_zero_offset() as usize];
        match term.nth() {
            None => days.extend_from_slice(bucket),
            Some(nth) => {
                let index = if nth > 0 {
                    (nth - 1) as isize
                } else {
                    bucket.len() as isize + nth as isize
                };
                if (0..bucket.len() as isize).contains(&index) {
                    days.push(bucket[index as usize]);
                }
            }
        }
    }
    days
}

/// Whether `day` (1-indexed, in a month of `days_in_month` days) is
/// named by the given `BYMONTHDAY` values, counting negatives from
/// the end of the month.
fn month_day_selected(by_month_day: &[i8], day: i8, days_in_month: i8) -> bool {
    let negative = day - 1 - days_in_month;
    by_month_day.contains(&day) || by_month_day.contains(&negative)
}

/// The first date with the given weekday on or after `date`.
fn on_or_after(date: Date, weekday: jiff::civil::Weekday) -> Option<Date> {
    if date.weekday() == weekday {
        Some(date)
    } else {
        date.nth_weekday(1, weekday).ok()
    }
}

/// The last date with the given weekday on or before `date`.
fn on_or_before(date: Date, weekday: jiff::civil::Weekday) -> Option<Date> {
    if date.weekday() == weekday {
        Some(date)
    } else {
        date.nth_weekday(-1, weekday).ok()
    }
}
