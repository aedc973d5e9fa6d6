/*!
An implementation of RFC 5545 recurrence rules (`RRULE`) on top of
[Jiff](https://docs.rs/jiff).

A [`Rule`] describes a repeating schedule: a frequency, a starting
point, and the `BY*` selectors, `WKST`, `COUNT` and `UNTIL` refinements
of the iCalendar recurrence grammar. Driving a rule produces the
ordered (and possibly unbounded) sequence of [`Moment`]s at which it
occurs, lazily, one period at a time.

Rules can be built programmatically:

```
use jiff::civil::Weekday;
use recur::{Frequency, Moment, Rule};

let start: Moment = "2025-01-06T09:00:00".parse()?;
let rule = Rule::builder()
    .freq(Frequency::Weekly)
    .dtstart(start)
    .by_week_day([Weekday::Monday, Weekday::Wednesday])
    .count(3)
    .build()?;
let moments = rule.all(None)?;
assert_eq!(moments.len(), 3);
assert_eq!(moments[0].to_string(), "2025-01-06T09:00:00");
assert_eq!(moments[1].to_string(), "2025-01-08T09:00:00");
# Ok::<(), recur::Error>(())
```

or parsed from (and serialised back to) the iCalendar wire format:

```
use recur::{Rule, Strictness};

let rule = Rule::parse(
    "DTSTART;TZID=America/New_York:20250106T090000\n\
     RRULE:FREQ=MONTHLY;COUNT=2;BYDAY=1MO",
    Strictness::Strict,
)?;
assert_eq!(
    rule.all(None)?[1].to_string(),
    "2025-02-03T09:00:00-05:00[America/New_York]",
);
assert_eq!(
    rule.to_string(),
    "DTSTART;TZID=America/New_York:20250106T090000\n\
     RRULE:FREQ=MONTHLY;COUNT=2;BYDAY=1MO",
);
# Ok::<(), recur::Error>(())
```

The starting point decides what the rule emits: a civil date rule
emits dates, a civil datetime rule emits datetimes, and a zoned rule
emits zoned datetimes with RFC 5545's daylight saving behavior (times
skipped by a transition are omitted, repeated times occur once per
reading).

Sequences with neither `COUNT` nor `UNTIL` are unbounded. Iteration is
protected by two safety bounds: a configurable cap on the number of
periods stepped through (surfaced as [`Error::MaxIterationsExceeded`]),
and an empty-period allowance that quietly exhausts rules which can
never produce anything (like a 31st day of April).
*/

mod error;
mod expand;
mod moment;
mod parse;
mod query;
mod rule;
mod week;

pub use jiff;

pub use crate::{
    error::Error,
    expand::Occurrences,
    moment::Moment,
    rule::{
        DEFAULT_MAX_ITERATIONS, Frequency, Rule, RuleBuilder, Strictness,
        WeekdayTerm,
    },
};
