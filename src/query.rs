// The materialisation helpers around the occurrence iterator. Each
// query drives a fresh generator and layers its own boundary
// predicate on top; all boundary comparisons use the `Moment` total
// order.

use crate::{error::Error, moment::Moment, rule::Rule};

impl Rule {
    /// Collects occurrences until the sequence is exhausted or `limit`
    /// items have been gathered.
    ///
    /// With no limit, an unbounded rule eventually fails with
    /// `MaxIterationsExceeded`; pass a limit (or bound the rule with
    /// `count` or `until`) to avoid that.
    pub fn all(&self, limit: Option<usize>) -> Result<Vec<Moment>, Error> {
        let mut out = vec![];
        for item in self.occurrences() {
            out.push(item?);
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }

    /// Collects the occurrences between `after` and `before`. When
    /// `inclusive` is true the bounds themselves are eligible;
    /// otherwise both are excluded.
    pub fn between(
        &self,
        after: &Moment,
        before: &Moment,
        inclusive: bool,
    ) -> Result<Vec<Moment>, Error> {
        let mut out = vec![];
        for item in self.occurrences_from(after) {
            let moment = item?;
            let past_start =
                if inclusive { moment >= *after } else { moment > *after };
            if !past_start {
                continue;
            }
            let in_bounds =
                if inclusive { moment <= *before } else { moment < *before };
            if !in_bounds {
                break;
            }
            out.push(moment);
        }
        Ok(out)
    }

    /// Collects occurrences from the start of the sequence while they
    /// are before `t` (at or before, when `inclusive`), stopping at
    /// the first that is not, or once `limit` items are gathered.
    pub fn before(
        &self,
        t: &Moment,
        inclusive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Moment>, Error> {
        let mut out = vec![];
        for item in self.occurrences() {
            let moment = item?;
            let within =
                if inclusive { moment <= *t } else { moment < *t };
            if !within {
                break;
            }
            out.push(moment);
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }

    /// Collects up to `limit` occurrences after `t` (at or after,
    /// when `inclusive`). Skipping to `t` uses the generator's seek
    /// support, so this is efficient even far from the rule's start.
    pub fn after(
        &self,
        t: &Moment,
        inclusive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Moment>, Error> {
        let mut out = vec![];
        for item in self.occurrences_from(t) {
            let moment = item?;
            let within = if inclusive { moment >= *t } else { moment > *t };
            if !within {
                continue;
            }
            out.push(moment);
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }

    /// The first occurrence after `t` (at or after, when `inclusive`),
    /// if any.
    pub fn next(
        &self,
        t: &Moment,
        inclusive: bool,
    ) -> Result<Option<Moment>, Error> {
        Ok(self.after(t, inclusive, Some(1))?.into_iter().next())
    }

    /// The last occurrence before `t` (at or before, when
    /// `inclusive`), if any.
    ///
    /// This scans forward from the rule's start, so on a rule with
    /// neither `count` nor `until` it relies on the sequence crossing
    /// `t` (or on the iteration cap) to terminate.
    pub fn previous(
        &self,
        t: &Moment,
        inclusive: bool,
    ) -> Result<Option<Moment>, Error> {
        let mut last = None;
        for item in self.occurrences() {
            let moment = item?;
            let within = if inclusive { moment <= *t } else { moment < *t };
            if !within {
                break;
            }
            last = Some(moment);
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use crate::rule::Strictness;

    use super::*;

    fn rule(text: &str) -> Rule {
        Rule::parse(text, Strictness::Strict).unwrap()
    }

    fn moment(s: &str) -> Moment {
        s.parse().unwrap()
    }

    fn days(moments: &[Moment]) -> Vec<String> {
        moments.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn all_returns_the_whole_bounded_sequence() {
        let r = rule(
            "DTSTART:19970902T090000\n\
             RRULE:FREQ=WEEKLY;INTERVAL=2;WKST=SU;COUNT=4;BYDAY=TU,TH",
        );
        assert_eq!(
            days(&r.all(None).unwrap()),
            [
                "1997-09-02T09:00:00",
                "1997-09-04T09:00:00",
                "1997-09-16T09:00:00",
                "1997-09-18T09:00:00",
            ],
        );
    }

    #[test]
    fn all_limit_bounds_unbounded_rules() {
        // Friday the 13th, forever; the limit keeps it finite.
        let r = rule(
            "DTSTART:19970902T090000\n\
             RRULE:FREQ=MONTHLY;BYDAY=FR;BYMONTHDAY=13",
        );
        assert_eq!(
            days(&r.all(Some(5)).unwrap()),
            [
                "1998-02-13T09:00:00",
                "1998-03-13T09:00:00",
                "1998-11-13T09:00:00",
                "1999-08-13T09:00:00",
                "2000-10-13T09:00:00",
            ],
        );
    }

    #[test]
    fn all_without_limit_hits_the_safety_bound() {
        let r = rule("DTSTART:19970902T090000\nRRULE:FREQ=DAILY");
        assert_eq!(
            r.all(None).unwrap_err(),
            Error::MaxIterationsExceeded { limit: 10_000 },
        );
    }

    #[test]
    fn second_to_last_monday_of_the_month() {
        let r = rule(
            "DTSTART:19970922T090000\nRRULE:FREQ=MONTHLY;COUNT=6;BYDAY=-2MO",
        );
        assert_eq!(
            days(&r.all(None).unwrap()),
            [
                "1997-09-22T09:00:00",
                "1997-10-20T09:00:00",
                "1997-11-17T09:00:00",
                "1997-12-22T09:00:00",
                "1998-01-19T09:00:00",
                "1998-02-16T09:00:00",
            ],
        );
    }

    #[test]
    fn between_boundary_policy() {
        let r = rule("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=10");
        let a = moment("1997-09-04T09:00:00");
        let b = moment("1997-09-07T09:00:00");
        assert_eq!(
            days(&r.between(&a, &b, true).unwrap()),
            [
                "1997-09-04T09:00:00",
                "1997-09-05T09:00:00",
                "1997-09-06T09:00:00",
                "1997-09-07T09:00:00",
            ],
        );
        assert_eq!(
            days(&r.between(&a, &b, false).unwrap()),
            ["1997-09-05T09:00:00", "1997-09-06T09:00:00"],
        );
    }

    #[test]
    fn between_far_from_the_start_seeks() {
        let r = rule(
            "DTSTART:19970902T090000\n\
             RRULE:FREQ=MONTHLY;UNTIL=20051231T090000;BYDAY=FR;BYMONTHDAY=13",
        );
        assert_eq!(
            days(
                &r.between(
                    &moment("1999-01-01T00:00:00"),
                    &moment("2001-01-01T00:00:00"),
                    true,
                )
                .unwrap(),
            ),
            ["1999-08-13T09:00:00", "2000-10-13T09:00:00"],
        );
    }

    #[test]
    fn before_collects_the_prefix() {
        let r = rule("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=10");
        let t = moment("1997-09-04T09:00:00");
        assert_eq!(
            days(&r.before(&t, false, None).unwrap()),
            ["1997-09-02T09:00:00", "1997-09-03T09:00:00"],
        );
        assert_eq!(
            days(&r.before(&t, true, None).unwrap()),
            [
                "1997-09-02T09:00:00",
                "1997-09-03T09:00:00",
                "1997-09-04T09:00:00",
            ],
        );
        assert_eq!(
            days(&r.before(&t, true, Some(1)).unwrap()),
            ["1997-09-02T09:00:00"],
        );
    }

    #[test]
    fn after_collects_the_suffix() {
        let r = rule("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=10");
        let t = moment("1997-09-04T09:00:00");
        assert_eq!(
            days(&r.after(&t, false, Some(3)).unwrap()),
            [
                "1997-09-05T09:00:00",
                "1997-09-06T09:00:00",
                "1997-09-07T09:00:00",
            ],
        );
        assert_eq!(
            days(&r.after(&t, true, Some(3)).unwrap()),
            [
                "1997-09-04T09:00:00",
                "1997-09-05T09:00:00",
                "1997-09-06T09:00:00",
            ],
        );
    }

    #[test]
    fn next_and_previous() {
        let r = rule("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=10");

        // Between two occurrences.
        let t = moment("1997-09-08T12:00:00");
        assert_eq!(
            r.next(&t, false).unwrap(),
            Some(moment("1997-09-09T09:00:00")),
        );
        assert_eq!(
            r.previous(&t, false).unwrap(),
            Some(moment("1997-09-08T09:00:00")),
        );

        // Exactly on an occurrence, the inclusive flag decides.
        let on = moment("1997-09-08T09:00:00");
        assert_eq!(
            r.next(&on, false).unwrap(),
            Some(moment("1997-09-09T09:00:00")),
        );
        assert_eq!(r.next(&on, true).unwrap(), Some(on.clone()));
        assert_eq!(
            r.previous(&on, false).unwrap(),
            Some(moment("1997-09-07T09:00:00")),
        );
        assert_eq!(r.previous(&on, true).unwrap(), Some(on));

        // Past the end of the sequence.
        let late = moment("1998-01-01T00:00:00");
        assert_eq!(r.next(&late, false).unwrap(), None);
        assert_eq!(
            r.previous(&late, false).unwrap(),
            Some(moment("1997-09-11T09:00:00")),
        );

        // Before the start there is nothing previous.
        let start = moment("1997-09-02T09:00:00");
        assert_eq!(r.previous(&start, false).unwrap(), None);
        assert_eq!(r.next(&start, true).unwrap(), Some(start));
    }

    #[test]
    fn queries_need_a_starting_point() {
        let r = rule("RRULE:FREQ=DAILY;COUNT=3");
        assert_eq!(r.all(None).unwrap_err(), Error::MissingDtstart);
        let t = moment("1997-09-02T09:00:00");
        assert_eq!(r.next(&t, false).unwrap_err(), Error::MissingDtstart);
    }

    #[test]
    fn queries_are_independent() {
        // Driving one query never perturbs another; the rule is
        // immutable and each query builds its own generator.
        let r = rule("DTSTART:19970902T090000\nRRULE:FREQ=DAILY;COUNT=5");
        let first = r.all(None).unwrap();
        let t = moment("1997-09-03T12:00:00");
        let _ = r.next(&t, false).unwrap();
        let second = r.all(None).unwrap();
        assert_eq!(first, second);
    }
}
