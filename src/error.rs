/// The error type for everything that can go wrong in this crate.
///
/// Variants are grouped by the boundary at which they are first
/// observable: parsing, rule construction or iteration. Errors are
/// raised synchronously at that boundary; there are no retries and no
/// partial results.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A lexical failure while parsing `DTSTART` or `RRULE` text.
    ///
    /// This is only raised by the strict parser. The lenient parser
    /// drops the offending token and logs a warning instead.
    #[error("{0}")]
    MalformedText(String),

    /// A violation of a rule's cross-field invariants: `COUNT` and
    /// `UNTIL` both set, `UNTIL` before the starting point, or
    /// `BYSETPOS` without another `BY*` selector. These are fatal in
    /// both strict and lenient modes.
    #[error("{0}")]
    InvalidRule(String),

    /// A malformed date or time literal, or a field mutation that the
    /// target variant cannot represent (like setting an hour on a
    /// date).
    #[error("{0}")]
    InvalidMoment(String),

    /// A generator or query was driven on a rule without a starting
    /// point.
    #[error("recurrence rule has no starting point (a `dtstart` is required for iteration)")]
    MissingDtstart,

    /// The iteration safety bound was hit before the sequence finished.
    ///
    /// This happens when a rule has no `count` or `until` and the
    /// caller keeps pulling occurrences past the configured maximum
    /// number of periods.
    #[error("recurrence rule iteration gave up after {limit} periods (no `count` or `until` bounds the walk)")]
    MaxIterationsExceeded {
        /// The configured maximum number of periods.
        limit: usize,
    },

    /// A rule field value outside its declared range, rejected by
    /// strict construction or strict parsing.
    #[error("{0}")]
    Unsupported(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Error {
        Error::MalformedText(msg.into())
    }

    pub(crate) fn invalid_rule(msg: impl Into<String>) -> Error {
        Error::InvalidRule(msg.into())
    }

    pub(crate) fn invalid_moment(msg: impl Into<String>) -> Error {
        Error::InvalidMoment(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Error {
        Error::Unsupported(msg.into())
    }
}
