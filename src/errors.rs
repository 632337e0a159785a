use thiserror::Error;

/// Failures raised while parsing or serialising wire-format DNS data.
///
/// The query engine converts these to an RCODE at its boundary: anything
/// `Malformed` becomes FORMERR, `NoSpace` outside of truncation handling
/// becomes SERVFAIL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// Bad wire bytes: oversized labels, runaway pointers, truncated
    /// fields, misplaced meta records.
    #[error("malformed wire data: {0}")]
    Malformed(&'static str),

    /// A constructed domain name would exceed 255 octets.
    #[error("domain name too long")]
    TooLong,

    /// The output buffer cannot hold the next record.
    #[error("no space left in packet")]
    NoSpace,

    /// A packet section transition went backwards.
    #[error("packet section may only advance")]
    SectionOrder,
}

/// Failures raised by the zone database: loading, updating, publishing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ZoneError {
    /// A changeset's SOA serial does not advance the zone serial
    /// (RFC 1982 sequence-space comparison).
    #[error("serial not advancing: {current} -> {next}")]
    SerialNotAdvancing { current: u32, next: u32 },

    /// The changeset would leave the zone in an illegal state, e.g.
    /// removing the apex SOA without a replacement.
    #[error("constraint violation: {0}")]
    ConstraintViolation(&'static str),

    /// A record's owner is not at or below the zone apex.
    #[error("record owner out of zone")]
    OutOfZone,

    /// Two nodes with the same owner name.
    #[error("duplicate owner name in zone tree")]
    DuplicateNode,

    /// An internal postcondition broke; the zone is quarantined and
    /// queries answer SERVFAIL until the writer repairs it.
    #[error("zone invariant violated: {0}")]
    InvariantViolation(&'static str),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}
