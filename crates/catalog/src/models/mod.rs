mod annotation;
mod item;

pub(crate) use self::annotation::AnnotationRow;
pub(crate) use self::item::ItemRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::OffsetDateTime;

/// Timestamps are stored as Unix nanoseconds so they survive a round trip
/// through the database unchanged.
pub(crate) fn timestamp_to_db(at: OffsetDateTime, field: &'static str) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn timestamp_from_db(nanos: i64, field: &'static str) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn count_to_db(value: usize, field: &'static str) -> Result<i64> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn count_from_db(value: i64, field: &'static str) -> Result<usize> {
    usize::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}
