use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{FsError, Result};

/// seconds and fraction of a second in nanoseconds since [UNIX_EPOCH],
/// the resolution inode times are kept in
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// seconds
    pub sec: u64,
    /// fraction of a second in nanoseconds
    pub nsec: u32,
}

impl Timestamp {
    pub const fn new(sec: u64, nsec: u32) -> Self {
        Timestamp { sec, nsec }
    }

    /// what time is it since `1970-1-1 00:00:00`,
    /// a clock set before the epoch reads as the epoch
    pub fn now() -> Self {
        Timestamp::try_from(SystemTime::now()).unwrap_or_default()
    }
}

impl From<Timestamp> for SystemTime {
    fn from(value: Timestamp) -> Self {
        UNIX_EPOCH + Duration::new(value.sec, value.nsec)
    }
}

impl TryFrom<SystemTime> for Timestamp {
    type Error = FsError;
    fn try_from(value: SystemTime) -> Result<Self> {
        match value.duration_since(UNIX_EPOCH) {
            Ok(duration) => Ok(Timestamp {
                sec: duration.as_secs(),
                nsec: duration.subsec_nanos(),
            }),
            Err(before_epoch_error) => Err(FsError::InvalidArgument(format!(
                "doesn't support time before UNIX_EPOCH: {before_epoch_error}"
            ))),
        }
    }
}
