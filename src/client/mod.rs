//! Client side of the live channel: reconnecting event subscription plus
//! the polling fallback used by `gradeflow-watch`.

pub(crate) mod backoff;
pub(crate) mod channel;
pub(crate) mod poller;
pub(crate) mod transport;
pub(crate) mod watch;
