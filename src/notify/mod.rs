pub mod matcher;
pub mod timeline;

#[cfg(test)]
pub(crate) mod simulate;

pub use matcher::{MatchOutcome, NotificationMatcher};
pub use timeline::{ExpectedNotification, FiringPeriod, TimelineGenerator, TimelineParams};
