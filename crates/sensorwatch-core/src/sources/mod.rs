//! Ingestion strategies implementing [`TelemetrySource`](crate::TelemetrySource).

pub mod pull;
pub mod push;

pub use pull::{DatasetLocation, PollOutcome, PullAdapter};
pub use push::{Backoff, ChannelFeed, Feed, FeedSubscription, LineFeed, PushAdapter};
