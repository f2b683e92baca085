pub mod feed;

pub use feed::{backoff_delay, ConnectionState, FeedSender, FeedTransport};
