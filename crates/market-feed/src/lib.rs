//! Market Feed
//!
//! Real-time feed connections with circuit-breaker supervision, a polling
//! fallback, the venue order-book stream, and periodic market discovery.

pub mod books;
pub mod breaker;
pub mod catalog;
pub mod connection;
pub mod supervisor;

pub use books::{BookFeed, TokenRegistry};
pub use breaker::{BreakerState, ConnectionBreaker, ConnectionHealth};
pub use catalog::{Discovery, MarketCatalog, RestDiscovery};
pub use connection::{FallbackPoll, Feed, PollingFeed, WsFeed};
pub use supervisor::ConnectionSupervisor;
