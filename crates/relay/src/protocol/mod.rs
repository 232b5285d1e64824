//! Protocol types shared by the relay, the interceptor and hosts.
//!
//! - [`RequestHeader`]: the parsed request head an interceptor inspects and rewrites
//! - [`Event`] and friends: what a host feeds into [`crate::relay::Relay::dispatch`]
//! - error types for every concern of the crate

mod request;
pub use request::RequestHeader;

mod event;
pub use event::ConnId;
pub use event::Direction;
pub use event::Event;
pub use event::OpId;
pub use event::ReadEvent;
pub use event::SessionStatus;
pub use event::WriteEvent;

mod error;
pub use error::ConfigError;
pub use error::DiskError;
pub use error::InterceptError;
pub use error::ParseError;
pub use error::RelayError;
