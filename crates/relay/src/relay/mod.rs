//! The upload relay state machine.
//!
//! A [`Relay`] is a sans-IO session object. The host hands it the client side of an
//! intercepted transaction and then feeds it [`crate::protocol::Event`]s one at a time
//! through [`Relay::dispatch`]. The relay answers by calling back into the [`Host`]:
//! reads, writes, the origin connect and disk requests.
//!
//! ```text
//! Accepting -> HeaderReplace -> BodyForward{Memory|Disk} -> Connected -> Finishing -> Closed
//! ```

mod buffer;
mod host;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod fake_host;

pub use buffer::IoBuffer;
pub use host::Host;
pub use session::Relay;
pub use state::BufferMode;
pub use state::HeaderSkip;
pub use state::Phase;
