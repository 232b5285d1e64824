use std::fmt::{Display, Formatter};

/// Where a session keeps the request until the origin is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the host to hand over the client connection.
    Accepting,
    /// Dropping the host-generated request head from the client stream.
    HeaderReplace,
    BodyForward(BufferMode),
    Connected,
    /// One half (or an abort) has finished; waiting for the rest.
    Finishing,
    Closed,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Accepting => f.write_str("accepting"),
            Phase::HeaderReplace => f.write_str("header-replace"),
            Phase::BodyForward(BufferMode::Memory) => f.write_str("body-forward(memory)"),
            Phase::BodyForward(BufferMode::Disk) => f.write_str("body-forward(disk)"),
            Phase::Connected => f.write_str("connected"),
            Phase::Finishing => f.write_str("finishing"),
            Phase::Closed => f.write_str("closed"),
        }
    }
}

/// Progress of discarding the host-generated head. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSkip {
    Unknown,
    Skipping(usize),
    Done,
}

impl HeaderSkip {
    /// Consumes up to the remaining count from `available` bytes and returns how many
    /// bytes were skipped. `Unknown` must have been resolved with [`HeaderSkip::start`].
    pub fn consume(&mut self, available: usize) -> usize {
        match *self {
            HeaderSkip::Skipping(remaining) => {
                let skipped = remaining.min(available);
                *self = if remaining == skipped { HeaderSkip::Done } else { HeaderSkip::Skipping(remaining - skipped) };
                skipped
            }
            HeaderSkip::Unknown | HeaderSkip::Done => 0,
        }
    }

    pub fn start(&mut self, len: usize) {
        if *self == HeaderSkip::Unknown {
            *self = HeaderSkip::Skipping(len);
        }
    }

    pub fn is_done(&self) -> bool {
        *self == HeaderSkip::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_across_events() {
        let mut skip = HeaderSkip::Unknown;
        assert_eq!(skip.consume(10), 0);

        skip.start(25);
        assert_eq!(skip, HeaderSkip::Skipping(25));
        assert_eq!(skip.consume(10), 10);
        assert_eq!(skip, HeaderSkip::Skipping(15));
        assert_eq!(skip.consume(40), 15);
        assert!(skip.is_done());
        assert_eq!(skip.consume(40), 0);

        skip.start(7);
        assert!(skip.is_done());
    }

    #[test]
    fn zero_length_head() {
        let mut skip = HeaderSkip::Unknown;
        skip.start(0);
        assert_eq!(skip.consume(0), 0);
        assert!(skip.is_done());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::BodyForward(BufferMode::Disk).to_string(), "body-forward(disk)");
        assert_eq!(Phase::Closed.to_string(), "closed");
    }
}
