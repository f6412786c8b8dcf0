use std::{error::Error, fmt, io, time::Duration};

/// The collective module's result type.
pub type Result<T> = std::result::Result<T, CollectiveErr>;

/// Failures of a collective reduction. All of them mean the group lost
/// lockstep and the job can't safely continue.
#[derive(Debug)]
pub enum CollectiveErr {
    Io(io::Error),
    Timeout {
        rank: usize,
        seq: u64,
        waited: Duration,
    },
    Desync {
        rank: usize,
        expected_seq: u64,
        got_seq: u64,
    },
    LengthMismatch {
        rank: usize,
        seq: u64,
        got: usize,
        expected: usize,
    },
    UnexpectedMessage {
        rank: usize,
        got: &'static str,
    },
    PeerLeft {
        rank: usize,
    },
    Aborted(String),
    Handshake(String),
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::Io(e) => write!(f, "collective io error: {e}"),
            CollectiveErr::Timeout { rank, seq, waited } => write!(
                f,
                "collective mismatch: rank {rank} did not take part in reduction {seq} within {waited:?}"
            ),
            CollectiveErr::Desync {
                rank,
                expected_seq,
                got_seq,
            } => write!(
                f,
                "collective mismatch: rank {rank} sent reduction {got_seq}, expected {expected_seq}"
            ),
            CollectiveErr::LengthMismatch {
                rank,
                seq,
                got,
                expected,
            } => write!(
                f,
                "collective mismatch: rank {rank} sent {got} values for reduction {seq}, expected {expected}"
            ),
            CollectiveErr::UnexpectedMessage { rank, got } => {
                write!(f, "collective mismatch: unexpected {got} message from rank {rank}")
            }
            CollectiveErr::PeerLeft { rank } => {
                write!(f, "collective mismatch: rank {rank} left the group")
            }
            CollectiveErr::Aborted(reason) => {
                write!(f, "collective aborted by the leader: {reason}")
            }
            CollectiveErr::Handshake(reason) => write!(f, "collective rendezvous failed: {reason}"),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectiveErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
