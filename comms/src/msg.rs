use std::io;

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const SEQ_SIZE: usize = size_of::<u64>();
const VALUE_SIZE: usize = size_of::<f32>();

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// A follower announcing itself to the leader during the rendezvous.
    Join { rank: usize, world_size: usize },
    /// A member leaving the group, sent when its end is closed.
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Control(Command),
    /// One step of a collective reduction, tagged with its sequence number.
    Reduce { seq: u64, values: Vec<f32> },
    Err(String),
}

impl Msg {
    /// Returns a short name for this message kind, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Reduce { .. } => "data/reduce",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

impl Serialize for Msg {
    fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&(0 as Header).to_be_bytes());
                buf.extend_from_slice(e.as_bytes());
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&(1 as Header).to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
            }
            Msg::Reduce { seq, values } => {
                buf.extend_from_slice(&(2 as Header).to_be_bytes());
                buf.extend_from_slice(&seq.to_be_bytes());
                buf.extend_from_slice(bytemuck::cast_slice::<f32, u8>(values));
            }
        }
    }
}

impl Deserialize for Msg {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let kind = Header::from_be_bytes(bytemuck::pod_read_unaligned(kind_buf));

        match kind {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(string.to_string()))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2 => {
                if rest.len() < SEQ_SIZE {
                    return Self::buf_is_too_small(buf.len(), HEADER_SIZE + SEQ_SIZE);
                }

                let (seq_buf, nums) = rest.split_at(SEQ_SIZE);
                let seq = u64::from_be_bytes(bytemuck::pod_read_unaligned(seq_buf));

                if nums.len() % VALUE_SIZE != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("reduce payload of {} bytes is not a list of f32", nums.len()),
                    ));
                }

                let values = nums
                    .chunks_exact(VALUE_SIZE)
                    .map(bytemuck::pod_read_unaligned::<f32>)
                    .collect();

                Ok(Self::Reduce { seq, values })
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
