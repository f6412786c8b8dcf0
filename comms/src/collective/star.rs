use std::{io, time::Duration};

use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::{self, Handle, Runtime},
    time,
};

use super::{Collective, CollectiveErr, Result};
use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
};

/// Upper bound for delivering an abort or disconnect notice to a peer.
const NOTICE_GRACE: Duration = Duration::from_secs(1);

struct Peer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

enum Role<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Holds one link per follower, sorted by rank.
    Leader(Vec<Peer<R, W>>),
    Follower(OnoReceiver<R>, OnoSender<W>),
}

/// All-reduce over a star topology.
///
/// Followers send their contribution to the leader (rank 0), which adds them up
/// in rank order, divides by the world size and sends the same mean back to
/// everyone. Each reduction carries a sequence number so a member that skipped
/// or repeated a call is detected instead of silently mixing values.
pub struct StarCollective<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    seq: u64,
    timeout: Duration,
    runtime: Runtime,
    role: Role<R, W>,
}

impl<R, W> StarCollective<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates the leader end of the group.
    ///
    /// # Arguments
    /// * `followers` - One channel per follower, the i-th one belongs to rank `i + 1`.
    /// * `timeout` - How long to wait for any single message before giving up.
    ///
    /// # Returns
    /// A new `StarCollective` with rank 0.
    pub fn leader(
        followers: Vec<(OnoReceiver<R>, OnoSender<W>)>,
        timeout: Duration,
    ) -> io::Result<Self> {
        Ok(Self::leader_on(new_runtime()?, followers, timeout))
    }

    /// Creates a follower end of the group.
    ///
    /// # Arguments
    /// * `rank` - This member's rank, in `1..world_size`.
    /// * `world_size` - The amount of members in the group.
    /// * `rx`, `tx` - The channel to the leader.
    /// * `timeout` - How long to wait for the leader's answer before giving up.
    ///
    /// # Returns
    /// A new `StarCollective`.
    pub fn follower(
        rank: usize,
        world_size: usize,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
        timeout: Duration,
    ) -> io::Result<Self> {
        Ok(Self::follower_on(
            new_runtime()?,
            rank,
            world_size,
            rx,
            tx,
            timeout,
        ))
    }

    pub(super) fn leader_on(
        runtime: Runtime,
        followers: Vec<(OnoReceiver<R>, OnoSender<W>)>,
        timeout: Duration,
    ) -> Self {
        let peers = followers
            .into_iter()
            .enumerate()
            .map(|(i, (rx, tx))| Peer { rank: i + 1, rx, tx })
            .collect::<Vec<_>>();

        Self {
            rank: 0,
            world_size: peers.len() + 1,
            seq: 0,
            timeout,
            runtime,
            role: Role::Leader(peers),
        }
    }

    pub(super) fn follower_on(
        runtime: Runtime,
        rank: usize,
        world_size: usize,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
        timeout: Duration,
    ) -> Self {
        Self {
            rank,
            world_size,
            seq: 0,
            timeout,
            runtime,
            role: Role::Follower(rx, tx),
        }
    }
}

impl<R, W> Collective for StarCollective<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()> {
        let seq = self.seq;
        self.seq += 1;

        let Self {
            world_size,
            timeout,
            runtime,
            role,
            ..
        } = self;

        match role {
            Role::Leader(peers) => {
                runtime.block_on(lead(peers, seq, values, *world_size, *timeout))
            }
            Role::Follower(rx, tx) => runtime.block_on(follow(rx, tx, seq, values, *timeout)),
        }
    }
}

impl<R, W> Drop for StarCollective<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Tells the rest of the group this member is leaving, so a peer still waiting on it
    /// fails with `PeerLeft` right away.
    fn drop(&mut self) {
        // block_on panics inside another runtime, the closed link reports the departure then.
        if Handle::try_current().is_ok() {
            return;
        }

        debug!(rank = self.rank; "leaving the group");

        let Self { runtime, role, .. } = self;
        let msg = Msg::Control(Command::Disconnect);

        runtime.block_on(async {
            match role {
                Role::Leader(peers) => {
                    for peer in peers.iter_mut() {
                        let _ = time::timeout(NOTICE_GRACE, peer.tx.send(&msg)).await;
                    }
                }
                Role::Follower(_, tx) => {
                    let _ = time::timeout(NOTICE_GRACE, tx.send(&msg)).await;
                }
            }
        });
    }
}

pub(super) fn new_runtime() -> io::Result<Runtime> {
    runtime::Builder::new_current_thread().enable_all().build()
}

async fn lead<R, W>(
    peers: &mut [Peer<R, W>],
    seq: u64,
    values: &mut [f32],
    world_size: usize,
    timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut sums: Vec<f64> = values.iter().map(|&v| v as f64).collect();

    if let Err(e) = gather(peers, seq, &mut sums, timeout).await {
        abort(peers, &e).await;
        return Err(e);
    }

    for (v, s) in values.iter_mut().zip(sums) {
        *v = (s / world_size as f64) as f32;
    }

    let msg = Msg::Reduce {
        seq,
        values: values.to_vec(),
    };

    for peer in peers.iter_mut() {
        peer.tx
            .send(&msg)
            .await
            .map_err(|e| peer_io_err(peer.rank, e))?;
    }

    debug!(seq = seq; "reduced {} value(s) across {world_size} worker(s)", values.len());
    Ok(())
}

/// Adds every follower's contribution into `sums`, in rank order.
async fn gather<R, W>(
    peers: &mut [Peer<R, W>],
    seq: u64,
    sums: &mut [f64],
    timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for peer in peers.iter_mut() {
        let values = match recv_within(&mut peer.rx, peer.rank, seq, timeout).await? {
            Msg::Reduce {
                seq: got_seq,
                values,
            } => {
                if got_seq != seq {
                    return Err(CollectiveErr::Desync {
                        rank: peer.rank,
                        expected_seq: seq,
                        got_seq,
                    });
                }

                values
            }
            Msg::Control(Command::Disconnect) => {
                return Err(CollectiveErr::PeerLeft { rank: peer.rank });
            }
            other => {
                return Err(CollectiveErr::UnexpectedMessage {
                    rank: peer.rank,
                    got: other.kind(),
                });
            }
        };

        if values.len() != sums.len() {
            return Err(CollectiveErr::LengthMismatch {
                rank: peer.rank,
                seq,
                got: values.len(),
                expected: sums.len(),
            });
        }

        for (s, v) in sums.iter_mut().zip(values) {
            *s += v as f64;
        }
    }

    Ok(())
}

/// Best effort notice to every follower so they fail fast instead of timing out.
async fn abort<R, W>(peers: &mut [Peer<R, W>], err: &CollectiveErr)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    warn!("aborting collective: {err}");
    let msg = Msg::Err(err.to_string());

    for peer in peers.iter_mut() {
        let _ = time::timeout(NOTICE_GRACE, peer.tx.send(&msg)).await;
    }
}

async fn follow<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    seq: u64,
    values: &mut [f32],
    timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let msg = Msg::Reduce {
        seq,
        values: values.to_vec(),
    };

    tx.send(&msg).await.map_err(|e| peer_io_err(0, e))?;

    match recv_within(rx, 0, seq, timeout).await? {
        Msg::Reduce {
            seq: got_seq,
            values: mean,
        } => {
            if got_seq != seq {
                return Err(CollectiveErr::Desync {
                    rank: 0,
                    expected_seq: seq,
                    got_seq,
                });
            }

            if mean.len() != values.len() {
                return Err(CollectiveErr::LengthMismatch {
                    rank: 0,
                    seq,
                    got: mean.len(),
                    expected: values.len(),
                });
            }

            values.copy_from_slice(&mean);
            Ok(())
        }
        Msg::Err(reason) => Err(CollectiveErr::Aborted(reason)),
        Msg::Control(Command::Disconnect) => Err(CollectiveErr::PeerLeft { rank: 0 }),
        other => Err(CollectiveErr::UnexpectedMessage {
            rank: 0,
            got: other.kind(),
        }),
    }
}

async fn recv_within<R>(
    rx: &mut OnoReceiver<R>,
    rank: usize,
    seq: u64,
    timeout: Duration,
) -> Result<Msg>
where
    R: AsyncRead + Unpin,
{
    match time::timeout(timeout, rx.recv::<Msg>()).await {
        Ok(Ok(msg)) => Ok(msg),
        Ok(Err(e)) => Err(peer_io_err(rank, e)),
        Err(_) => Err(CollectiveErr::Timeout {
            rank,
            seq,
            waited: timeout,
        }),
    }
}

fn peer_io_err(rank: usize, e: io::Error) -> CollectiveErr {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            CollectiveErr::PeerLeft { rank }
        }
        _ => CollectiveErr::Io(e),
    }
}
