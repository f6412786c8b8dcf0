use std::{io, net::SocketAddr, time::Duration};

use log::{info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{self, Instant},
};

use super::{CollectiveErr, Result, StarCollective, star::new_runtime};
use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// A `StarCollective` over TCP sockets.
pub type TcpCollective = StarCollective<OwnedReadHalf, OwnedWriteHalf>;

impl TcpCollective {
    /// Joins the group whose leader listens at `addr`.
    ///
    /// Rank 0 binds `addr` and waits for the other `world_size - 1` members,
    /// every other rank connects to it (retrying until `timeout` expires) and
    /// announces its rank.
    ///
    /// # Arguments
    /// * `addr` - The leader's address.
    /// * `rank` - This member's rank.
    /// * `world_size` - The amount of members in the group.
    /// * `timeout` - Bound for the rendezvous and for every later reduction.
    ///
    /// # Returns
    /// The connected group member.
    pub fn rendezvous(
        addr: SocketAddr,
        rank: usize,
        world_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(CollectiveErr::Handshake(format!(
                "rank {rank} is out of range for a world of size {world_size}"
            )));
        }

        let runtime = new_runtime()?;

        if rank == 0 {
            let followers = runtime.block_on(accept_followers(addr, world_size, timeout))?;
            Ok(Self::leader_on(runtime, followers, timeout))
        } else {
            let (rx, tx) = runtime.block_on(join_leader(addr, rank, world_size, timeout))?;
            Ok(Self::follower_on(runtime, rank, world_size, rx, tx, timeout))
        }
    }
}

async fn accept_followers(
    addr: SocketAddr,
    world_size: usize,
    timeout: Duration,
) -> Result<Vec<(NetRx, NetTx)>> {
    let listener = TcpListener::bind(addr).await?;
    info!("leader listening at {addr}, waiting for {} worker(s)", world_size - 1);

    let mut slots: Vec<Option<(NetRx, NetTx)>> = (1..world_size).map(|_| None).collect();
    let deadline = Instant::now() + timeout;

    while slots.iter().any(Option::is_none) {
        let (stream, peer) = time::timeout_at(deadline, listener.accept())
            .await
            .map_err(|_| {
                CollectiveErr::Handshake(format!(
                    "only {} of {} worker(s) joined within {timeout:?}",
                    slots.iter().filter(|s| s.is_some()).count() + 1,
                    world_size
                ))
            })??;

        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = crate::channel(rx, tx);

        let msg = time::timeout_at(deadline, rx.recv::<Msg>())
            .await
            .map_err(|_| CollectiveErr::Handshake(format!("{peer} never announced its rank")))??;

        let (rank, theirs) = match msg {
            Msg::Control(Command::Join {
                rank,
                world_size: theirs,
            }) => (rank, theirs),
            other => {
                warn!("ignoring {} from {peer} during rendezvous", other.kind());
                continue;
            }
        };

        if theirs != world_size {
            return Err(CollectiveErr::Handshake(format!(
                "rank {rank} at {peer} expects a world of size {theirs}, the leader expects {world_size}"
            )));
        }

        let Some(slot) = rank.checked_sub(1).and_then(|i| slots.get_mut(i)) else {
            return Err(CollectiveErr::Handshake(format!(
                "{peer} announced rank {rank}, out of range for a world of size {world_size}"
            )));
        };

        if slot.replace((rx, tx)).is_some() {
            return Err(CollectiveErr::Handshake(format!(
                "rank {rank} joined twice, last time from {peer}"
            )));
        }

        info!("rank {rank} joined from {peer}");
    }

    Ok(slots.into_iter().flatten().collect())
}

async fn join_leader(
    addr: SocketAddr,
    rank: usize,
    world_size: usize,
    timeout: Duration,
) -> Result<(NetRx, NetTx)> {
    let deadline = Instant::now() + timeout;

    let stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(e) if Instant::now() + RETRY_DELAY < deadline => {
                warn!("rank {rank} failed to reach the leader at {addr}: {e}. Retrying...");
                time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(reach_err(addr, e)),
        }
    };

    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = crate::channel(rx, tx);

    let msg = Msg::Control(Command::Join { rank, world_size });
    tx.send(&msg).await?;
    info!("rank {rank} joined the leader at {addr}");

    Ok((rx, tx))
}

fn reach_err(addr: SocketAddr, e: io::Error) -> CollectiveErr {
    CollectiveErr::Handshake(format!("couldn't reach the leader at {addr}: {e}"))
}
