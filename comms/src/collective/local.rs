use std::{io, time::Duration};

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use super::StarCollective;

/// Buffer size of each in-memory link.
const LINK_CAPACITY: usize = 64 * 1024;

/// A `StarCollective` whose members live in the same process, linked by in-memory pipes.
pub type LocalCollective = StarCollective<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Creates every member of a group that runs inside a single process, one per thread.
///
/// # Arguments
/// * `world_size` - The amount of members.
/// * `timeout` - How long a member waits for any single message before giving up.
///
/// # Returns
/// The members sorted by rank, or an io error if a runtime couldn't be built.
pub fn local_group(world_size: usize, timeout: Duration) -> io::Result<Vec<LocalCollective>> {
    let mut leader_links = Vec::with_capacity(world_size.saturating_sub(1));
    let mut followers = Vec::with_capacity(world_size.saturating_sub(1));

    for rank in 1..world_size {
        let (leader_end, follower_end) = tokio::io::duplex(LINK_CAPACITY);

        let (rx, tx) = tokio::io::split(leader_end);
        leader_links.push(crate::channel(rx, tx));

        let (rx, tx) = tokio::io::split(follower_end);
        let (rx, tx) = crate::channel(rx, tx);
        followers.push(StarCollective::follower(rank, world_size, rx, tx, timeout)?);
    }

    let mut members = Vec::with_capacity(world_size);
    members.push(StarCollective::leader(leader_links, timeout)?);
    members.extend(followers);
    Ok(members)
}
