use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::time;

use crate::controller::controller_state::RosterSnapshot;

/// Wait (up to five seconds) until a published snapshot satisfies the predicate, returning that
///  snapshot. The current snapshot is checked first.
pub async fn wait_for_snapshot(snapshots: &mut watch::Receiver<RosterSnapshot>, predicate: impl FnMut(&RosterSnapshot) -> bool) -> anyhow::Result<RosterSnapshot> {
    let outcome = time::timeout(Duration::from_secs(5), snapshots.wait_for(predicate)).await
        .map(|r| r.map(|snapshot| snapshot.clone()));

    match outcome {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(_)) => Err(anyhow!("controller was dropped")),
        Err(_) => Err(anyhow!("timed out waiting for snapshot, last was {:?}", *snapshots.borrow())),
    }
}
