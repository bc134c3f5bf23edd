//! Multi-replica tests for the Raft replicated log over an in-memory network.
//!
//! # Tiger Style
//!
//! - Bounded timeouts: every wait goes through `timeout()`
//! - Wait on commit streams and metrics instead of sleeping
//! - Explicit error handling: helpers return `anyhow::Result`

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use ratify::raft::LogReplicator;
use ratify::raft_types::CommittedEntry;
use ratify::raft_types::ConfigChange;
use ratify::raft_types::EntryPayload;
use ratify::raft_types::ForwardedProposal;
use ratify::raft_types::LogIndex;
use ratify::raft_types::NodeId;
use ratify::raft_types::RaftMessage;
use ratify::raft_types::StampedChange;
use ratify_testing::RaftRouter;
use ratify_testing::TestNode;
use tokio_util::sync::CancellationToken;

fn timeout() -> Duration {
    Duration::from_secs(10)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("ratify_raft=info").with_test_writer().try_init();
}

/// Read `node`'s commit stream until `count` data entries have arrived.
///
/// Also checks that indices are contiguous from the stream's start.
async fn collect_data(node: &TestNode, count: usize) -> Result<Vec<CommittedEntry>> {
    let mut stream = node.wait_committed()?;
    let mut expected = stream.position();
    let mut out = Vec::new();
    while out.len() < count {
        let entry = tokio::time::timeout(timeout(), stream.next_entry())
            .await
            .with_context(|| format!("node {}: timed out waiting for committed entry", node.node_id()))?
            .context("commit stream ended early")??;
        assert_eq!(entry.index, expected, "node {}: gap or duplicate in commit stream", node.node_id());
        expected += 1;
        if entry.data().is_some() {
            out.push(entry);
        }
    }
    Ok(out)
}

fn data_of(entries: &[CommittedEntry]) -> Vec<Vec<u8>> {
    entries.iter().filter_map(|entry| entry.data().map(<[u8]>::to_vec)).collect()
}

fn payloads(items: &[&[u8]]) -> Vec<Vec<u8>> {
    items.iter().map(|item| item.to_vec()).collect()
}

async fn propose_all(node: &TestNode, items: &[&[u8]]) -> Result<()> {
    let cancel = CancellationToken::new();
    for item in items {
        node.propose(&cancel, item.to_vec()).await?;
    }
    Ok(())
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_every_replica_sees_the_same_order() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;

    tracing::info!("--- wait for leader");
    let leader = router.wait_for_leader(timeout()).await?;

    tracing::info!("--- propose A, B, C on leader {}", leader);
    propose_all(&*router.node(leader)?, &[b"A", b"B", b"C"]).await?;

    tracing::info!("--- every replica delivers A, B, C in order");
    for id in router.node_ids() {
        let entries = collect_data(&*router.node(id)?, 3).await?;
        assert_eq!(data_of(&entries), payloads(&[b"A", b"B", b"C"]), "node {id}");
    }

    router.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_proposal_on_follower_is_forwarded() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;
    let follower = router.node_ids().into_iter().find(|&id| id != leader).context("no follower")?;

    tracing::info!("--- wait until follower {} knows the leader", follower);
    router
        .wait_for_metrics(follower, timeout(), "known leader", |metrics| metrics.current_leader == Some(leader))
        .await?;

    propose_all(&*router.node(follower)?, &[b"via-follower"]).await?;
    let entries = collect_data(&*router.node(leader)?, 1).await?;
    assert_eq!(data_of(&entries), payloads(&[b"via-follower"]));

    router.stop_all().await?;
    Ok(())
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test]
async fn test_leader_failure_elects_new_leader() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let old_leader = router.wait_for_leader(timeout()).await?;

    propose_all(&*router.node(old_leader)?, &[b"A", b"B", b"C"]).await?;
    for id in router.node_ids() {
        collect_data(&*router.node(id)?, 3).await?;
    }

    tracing::info!("--- isolate leader {}", old_leader);
    router.fail_node(old_leader);
    let new_leader = router.wait_for_leader(timeout()).await?;
    assert_ne!(new_leader, old_leader);

    tracing::info!("--- new leader {} accepts D", new_leader);
    propose_all(&*router.node(new_leader)?, &[b"D"]).await?;
    for id in router.node_ids().into_iter().filter(|&id| id != old_leader) {
        let entries = collect_data(&*router.node(id)?, 4).await?;
        assert_eq!(data_of(&entries), payloads(&[b"A", b"B", b"C", b"D"]), "node {id}");
    }

    tracing::info!("--- old leader rejoins and catches up");
    router.recover_node(old_leader);
    let entries = collect_data(&*router.node(old_leader)?, 4).await?;
    assert_eq!(data_of(&entries), payloads(&[b"A", b"B", b"C", b"D"]));
    router
        .wait_for_metrics(old_leader, timeout(), "step down", |metrics| !metrics.is_leader())
        .await?;

    router.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_minority_partition_cannot_commit() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;
    let others: Vec<NodeId> = router.node_ids().into_iter().filter(|&id| id != leader).collect();
    router.wait_for_commit_all(Some(0), timeout()).await?;

    tracing::info!("--- cut leader {} off from {:?}", leader, others);
    router.partition(&[&[leader], &others]);
    let committed_before = router.node(leader)?.committed_index();
    propose_all(&*router.node(leader)?, &[b"lost"]).await?;

    tracing::info!("--- majority side elects its own leader");
    let majority_leader = router
        .wait_for_metrics(others[0], timeout(), "majority leader", |metrics| {
            metrics.current_leader.is_some_and(|id| id != leader)
        })
        .await?
        .current_leader
        .context("leader vanished")?;
    propose_all(&*router.node(majority_leader)?, &[b"kept"]).await?;
    for &id in &others {
        let entries = collect_data(&*router.node(id)?, 1).await?;
        assert_eq!(data_of(&entries), payloads(&[b"kept"]), "node {id}");
    }
    assert_eq!(router.node(leader)?.committed_index(), committed_before);

    tracing::info!("--- heal; isolated entry is discarded");
    router.heal();
    let entries = collect_data(&*router.node(leader)?, 1).await?;
    assert_eq!(data_of(&entries), payloads(&[b"kept"]));

    router.stop_all().await?;
    Ok(())
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_restart_resumes_at_start_index() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;
    let follower = router.node_ids().into_iter().find(|&id| id != leader).context("no follower")?;

    propose_all(&*router.node(leader)?, &[b"A", b"B"]).await?;
    let before = collect_data(&*router.node(follower)?, 2).await?;
    let lo: LogIndex = before[1].index + 1;

    tracing::info!("--- restart follower {} at lo {}", follower, lo);
    router.stop_node(follower).await?;
    let restarted = router.restart_node(follower, lo).await?;

    propose_all(&*router.node(leader)?, &[b"C"]).await?;
    let mut stream = restarted.wait_committed()?;
    assert_eq!(stream.position(), lo);
    let mut seen = Vec::new();
    while seen.is_empty() {
        let entry = tokio::time::timeout(timeout(), stream.next_entry())
            .await
            .context("timed out waiting for C")?
            .context("stream ended")??;
        assert!(entry.index >= lo, "entry {} delivered again after restart", entry.index);
        if let Some(data) = entry.data() {
            seen.push(data.to_vec());
        }
    }
    assert_eq!(seen, payloads(&[b"C"]));

    tracing::info!("--- earlier entries are still readable");
    let history = restarted.get_committed(0, lo, u64::MAX)?;
    assert_eq!(data_of(&history), payloads(&[b"A", b"B"]));

    router.stop_all().await?;
    Ok(())
}

// ============================================================================
// Lossy network
// ============================================================================

/// Every committed entry on `node`, data or not.
fn committed_log(node: &TestNode) -> Result<Vec<CommittedEntry>> {
    Ok(node.get_committed(0, LogIndex::MAX, u64::MAX)?)
}

#[tokio::test]
async fn test_loss_and_uneven_delays_keep_logs_identical() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    let ids = router.node_ids();

    tracing::info!("--- 15% loss and a different delay on every link");
    for &source in &ids {
        for &target in &ids {
            if source != target {
                router.injector().set_packet_loss_rate(source, target, 0.15);
                router.injector().set_network_delay(source, target, (source * 7 + target * 3) % 20);
            }
        }
    }
    router.start_all(0).await?;

    let cancel = CancellationToken::new();
    for round in 0..30u32 {
        let leader = router.wait_for_leader(timeout()).await?;
        router.node(leader)?.propose(&cancel, format!("entry-{round}").into_bytes()).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tracing::info!("--- clean network, then a marker every replica must see");
    router.injector().reset();
    let mut attempt = 0u32;
    loop {
        let marker = format!("marker-{attempt}").into_bytes();
        let leader = router.wait_for_leader(timeout()).await?;
        router.node(leader)?.propose(&cancel, marker.clone()).await?;
        let seen_everywhere = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let mut everywhere = true;
                for &id in &ids {
                    let node = router.node(id)?;
                    everywhere &= data_of(&committed_log(&node)?).contains(&marker);
                }
                if everywhere {
                    return Ok::<_, anyhow::Error>(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        match seen_everywhere {
            Ok(result) => {
                result?;
                break;
            }
            Err(_) if attempt < 5 => attempt += 1,
            Err(_) => anyhow::bail!("marker never reached every replica"),
        }
    }

    tracing::info!("--- identical, gap-free, no duplicates");
    let logs: Vec<Vec<CommittedEntry>> =
        ids.iter().map(|&id| committed_log(&*router.node(id)?)).collect::<Result<_>>()?;
    let shortest = logs.iter().map(Vec::len).min().context("no replicas")?;
    for (id, log) in ids.iter().zip(&logs) {
        for (position, entry) in log.iter().enumerate() {
            assert_eq!(entry.index, position as LogIndex, "node {id}: gap in committed log");
        }
        assert_eq!(log[..shortest], logs[0][..shortest], "node {id} diverged");
        let data = data_of(log);
        let unique: BTreeSet<&Vec<u8>> = data.iter().collect();
        assert_eq!(unique.len(), data.len(), "node {id}: duplicate entry");
    }

    router.stop_all().await?;
    Ok(())
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn test_competing_membership_changes_apply_once() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;

    tracing::info!("--- two changes proposed under the same epoch");
    for node in [4, 5] {
        let payload = EntryPayload::Reconfigure(StampedChange::new(ConfigChange::AddReplica(node), 0));
        router.deliver(leader, RaftMessage::Forward(ForwardedProposal { from: leader, payload }))?;
    }

    for id in router.node_ids() {
        router.wait_for_metrics(id, timeout(), "epoch 1", |metrics| metrics.config.epoch >= 1).await?;
    }

    tracing::info!("--- both changes are in the log, only the first applied");
    propose_all(&*router.node(leader)?, &[b"after"]).await?;
    for id in router.node_ids() {
        let node = router.node(id)?;
        let entries = collect_data(&node, 1).await?;
        let upto = entries[0].index;
        let reconfigures = node
            .get_committed(0, upto, u64::MAX)?
            .into_iter()
            .filter(|entry| matches!(entry.payload, EntryPayload::Reconfigure(_)))
            .count();
        assert_eq!(reconfigures, 2, "node {id}");

        let config = node.cluster_config();
        assert_eq!(config.epoch, 1, "node {id}");
        assert_eq!(config.voters, BTreeSet::from([1, 2, 3, 4]), "node {id}");
    }

    router.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_added_replica_catches_up_before_next_change() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;
    let leader_node = router.node(leader)?;
    let cancel = CancellationToken::new();

    tracing::info!("--- node 4 starts cut off from the network");
    let joining = router.add_node(4)?;
    router.fail_node(4);
    joining.start(0).await?;

    leader_node.propose_config_change(&cancel, ConfigChange::AddReplica(4)).await?;
    for id in [1, 2, 3] {
        router.wait_for_metrics(id, timeout(), "node 4 added", |metrics| metrics.config.contains(4)).await?;
    }
    assert_eq!(router.metrics(leader)?.config.epoch, 1);

    tracing::info!("--- a second change is dropped while node 4 lags");
    leader_node.propose_config_change(&cancel, ConfigChange::AddReplica(5)).await?;
    propose_all(&leader_node, &[b"while-lagging"]).await?;
    let entries = collect_data(&leader_node, 1).await?;
    assert_eq!(data_of(&entries), payloads(&[b"while-lagging"]));
    let adds_of_5 = committed_log(&leader_node)?
        .iter()
        .filter(|entry| {
            matches!(&entry.payload, EntryPayload::Reconfigure(stamped) if stamped.change == ConfigChange::AddReplica(5))
        })
        .count();
    assert_eq!(adds_of_5, 0);
    assert_eq!(router.metrics(leader)?.config.epoch, 1);

    tracing::info!("--- node 4 catches up and commits later entries");
    router.recover_node(4);
    let caught_up = collect_data(&joining, 1).await?;
    assert_eq!(data_of(&caught_up), payloads(&[b"while-lagging"]));
    router.wait_for_metrics(4, timeout(), "node 4 sees itself", |metrics| metrics.config.contains(4)).await?;

    tracing::info!("--- the next change applies once node 4 holds the previous one");
    tokio::time::timeout(timeout(), async {
        loop {
            if router.metrics(leader)?.config.epoch >= 2 {
                return Ok::<_, anyhow::Error>(());
            }
            leader_node.propose_config_change(&cancel, ConfigChange::AddReplica(5)).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .context("second change never applied")??;

    for id in [1, 2, 3, 4] {
        let metrics = router.wait_for_metrics(id, timeout(), "epoch 2", |metrics| metrics.config.epoch >= 2).await?;
        assert_eq!(metrics.config.epoch, 2, "node {id}");
        assert_eq!(metrics.config.voters, BTreeSet::from([1, 2, 3, 4, 5]), "node {id}");
    }

    router.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_local_change_does_not_split_committed_changes() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;

    tracing::info!("--- only the leader applies a local change first");
    router.node(leader)?.add_replica(7).await?;
    router
        .node(leader)?
        .propose_config_change(&CancellationToken::new(), ConfigChange::AddReplica(4))
        .await?;

    for id in [1, 2, 3] {
        let metrics = router.wait_for_metrics(id, timeout(), "add(4) applied", |metrics| metrics.config.contains(4)).await?;
        assert_eq!(metrics.config.epoch, 1, "node {id}");
    }
    let config = router.node(leader)?.cluster_config();
    assert_eq!(config.voters, BTreeSet::from([1, 2, 3, 4, 7]));
    assert_eq!(config.local_changes, 1);

    router.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_propose_config_change_through_log() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;
    let follower = router.node_ids().into_iter().find(|&id| id != leader).context("no follower")?;

    tracing::info!("--- drop follower {} through the log", follower);
    router
        .node(leader)?
        .propose_config_change(&CancellationToken::new(), ConfigChange::DropReplica(follower))
        .await?;
    let remaining: Vec<NodeId> = router.node_ids().into_iter().filter(|&id| id != follower).collect();
    for &id in &remaining {
        router
            .wait_for_metrics(id, timeout(), "follower dropped", |metrics| !metrics.config.contains(follower))
            .await?;
    }

    propose_all(&*router.node(leader)?, &[b"two-voters"]).await?;
    for id in remaining {
        let entries = collect_data(&*router.node(id)?, 1).await?;
        assert_eq!(data_of(&entries), payloads(&[b"two-voters"]));
    }

    router.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_local_membership_change() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let node = router.node(1)?;

    node.add_replica(7).await?;
    let config = node.cluster_config();
    assert!(config.contains(7));
    assert_eq!(config.local_changes, 1);
    assert_eq!(config.epoch, 0, "local changes never move the epoch");

    tracing::info!("--- repeated add is a no-op");
    node.add_replica(7).await?;
    assert_eq!(node.cluster_config().local_changes, 1);

    node.drop_replica(7).await?;
    assert!(!node.cluster_config().contains(7));
    assert_eq!(node.cluster_config().local_changes, 2);
    assert_eq!(node.cluster_config().epoch, 0);

    router.stop_all().await?;
    Ok(())
}

// ============================================================================
// Leader hints
// ============================================================================

#[tokio::test]
async fn test_leader_hints_follow_leadership() -> Result<()> {
    init_tracing();
    let router = RaftRouter::new([1, 2, 3])?;
    router.start_all(0).await?;
    let leader = router.wait_for_leader(timeout()).await?;

    let mut hints = router.node(leader)?.leader_hints()?;
    let mut believed = false;
    while !believed {
        believed = tokio::time::timeout(timeout(), hints.next())
            .await
            .context("timed out waiting for hint")?
            .context("hints closed early")?;
    }

    for id in router.node_ids().into_iter().filter(|&id| id != leader) {
        let mut follower_hints = router.node(id)?.leader_hints()?;
        assert_eq!(follower_hints.next().await, Some(false), "node {id}");
    }

    tracing::info!("--- stopping the leader closes its hints");
    router.stop_node(leader).await?;
    let mut last = None;
    while let Some(value) = tokio::time::timeout(timeout(), hints.next()).await.context("hints did not close")? {
        last = Some(value);
    }
    assert_eq!(last, Some(false));

    router.stop_all().await?;
    Ok(())
}
