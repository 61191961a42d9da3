//! Master Module Tests
//!
//! Drives the coordinator the way chunk agents and the front-end do, with block
//! transfers routed through an in-memory transport.
//!
//! ## Test Scopes
//! - **Agent Protocol**: registration, heartbeats, sync acknowledgements.
//! - **Failure Handling**: health sweep, repair queue, re-placement end to end.
//! - **Wire Format**: error bodies and their round trip back to typed errors.

#[cfg(test)]
mod tests {
    use crate::chunk::store::BlockStore;
    use crate::config::ClusterConfig;
    use crate::error::ClusterError;
    use crate::master::coordinator::Master;
    use crate::master::protocol::*;
    use crate::membership::types::NodeId;
    use crate::placement::types::{BlockId, File};
    use crate::testing::{InMemoryTransport, addr};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const BLOCK_SIZE: usize = 512;

    fn master(replication_factor: usize) -> (Arc<Master>, Arc<InMemoryTransport>) {
        let config = ClusterConfig {
            block_size: BLOCK_SIZE,
            replication_factor,
            heartbeat_interval_ms: 50,
            transfer_timeout_ms: 1_000,
            repair_workers: 2,
            repair_queue_capacity: 64,
            status_report_secs: 0,
            ..Default::default()
        };
        let transport = InMemoryTransport::new();
        (Master::new(config, transport.clone()), transport)
    }

    fn register_nodes(master: &Master, n: usize) -> Vec<NodeId> {
        (1..=n)
            .map(|i| {
                master
                    .register(RegistrationMessage { addr: addr(i) })
                    .unwrap()
            })
            .collect()
    }

    fn beat(node_id: NodeId, addr: String, blocks: Vec<BlockId>) -> HeartbeatMessage {
        HeartbeatMessage {
            node_id,
            addr,
            blocks,
            utilization: 0,
            timestamp: 1,
        }
    }

    async fn upload(master: &Master, len: usize) -> File {
        let content: Vec<u8> = (0..len).map(|i| (i % 199) as u8).collect();
        master.upload("file.bin", content).await.unwrap()
    }

    // ============================================================
    // AGENT PROTOCOL TESTS
    // ============================================================

    #[test]
    fn test_register_returns_distinct_ids() {
        let (master, _) = master(3);

        let ids = register_nodes(&master, 3);

        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(master.list_nodes().len(), 3);
    }

    #[test]
    fn test_register_empty_address_rejected() {
        let (master, _) = master(3);

        let result = master.register(RegistrationMessage { addr: String::new() });

        assert!(matches!(result, Err(ClusterError::EmptyAddress)));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_node() {
        let (master, _) = master(3);

        let result = master.heartbeat(beat(NodeId(77), addr(1), Vec::new())).await;

        assert!(matches!(result, Err(ClusterError::UnknownNode(NodeId(77)))));
    }

    #[tokio::test]
    async fn test_heartbeat_of_consistent_node_is_empty() {
        let (master, _) = master(3);
        let ids = register_nodes(&master, 3);
        let file = upload(&master, BLOCK_SIZE * 2).await;

        let response = master
            .heartbeat(beat(ids[0], addr(1), file.blocks.clone()))
            .await
            .unwrap();

        assert_eq!(response, HeartbeatResponse::default());
    }

    #[tokio::test]
    async fn test_heartbeat_reports_dead_and_sync_blocks() {
        // ARRANGE
        let (master, _) = master(3);
        let ids = register_nodes(&master, 3);
        let file = upload(&master, BLOCK_SIZE * 2).await;
        let stray = BlockId("leftover".into());

        // ACT: node 1 lost block 0 and holds a block nobody assigned to it.
        let response = master
            .heartbeat(beat(ids[0], addr(1), vec![file.blocks[1].clone(), stray.clone()]))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(response.dead_blocks, vec![stray]);
        assert_eq!(response.sync_blocks.len(), 1);
        assert_eq!(response.sync_blocks[0].block_id, file.blocks[0]);
        assert_ne!(response.sync_blocks[0].source, ids[0]);
    }

    #[tokio::test]
    async fn test_heartbeat_updates_registry_view() {
        let (master, _) = master(1);
        let ids = register_nodes(&master, 1);

        master
            .heartbeat(HeartbeatMessage {
                utilization: 4096,
                ..beat(ids[0], addr(1), vec![BlockId("b".into())])
            })
            .await
            .unwrap();

        let node = &master.list_nodes()[0];
        assert_eq!(node.utilization, 4096);
        assert_eq!(node.blocks, vec![BlockId("b".into())]);
    }

    #[tokio::test]
    async fn test_sync_done_confirms_replica() {
        let (master, _) = master(3);
        let ids = register_nodes(&master, 3);
        let file = upload(&master, BLOCK_SIZE).await;
        let block = master.engine.get_block(&file.blocks[0]).unwrap();

        let response = master
            .sync_done(SyncDoneMessage {
                node_id: ids[2],
                block_id: block.id.clone(),
                checksum: block.checksum.clone(),
            })
            .await
            .unwrap();

        assert!(response.replica);
    }

    #[tokio::test]
    async fn test_sync_done_unknown_node() {
        let (master, _) = master(3);
        register_nodes(&master, 3);
        let file = upload(&master, BLOCK_SIZE).await;

        let result = master
            .sync_done(SyncDoneMessage {
                node_id: NodeId(50),
                block_id: file.blocks[0].clone(),
                checksum: String::new(),
            })
            .await;

        assert!(matches!(result, Err(ClusterError::UnknownNode(_))));
    }

    #[tokio::test]
    async fn test_concurrent_heartbeats_from_many_nodes() {
        let (master, _) = master(3);
        let ids = register_nodes(&master, 8);
        let file = upload(&master, BLOCK_SIZE * 4).await;

        let handles: Vec<_> = ids
            .iter()
            .enumerate()
            .flat_map(|(i, id)| {
                let master = master.clone();
                let blocks = file.blocks.clone();
                let id = *id;
                (0..5).map(move |_| {
                    let master = master.clone();
                    let blocks = blocks.clone();
                    tokio::spawn(async move {
                        master.heartbeat(beat(id, addr(i + 1), blocks)).await
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(master.registry.counts(), (8, 8));
        assert_eq!(master.get_file(&file.id).unwrap().blocks, file.blocks);
    }

    // ============================================================
    // FAILURE HANDLING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_upload_without_capacity_fails() {
        let (master, _) = master(3);
        register_nodes(&master, 2);

        let result = master.upload("f", vec![1; 10]).await;

        assert!(matches!(result, Err(ClusterError::InsufficientCapacity { .. })));
        assert!(!master.list_files()[0].is_available());
    }

    #[tokio::test]
    async fn test_sweep_flags_and_queues_blocks_of_lost_node() {
        let (master, _) = master(3);
        let ids = register_nodes(&master, 3);
        let file = upload(&master, BLOCK_SIZE * 2).await;

        let lost = master.sweep(Instant::now() + Duration::from_secs(60));

        assert_eq!(lost, ids);
        let mut expected = file.blocks.clone();
        expected.sort();
        assert_eq!(master.engine.under_replicated_blocks(), expected);
        assert!(
            !master.enqueue_repair(expected[0].clone()),
            "Block already queued by the sweep"
        );
    }

    #[tokio::test]
    async fn test_lost_node_blocks_are_re_replicated() {
        // ARRANGE
        let (master, transport) = master(3);
        let ids = register_nodes(&master, 5);
        let file = upload(&master, BLOCK_SIZE * 2).await;
        master.clone().start().await;

        let victim = ids[0];
        let holders_of_victim: Vec<BlockId> = file
            .blocks
            .iter()
            .filter(|b| master.engine.get_block(b).unwrap().replicas.contains(&victim))
            .cloned()
            .collect();
        assert!(!holders_of_victim.is_empty());

        // ACT: every node but the victim keeps reporting.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            for (i, id) in ids.iter().enumerate().skip(1) {
                let blocks = transport.store(&addr(i + 1)).list_blocks().await.unwrap();
                master.heartbeat(beat(*id, addr(i + 1), blocks)).await.unwrap();
            }

            let done = file.blocks.iter().all(|b| {
                let block = master.engine.get_block(b).unwrap();
                block.replicas.len() == 3 && !block.replicas.contains(&victim)
            });
            if done {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Blocks were not re-replicated in time"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        // ASSERT
        assert!(!master.registry.is_healthy(victim));
        for block_id in &file.blocks {
            let block = master.engine.get_block(block_id).unwrap();
            assert!(block.replicas.iter().all(|n| master.registry.is_healthy(*n)));
            assert!(transport.holders(block_id).len() >= 3);
        }
        assert!(master.engine.under_replicated_blocks().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_repair_failure_is_tracked_until_success() {
        // ARRANGE: every replica holder but one comes back, no spare node.
        let (master, transport) = master(3);
        let ids = register_nodes(&master, 3);
        let file = upload(&master, BLOCK_SIZE).await;
        let block_id = file.blocks[0].clone();
        master.sweep(Instant::now() + Duration::from_secs(60));
        for (i, id) in ids.iter().enumerate().skip(1) {
            let blocks = transport.store(&addr(i + 1)).list_blocks().await.unwrap();
            master.heartbeat(beat(*id, addr(i + 1), blocks)).await.unwrap();
        }

        // ACT
        let first = master.repair(&block_id).await;
        let second = master.repair(&block_id).await;

        // ASSERT
        assert!(matches!(first, Err(ClusterError::InsufficientCapacity { .. })));
        assert!(matches!(second, Err(ClusterError::InsufficientCapacity { .. })));
        assert!(master.is_repair_failing(&block_id));

        master
            .register(RegistrationMessage { addr: addr(4) })
            .unwrap();
        let added = master.repair(&block_id).await.unwrap();

        assert_eq!(added.len(), 1);
        assert!(!master.is_repair_failing(&block_id));
        assert!(!master.engine.is_under_replicated(&block_id));
    }

    // ============================================================
    // WIRE FORMAT TESTS
    // ============================================================

    #[test]
    fn test_error_response_round_trips_unknown_node() {
        let body = ErrorResponse::from_error(&ClusterError::UnknownNode(NodeId(9)));

        assert_eq!(body.code, "unknown_node");
        let json = serde_json::to_string(&body).unwrap();
        let back: ErrorResponse = serde_json::from_str(&json).unwrap();

        assert!(back.into_error().is_unknown_node());
    }

    #[test]
    fn test_error_response_other_errors_become_transport() {
        let body = ErrorResponse::from_error(&ClusterError::NoLiveSource(BlockId("b".into())));

        match body.into_error() {
            ClusterError::Transport(message) => assert!(message.contains("no live source")),
            other => panic!("Expected Transport, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_message_json_shape() {
        let msg = beat(NodeId(3), "10.0.0.3:9000".into(), vec![BlockId("b1".into())]);

        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["node_id"], 3);
        assert_eq!(value["blocks"][0], "b1");
        assert_eq!(value["addr"], "10.0.0.3:9000");
    }
}
