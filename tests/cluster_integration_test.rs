// Integration tests for the cooperative edge cache fleet, spanning the
// dispatcher, cooperation layer, and local cache engine together (spec §8
// end-to-end scenarios).

#[cfg(test)]
mod cluster_integration_tests {
    use coopcache::config::Params;
    use coopcache::cooperation::{AcquireOutcome, Beacon, DirectoryMetadata, DirectoryInfo};
    use coopcache::dispatcher::Cluster;
    use coopcache::hashdht::EdgeAddr;
    use coopcache::message::HitFlag;
    use coopcache::model::{EdgeIdx, Key, Value};
    use coopcache::policy::PolicyName;

    fn cluster(edgecnt: u32, cache_name: PolicyName) -> Cluster {
        let mut params = Params::default();
        params.edgecnt = edgecnt;
        params.capacity_mb = 1;
        params.cache_name = cache_name;
        Cluster::new(params)
    }

    #[test]
    fn cold_read_falls_through_to_origin_then_admits_locally() {
        let c = cluster(3, PolicyName::Lru);
        let key = Key::from_str("origin-only");
        c.client_put(EdgeIdx(0), &key, Value::from("v1")).unwrap();

        let (value, hitflag) = c.client_get(EdgeIdx(1), &key).unwrap();
        assert_eq!(value, Some(Value::from("v1")));
        assert_eq!(hitflag, HitFlag::GlobalMiss);
    }

    #[test]
    fn write_then_read_from_every_edge_observes_the_new_value() {
        // Cross-edge write invalidation only fans out through the
        // directory, which is only populated for cooperation-aware
        // policies (spec §4.4); `covered` is what exercises that path.
        let c = cluster(4, PolicyName::Covered);
        let key = Key::from_str("shared");

        c.client_put(EdgeIdx(0), &key, Value::from("v1")).unwrap();
        for edge in 0..c.edge_count() {
            let (value, _) = c.client_get(EdgeIdx(edge), &key).unwrap();
            assert_eq!(value, Some(Value::from("v1")));
        }

        c.client_put(EdgeIdx(2), &key, Value::from("v2")).unwrap();
        for edge in 0..c.edge_count() {
            let (value, _) = c.client_get(EdgeIdx(edge), &key).unwrap();
            assert_eq!(value, Some(Value::from("v2")));
        }
    }

    #[test]
    fn repeated_local_gets_converge_to_local_hits() {
        let c = cluster(2, PolicyName::Lru);
        let key = Key::from_str("warmed");
        c.client_put(EdgeIdx(0), &key, Value::from("v")).unwrap();

        // A bare PUT only updates an already-cached entry; with nothing
        // cached yet the first GET still falls through to origin and
        // admits locally, and only the repeats land as local hits.
        let (value, hitflag) = c.client_get(EdgeIdx(0), &key).unwrap();
        assert_eq!(value, Some(Value::from("v")));
        assert_eq!(hitflag, HitFlag::GlobalMiss);

        for _ in 0..5 {
            let (value, hitflag) = c.client_get(EdgeIdx(0), &key).unwrap();
            assert_eq!(value, Some(Value::from("v")));
            assert_eq!(hitflag, HitFlag::LocalHit);
        }
    }

    #[test]
    fn deleting_a_key_then_reading_returns_a_tombstone_from_origin() {
        let c = cluster(2, PolicyName::Lru);
        let key = Key::from_str("to-delete");
        c.client_put(EdgeIdx(0), &key, Value::from("v")).unwrap();
        c.client_del(EdgeIdx(0), &key).unwrap();

        let (value, _) = c.client_get(EdgeIdx(1), &key).unwrap();
        assert_eq!(value, Some(Value::tombstone()));
    }

    #[test]
    fn three_edges_racing_a_write_only_one_proceeds_at_a_time() {
        // Spec §8 scenario 6 (MSI fairness): three edges attempt to acquire
        // the writelock for the same key; only the first succeeds, the
        // others are contended until the first releases, at which point
        // exactly one of the remaining attempts may proceed.
        let beacon = Beacon::new();
        let key = Key::from_str("raced");
        let dirinfo = |edge: u32| DirectoryInfo {
            target_edge_idx: EdgeIdx(edge),
            beacon_addr: EdgeAddr {
                ip: std::net::Ipv4Addr::new(10, 0, 0, edge as u8),
                beacon_port: 7000 + edge as u16,
                cache_port: 8000 + edge as u16,
            },
        };
        for edge in [0u32, 1, 2] {
            beacon.update(&key, true, dirinfo(edge), DirectoryMetadata { valid: true });
        }

        let first = beacon.acquire_writelock_by_cache_server(&key, EdgeIdx(0));
        assert!(matches!(first, AcquireOutcome::Success(_)));

        let second = beacon.acquire_writelock_by_cache_server(&key, EdgeIdx(1));
        assert_eq!(second, AcquireOutcome::Failure);
        let third = beacon.acquire_writelock_by_cache_server(&key, EdgeIdx(2));
        assert_eq!(third, AcquireOutcome::Failure);

        beacon.release_writelock(&key, dirinfo(0));
        let retry = beacon.acquire_writelock_by_cache_server(&key, EdgeIdx(1));
        assert!(matches!(retry, AcquireOutcome::Success(_)));
    }

    #[test]
    fn covered_policy_serves_cooperative_hits_across_edges() {
        let c = cluster(3, PolicyName::Covered);
        let key = Key::from_str("popular");
        c.client_put(EdgeIdx(0), &key, Value::from("v")).unwrap();

        // The PUT alone only updates an already-cached entry, so the first
        // GET still falls through to origin and admits (registering the
        // replica with the beacon since `covered` is cooperation-aware).
        let (value, hitflag) = c.client_get(EdgeIdx(0), &key).unwrap();
        assert_eq!(value, Some(Value::from("v")));
        assert_eq!(hitflag, HitFlag::GlobalMiss);

        // A second edge's first read now finds edge 0's registered replica
        // through the directory instead of falling through to origin.
        let (value, hitflag) = c.client_get(EdgeIdx(1), &key).unwrap();
        assert_eq!(value, Some(Value::from("v")));
        assert_eq!(hitflag, HitFlag::CooperativeHit);
    }
}
