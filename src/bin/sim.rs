//! `coopcache-sim`: a minimal demonstration binary for the simulated fleet.
//!
//! Parses the CLI surface in spec §6 into a [`coopcache::config::Params`],
//! builds a [`coopcache::dispatcher::Cluster`], and drives a small
//! GET/PUT/GET workload across edges so the cooperative redirect, origin
//! fallback, and write-invalidation paths are all exercised at least once.
//! This binary is illustrative scaffolding, not the deliverable (spec §1:
//! "the command-line front-ends" are an external collaborator); the real
//! surface is the library crate.

use coopcache::config::Params;
use coopcache::dispatcher::Cluster;
use coopcache::model::{EdgeIdx, Key, Value};

fn main() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "coopcache=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .init();

    let params = match Params::from_args(std::env::args().skip(1)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("coopcache-sim: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        cache_name = ?params.cache_name,
        edgecnt = params.edgecnt,
        capacity_mb = params.capacity_mb,
        "starting simulated fleet"
    );

    let cluster = Cluster::new(params);

    let key = Key::from_str("demo-key");
    let value = Value::from("demo-value");

    match cluster.client_put(EdgeIdx(0), &key, value.clone()) {
        Ok(()) => tracing::info!("seeded origin via PUT on edge 0"),
        Err(e) => tracing::warn!(error = %e, "seed PUT failed"),
    }

    for edge in 0..cluster.edge_count() {
        match cluster.client_get(EdgeIdx(edge), &key) {
            Ok((value, hitflag)) => {
                tracing::info!(edge, ?hitflag, got = value.is_some(), "GET completed");
            }
            Err(e) => tracing::warn!(edge, error = %e, "GET failed"),
        }
    }

    tracing::info!("simulated fleet run complete");
}
