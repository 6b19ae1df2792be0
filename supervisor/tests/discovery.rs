mod common;

use anyhow::Result;
use std::collections::BTreeMap;

use supervisor::core::cluster::ClusterSpec;
use supervisor::core::discovery::{bootstrap_nodes, live_endpoints, live_nodes};
use supervisor::core::platform::{
    Endpoint, EndpointSlice, ObjectKey, Platform, Pod, PodPhase, TargetRef,
};

use crate::common::TestSupervisor;

fn pod(name: &str, phase: PodPhase, ip: Option<&str>, terminating: bool) -> Pod {
    Pod {
        key: ObjectKey::new("search", name),
        labels: BTreeMap::from([("app".to_string(), "ts-sts".to_string())]),
        phase,
        ip: ip.map(str::to_string),
        terminating,
        conditions: vec![],
        annotations: BTreeMap::new(),
        resource_version: 1,
    }
}

fn endpoint(ip: &str, target: &str) -> Endpoint {
    Endpoint {
        addresses: vec![ip.to_string()],
        hostname: Some(target.to_string()),
        target_ref: Some(TargetRef {
            kind: "Pod".to_string(),
            name: target.to_string(),
        }),
    }
}

fn slice(name: &str, endpoints: Vec<Endpoint>) -> EndpointSlice {
    EndpointSlice {
        key: ObjectKey::new("search", name),
        service_name: "ts-sts-svc".to_string(),
        endpoints,
    }
}

#[test]
fn bootstrap_uses_naming_convention() -> Result<()> {
    let mut spec = ClusterSpec::new("search", "ts", 3);
    spec.peering_port = 9107;
    spec.api_port = 9108;

    assert_eq!(
        bootstrap_nodes(&spec, 3)?,
        vec![
            "ts-sts-0.ts-sts-svc:9107:9108",
            "ts-sts-1.ts-sts-svc:9107:9108",
            "ts-sts-2.ts-sts-svc:9107:9108",
        ]
    );
    assert!(bootstrap_nodes(&spec, 0)?.is_empty());
    Ok(())
}

#[test]
fn dead_replicas_are_filtered_out() {
    let spec = ClusterSpec::new("search", "ts", 5);
    let pods = vec![
        pod("ts-sts-0", PodPhase::Running, Some("10.0.0.1"), false),
        pod("ts-sts-1", PodPhase::Pending, Some("10.0.0.2"), false),
        pod("ts-sts-2", PodPhase::Running, Some("10.0.0.3"), true),
        pod("ts-sts-3", PodPhase::Failed, Some("10.0.0.4"), false),
        pod("ts-sts-4", PodPhase::Pending, None, false),
    ];
    let slices = vec![slice(
        "ts-sts-svc-a",
        vec![
            endpoint("10.0.0.1", "ts-sts-0"),
            endpoint("10.0.0.2", "ts-sts-1"),
            endpoint("10.0.0.3", "ts-sts-2"),
            endpoint("10.0.0.4", "ts-sts-3"),
        ],
    )];

    assert_eq!(
        live_endpoints(&slices, &pods, &spec),
        vec!["10.0.0.1:8107:8108", "10.0.0.2:8107:8108"]
    );
}

#[test]
fn slices_without_live_endpoints_are_skipped() {
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = vec![
        pod("ts-sts-0", PodPhase::Running, Some("10.0.0.1"), false),
        pod("ts-sts-1", PodPhase::Running, Some("10.0.0.2"), true),
    ];
    let mut orphan = endpoint("10.0.0.1", "ts-sts-0");
    orphan.target_ref = None;

    let slices = vec![
        slice("stale", vec![endpoint("10.0.0.2", "ts-sts-1")]),
        slice("untargeted", vec![orphan]),
        slice("live", vec![endpoint("10.0.0.1", "ts-sts-0")]),
    ];

    assert_eq!(live_endpoints(&slices, &pods, &spec), vec!["10.0.0.1:8107:8108"]);
    assert!(live_endpoints(&[], &pods, &spec).is_empty());
}

#[tokio::test]
async fn live_discovery_follows_pod_replacement() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;
    let workload = ts.workload(&spec).await?;

    let before = live_nodes(ts.platform.as_ref(), &spec, &workload).await?;
    assert_eq!(before.len(), 3);

    ts.platform.delete_pod(&pods[2].key).await?;
    let after = live_nodes(ts.platform.as_ref(), &spec, &workload).await?;
    assert_eq!(after.len(), 3);
    assert_eq!(after[..2], before[..2]);
    assert_ne!(after[2], before[2]);

    ts.platform
        .report_pod(&pods[0].key, PodPhase::Failed, None)
        .await?;
    let degraded = live_nodes(ts.platform.as_ref(), &spec, &workload).await?;
    assert_eq!(degraded.len(), 2);
    Ok(())
}
