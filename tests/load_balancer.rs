use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use meshlb::{
    cluster::{
        delegate::{BackendDelegate, Delegate, LoadBalancerDelegate},
        event::{ChannelEventDelegate, EventDelegate, Node},
        metadata::MAX_METADATA_SIZE,
        state::LoadBalancerState,
    },
    config::BackendConfig,
    generator::{run_generation_loop, GeneratorOutput, NginxConfig, NginxGenerator},
    types::Application,
};

fn backend_node(name: &str, addr: IpAddr, applications: Vec<Application>) -> Node {
    let delegate = BackendDelegate::new(&BackendConfig { applications }).unwrap();
    Node {
        name: name.to_string(),
        addr,
        port: 9999,
        meta: delegate.node_meta(MAX_METADATA_SIZE),
    }
}

fn web() -> Application {
    Application::new("web", vec!["www.example.com"], "443", "8080", "http").unwrap()
}

fn target_path(test: &str) -> PathBuf {
    std::env::temp_dir().join(format!("meshlb-{}-{}.conf", test, std::process::id()))
}

async fn wait_for_config(target: &PathBuf, predicate: impl Fn(&str) -> bool) -> String {
    // polls until the generation loop wrote a configuration matching the predicate
    for _ in 0..200 {
        if let Ok(config) = tokio::fs::read_to_string(target).await {
            if predicate(&config) {
                return config;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    panic!("configuration never converged");
}

#[tokio::test]
async fn membership_changes_reach_the_proxy_configuration() {
    let target = target_path("membership");
    let state = LoadBalancerState::new();
    let (delegate, events) = ChannelEventDelegate::new();
    let updates = state.subscribe().unwrap();

    let generator = NginxGenerator::new(NginxConfig {
        tls_chain_location: "/etc/meshlb/chain.pem".to_string(),
        tls_key_location: "/etc/meshlb/key.pem".to_string(),
        dhparam_location: None,
        restart_command: Some("true".to_string()),
    })
    .unwrap();
    let output = GeneratorOutput {
        print_stdout: false,
        target: Some(target.clone()),
        settle: Duration::from_millis(10),
    };

    let state_task = tokio::spawn(state.clone().run(events));
    let generation_task = tokio::spawn(run_generation_loop(Arc::new(generator), updates, output));

    let v4 = backend_node("b1", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), vec![web()]);
    let v6 = backend_node(
        "b2",
        IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 7)),
        vec![web()],
    );
    let lb = Node {
        name: "lb1".to_string(),
        addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        port: 9999,
        meta: LoadBalancerDelegate::new().unwrap().node_meta(MAX_METADATA_SIZE),
    };

    delegate.notify_join(&lb);
    delegate.notify_join(&v4);
    delegate.notify_join(&v6);

    let config = wait_for_config(&target, |c| {
        c.contains("10.0.0.5:8080") && c.contains("[fd00::7]:8080")
    })
    .await;
    assert_eq!(config.matches("upstream web {").count(), 1);
    assert!(!config.contains("10.0.0.1"));

    delegate.notify_leave(&v4);
    delegate.notify_leave(&v6);
    wait_for_config(&target, |c| c.contains("return 503")).await;
    assert!(state.snapshot().unwrap().is_empty());

    drop(delegate);
    state_task.await.unwrap();
    drop(state);
    generation_task.await.unwrap();
    tokio::fs::remove_file(&target).await.unwrap();
}

#[tokio::test]
async fn undecodable_update_keeps_previous_applications() {
    let state = LoadBalancerState::new();
    let node = backend_node("b1", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), vec![web()]);
    state.notify_join(&node);

    let mut broken = node.clone();
    broken.meta = bytes::Bytes::from_static(b"not deflate");
    state.notify_update(&broken);

    let snapshot = state.snapshot().unwrap();
    assert_eq!(snapshot[&node.upstream()], vec![web()]);
}
