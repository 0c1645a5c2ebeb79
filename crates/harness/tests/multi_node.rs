//! End-to-end tests booting nodes against a scripted consensus engine.
//!
//! Every test uses its own identities so the fixed ports never collide when
//! tests run in parallel.

use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use abci_relay_harness::prelude::*;
use abci_relay_harness::{HarnessError, PortKind};

fn fake_engine() -> EngineConfig {
    let script = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake-engine.sh");
    EngineConfig::new("sh")
        .with_base_args([script.to_string_lossy().into_owned()])
        .with_stop_timeout(Duration::from_secs(5))
}

/// An engine whose `node` command reacts to the interrupt with `on_int`.
///
/// It prints `ready` once the handler is installed; see [`start_scripted`].
fn scripted_engine(on_int: &str) -> EngineConfig {
    let script = format!(
        "case \"$1\" in init) exit 0;; node) trap '{on_int}' INT; echo ready; while :; do sleep 0.05; done;; esac"
    );
    EngineConfig::new("sh").with_base_args(["-c".to_string(), script, "engine".to_string()])
}

async fn node(id: u8, root: &std::path::Path, engine: EngineConfig) -> Node {
    Node::builder()
        .id(id)
        .root(root)
        .engine(engine)
        .build()
        .await
        .unwrap()
}

/// Poll `output` until it contains `needle`; the engine writes asynchronously.
async fn wait_for_output(output: impl Fn() -> String, needle: &str) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = output();
        if current.contains(needle) || tokio::time::Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Start a node running [`scripted_engine`] and wait until its interrupt
/// handler is in place, so a following `stop` exercises that handler.
async fn start_scripted(node: &mut Node) {
    node.start(&[]).await.unwrap();
    let output = wait_for_output(|| node.engine_output(), "ready").await;
    assert!(output.contains("ready"), "{output}");
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[tokio::test]
async fn two_nodes_echo_locally_and_relay_the_rest() {
    let root = tempfile::tempdir().unwrap();
    let mut node0 = node(0, root.path(), fake_engine()).await;
    let mut node1 = node(1, root.path(), fake_engine()).await;
    let ids = [node0.id(), node1.id()];

    node0.start(&ids).await.unwrap();
    node1.start(&ids).await.unwrap();
    assert_eq!(node0.state(), NodeState::Running);
    assert_eq!(node1.state(), NodeState::Running);

    let client = AbciClient::connect(node0.proxy_addr(), RetryPolicy::default())
        .await
        .unwrap();

    let echoed = Application::deliver_tx(&client, b"echo:hello").await.unwrap();
    assert_eq!(echoed, TxResult::ok(Vec::new(), "Echo: hello"));
    let checked = Application::check_tx(&client, b"echo:hello").await.unwrap();
    assert_eq!(checked, echoed);
    node0.application().assert_not_called("deliver_tx");
    node0.application().assert_not_called("check_tx");

    let relayed = Application::deliver_tx(&client, b"plain").await.unwrap();
    assert_eq!(relayed, TxResult::ok(b"plain".to_vec(), "accepted"));
    node0.application().assert_called("deliver_tx", 1);
    node1.application().assert_not_called("deliver_tx");
    assert_eq!(node0.application().payloads("deliver_tx"), vec![b"plain".to_vec()]);
    client.close().await.unwrap();

    node0.stop().await.unwrap();
    node1.stop().await.unwrap();
    assert_eq!(node0.state(), NodeState::Stopped);

    assert!(root.path().join("BCNode00").is_dir());
    assert!(root.path().join("BCNode01").is_dir());
    assert!(root.path().join("BCNode00/config/genesis.json").is_file());

    let engine_output = node0.engine_output();
    assert!(engine_output.contains("--proxy_app tcp://127.0.0.1:50000"), "{engine_output}");
    assert!(engine_output.contains("--p2p.seeds=127.0.0.1:50201"), "{engine_output}");

    let proxy_output = node0.proxy_output();
    assert!(proxy_output.contains("decision=intercepted"), "{proxy_output}");
    assert!(proxy_output.contains("decision=relayed"), "{proxy_output}");
    assert!(!node1.proxy_output().contains("proxy call"));

    for kind in [PortKind::Proxy, PortKind::App] {
        assert!(port_is_free(node0.ports().get(kind)), "{kind} port still bound");
    }
}

#[tokio::test]
async fn cluster_starts_and_tears_down_every_node() {
    let root = tempfile::tempdir().unwrap();
    let config = ClusterConfig::builder()
        .nodes(3)
        .first_id(10)
        .root(root.path())
        .engine(fake_engine())
        .prefix("ping:")
        .build();
    let cluster = Cluster::start(config).await.unwrap();
    assert_eq!(cluster.node_count(), 3);

    for node in cluster.nodes() {
        assert_eq!(node.state(), NodeState::Running);
        let client = AbciClient::connect(node.proxy_addr(), RetryPolicy::default())
            .await
            .unwrap();
        let echoed = Application::check_tx(&client, b"ping:pong").await.unwrap();
        assert_eq!(echoed.log, "Echo: pong");
        let relayed = Application::check_tx(&client, b"echo:pong").await.unwrap();
        assert_eq!(relayed.log, "accepted");
        node.application().assert_called("check_tx", 1);
        client.close().await.unwrap();
    }

    let expected = "--p2p.seeds=127.0.0.1:50210,127.0.0.1:50212";
    let node = cluster.node(1).unwrap();
    let seeds = wait_for_output(|| node.engine_output(), expected).await;
    assert!(seeds.contains(expected), "{seeds}");

    cluster.teardown().await.unwrap();
    for dir in ["BCNode10", "BCNode11", "BCNode12"] {
        assert!(root.path().join(dir).is_dir(), "{dir} removed");
    }
}

#[tokio::test]
async fn failed_start_rolls_back_earlier_services() {
    let root = tempfile::tempdir().unwrap();
    let mut node = node(20, root.path(), fake_engine()).await;
    let _occupied = TcpListener::bind(("127.0.0.1", node.ports().proxy)).unwrap();

    let err = node.start(&[node.id()]).await.unwrap_err();
    assert!(
        matches!(err, HarnessError::Service { service: "proxy server", .. }),
        "{err}"
    );
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(port_is_free(node.ports().app), "application server left running");
    assert!(node.engine_output().is_empty());

    node.stop().await.unwrap();
}

#[tokio::test]
async fn starting_a_running_node_fails() {
    let root = tempfile::tempdir().unwrap();
    let mut node = node(25, root.path(), fake_engine()).await;
    node.start(&[]).await.unwrap();

    let err = node.start(&[]).await.unwrap_err();
    assert!(matches!(err, HarnessError::Configuration(_)), "{err}");
    assert_eq!(node.state(), NodeState::Running);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn node_can_restart_after_stop() {
    let root = tempfile::tempdir().unwrap();
    let mut node = node(30, root.path(), fake_engine()).await;

    node.start(&[]).await.unwrap();
    node.stop().await.unwrap();
    node.start(&[]).await.unwrap();

    let client = AbciClient::connect(node.proxy_addr(), RetryPolicy::default())
        .await
        .unwrap();
    let result = Application::deliver_tx(&client, b"again").await.unwrap();
    assert_eq!(result.log, "accepted");
    client.close().await.unwrap();

    node.stop().await.unwrap();
}

#[tokio::test]
async fn unexpected_engine_exit_is_reported_after_full_teardown() {
    let root = tempfile::tempdir().unwrap();
    let mut node = node(40, root.path(), scripted_engine("echo interrupted; exit 7")).await;
    start_scripted(&mut node).await;

    let err = node.stop().await.unwrap_err();
    let HarnessError::Teardown { errors, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(errors.len(), 1, "{err}");
    let HarnessError::EngineExit { status, output, .. } = &errors[0] else {
        panic!("unexpected error: {}", errors[0]);
    };
    assert!(status.contains('7'), "{status}");
    assert!(output.contains("interrupted"), "{output}");

    assert_eq!(node.state(), NodeState::Stopped);
    assert!(port_is_free(node.ports().proxy));
    assert!(port_is_free(node.ports().app));
}

#[tokio::test]
async fn graceful_exit_code_is_accepted() {
    let root = tempfile::tempdir().unwrap();
    let mut node = node(45, root.path(), scripted_engine("exit 1")).await;
    start_scripted(&mut node).await;
    node.stop().await.unwrap();
}

#[tokio::test]
async fn engine_ignoring_the_interrupt_is_killed() {
    let root = tempfile::tempdir().unwrap();
    let engine = scripted_engine("").with_stop_timeout(Duration::from_millis(300));
    let mut node = node(50, root.path(), engine).await;
    start_scripted(&mut node).await;

    let err = node.stop().await.unwrap_err();
    let HarnessError::Teardown { errors, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(
        matches!(errors[0], HarnessError::EngineTimeout { .. }),
        "{err}"
    );
    assert!(port_is_free(node.ports().proxy));
}
