//! Request multiplexing integration tests
//!
//! Drives a DaemonClient against in-memory daemons and checks correlation,
//! ordering, exit handling and restart behaviour end to end.

use std::sync::Arc;
use std::time::Duration;

use atv_remote::daemon::mock::{MockDaemon, MockLauncher};
use atv_remote::daemon::{DaemonClient, HandleState};
use atv_remote::error::{RemoteError, Result};
use atv_remote::ipc::Reply;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

fn manual_client() -> (Arc<MockLauncher>, Arc<DaemonClient>) {
    let launcher = Arc::new(MockLauncher::new());
    let client = Arc::new(DaemonClient::new(launcher.clone()));
    (launcher, client)
}

fn spawn_send(client: &Arc<DaemonClient>, cmd: &'static str, args: Vec<Value>) -> JoinHandle<Result<Value>> {
    let client = Arc::clone(client);
    tokio::spawn(async move { client.send(cmd, args).await })
}

/// Send one request and answer it, returning the id the daemon saw.
async fn round_trip(client: &Arc<DaemonClient>, daemon: &mut MockDaemon) -> String {
    let pending = spawn_send(client, "power_state", vec![json!("d1")]);
    let request = daemon.recv().await.unwrap();
    daemon.reply_ok(&request.id, json!({"on": false})).await.unwrap();
    pending.await.unwrap().unwrap();
    request.id
}

#[tokio::test]
async fn test_list_devices_wire_format_and_result() {
    let (launcher, client) = manual_client();
    let pending = spawn_send(&client, "list_devices", vec![]);

    let mut daemon = launcher.next_daemon().await.unwrap();
    let line = daemon.recv_raw().await.unwrap();
    assert_eq!(line, r#"{"id":"1","cmd":"list_devices","args":[]}"#);

    daemon
        .send_line(r#"{"id":"1","result":{"devices":[],"selected":null}}"#)
        .await
        .unwrap();

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result, json!({"devices": [], "selected": null}));
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let (launcher, client) = manual_client();

    // Warm up so the next ids are "5" and "6"
    let first = spawn_send(&client, "power_state", vec![json!("d1")]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    let request = daemon.recv().await.unwrap();
    daemon.reply_ok(&request.id, json!({"on": true})).await.unwrap();
    first.await.unwrap().unwrap();
    for _ in 0..3 {
        round_trip(&client, &mut daemon).await;
    }

    let a = spawn_send(&client, "get_metadata", vec![json!("d1")]);
    let request_a = daemon.recv().await.unwrap();
    let b = spawn_send(&client, "get_artwork", vec![json!("d1")]);
    let request_b = daemon.recv().await.unwrap();
    assert_eq!(request_a.id, "5");
    assert_eq!(request_b.id, "6");

    daemon.send_line(r#"{"id":"6","result":{"artwork_path":null}}"#).await.unwrap();
    daemon.send_line(r#"{"id":"5","result":{"title":"Andor"}}"#).await.unwrap();

    assert_eq!(a.await.unwrap().unwrap(), json!({"title": "Andor"}));
    assert_eq!(b.await.unwrap().unwrap(), json!({"artwork_path": null}));
}

#[tokio::test]
async fn test_daemon_exit_fails_all_pending() {
    let (launcher, client) = manual_client();

    let warmup = spawn_send(&client, "power_state", vec![json!("d1")]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    let request = daemon.recv().await.unwrap();
    daemon.reply_ok(&request.id, json!({"on": true})).await.unwrap();
    warmup.await.unwrap().unwrap();
    for _ in 0..5 {
        round_trip(&client, &mut daemon).await;
    }

    let mut waiting = Vec::new();
    for _ in 0..3 {
        waiting.push(spawn_send(&client, "get_metadata", vec![json!("d1")]));
        daemon.recv().await.unwrap();
    }
    assert_eq!(client.supervisor().pending_ids().await, vec!["7", "8", "9"]);

    daemon.exit();

    for handle in waiting {
        assert!(matches!(handle.await.unwrap(), Err(RemoteError::DaemonExited)));
    }
    assert!(client.supervisor().pending_ids().await.is_empty());
}

#[tokio::test]
async fn test_malformed_and_stale_lines_are_skipped() {
    let (launcher, client) = manual_client();
    let pending = spawn_send(&client, "list_apps", vec![json!("d1")]);

    let mut daemon = launcher.next_daemon().await.unwrap();
    let request = daemon.recv().await.unwrap();

    daemon.send_line("this is not json").await.unwrap();
    daemon.send_line(r#"{"result":{"apps":[]}}"#).await.unwrap();
    daemon.send_line(r#"{"id":"99","result":{"apps":[]}}"#).await.unwrap();
    daemon.send_line("").await.unwrap();
    daemon
        .reply_ok(&request.id, json!({"apps": [{"name": "TV", "id": "com.apple.TVWatchList"}]}))
        .await
        .unwrap();

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result["apps"][0]["id"], "com.apple.TVWatchList");
    assert_eq!(client.supervisor().state().await, HandleState::Ready);
}

#[tokio::test]
async fn test_rpc_error_only_fails_its_caller() {
    let (launcher, client) = manual_client();
    let bad = spawn_send(&client, "launch_app", vec![json!("d1"), json!("com.example.Missing")]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    let bad_request = daemon.recv().await.unwrap();
    let good = spawn_send(&client, "home", vec![json!("d1")]);
    let good_request = daemon.recv().await.unwrap();

    daemon.reply_err(&bad_request.id, "App not installed").await.unwrap();
    daemon.reply_ok(&good_request.id, json!({"status": "ok"})).await.unwrap();

    let err = bad.await.unwrap().unwrap_err();
    assert!(matches!(err, RemoteError::Rpc(ref m) if m == "App not installed"));
    assert_eq!(good.await.unwrap().unwrap(), json!({"status": "ok"}));
}

#[tokio::test]
async fn test_restart_after_exit_resets_ids() {
    let (launcher, client) = manual_client();

    let first = spawn_send(&client, "list_devices", vec![]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    let request = daemon.recv().await.unwrap();
    daemon.reply_ok(&request.id, json!({"devices": []})).await.unwrap();
    first.await.unwrap().unwrap();
    round_trip(&client, &mut daemon).await;
    daemon.exit();

    let second = spawn_send(&client, "list_devices", vec![]);
    let mut restarted = launcher.next_daemon().await.unwrap();
    let request = restarted.recv().await.unwrap();
    assert_eq!(request.id, "1");
    restarted.reply_ok(&request.id, json!({"devices": []})).await.unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(client.supervisor().spawn_count(), 2);
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn test_write_failure_discards_pending_entry() {
    let (launcher, client) = manual_client();
    client.supervisor().ensure_running().await.unwrap();
    let mut daemon = launcher.next_daemon().await.unwrap();
    daemon.close_input();

    let err = client.send("home", vec![json!("d1")]).await.unwrap_err();
    assert!(err.is_transport());
    assert!(client.supervisor().pending_ids().await.is_empty());
}

#[tokio::test]
async fn test_spawn_failure_surfaces_to_sender() {
    let (launcher, client) = manual_client();
    launcher.set_failing(true);

    let err = client.send("list_devices", vec![]).await.unwrap_err();
    assert!(matches!(err, RemoteError::SpawnFailure(_)));

    // Next send tries again
    launcher.set_failing(false);
    let pending = spawn_send(&client, "list_devices", vec![]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    let request = daemon.recv().await.unwrap();
    daemon.reply_ok(&request.id, json!({"devices": []})).await.unwrap();
    pending.await.unwrap().unwrap();
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn test_shutdown_fails_pending_and_terminates() {
    let (launcher, client) = manual_client();
    let pending = spawn_send(&client, "scan_devices", vec![]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    daemon.recv().await.unwrap();

    client.shutdown().await;

    assert!(matches!(pending.await.unwrap(), Err(RemoteError::DaemonExited)));
    assert!(daemon.was_terminated());
    assert_eq!(client.supervisor().state().await, HandleState::Absent);
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_a_stalled_daemon() {
    let (launcher, client) = manual_client();

    // Larger than the pipe buffer, and the daemon never reads it
    let stalled = spawn_send(&client, "keyboard_set", vec![json!("d1"), json!("x".repeat(200 * 1024))]);
    let daemon = launcher.next_daemon().await.unwrap();
    let queued = spawn_send(&client, "home", vec![json!("d1")]);

    tokio::time::timeout(Duration::from_secs(2), async {
        while client.supervisor().pending_ids().await.len() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("both requests registered");

    let state = tokio::time::timeout(Duration::from_secs(1), client.supervisor().state())
        .await
        .expect("state() answers while a write is blocked");
    assert_eq!(state, HandleState::Ready);

    tokio::time::timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("shutdown finishes while a write is blocked");

    assert!(matches!(stalled.await.unwrap(), Err(RemoteError::DaemonExited)));
    assert!(matches!(queued.await.unwrap(), Err(RemoteError::DaemonExited)));
    assert!(daemon.was_terminated());
    assert_eq!(client.supervisor().state().await, HandleState::Absent);
}

#[tokio::test]
async fn test_exit_noticed_on_next_send_fails_old_requests() {
    let (launcher, client) = manual_client();
    let orphaned = spawn_send(&client, "get_metadata", vec![json!("d1")]);
    let mut daemon = launcher.next_daemon().await.unwrap();
    daemon.recv().await.unwrap();

    // Process gone, output not closed yet
    daemon.mark_exited();
    let retry = spawn_send(&client, "get_metadata", vec![json!("d1")]);

    assert!(matches!(orphaned.await.unwrap(), Err(RemoteError::DaemonExited)));

    let mut restarted = launcher.next_daemon().await.unwrap();
    let request = restarted.recv().await.unwrap();
    assert_eq!(request.id, "1");
    restarted.reply_ok(&request.id, json!({"title": "Andor"})).await.unwrap();

    assert_eq!(retry.await.unwrap().unwrap(), json!({"title": "Andor"}));
    assert!(daemon.was_terminated());
    assert_eq!(client.supervisor().spawn_count(), 2);
}

#[tokio::test]
async fn test_many_concurrent_callers() {
    let launcher = Arc::new(MockLauncher::serving(|request| {
        Some(Reply::Result(json!({"echo": request.args.first().cloned()})))
    }));
    let client = Arc::new(DaemonClient::new(launcher.clone()));

    let calls: Vec<_> = (0..25)
        .map(|n| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { (n, client.send("keyboard_set", vec![json!(format!("d{}", n))]).await) })
        })
        .collect();

    for call in futures::future::join_all(calls).await {
        let (n, result) = call.unwrap();
        assert_eq!(result.unwrap(), json!({"echo": format!("d{}", n)}));
    }
    assert_eq!(launcher.launch_count(), 1);
    assert_eq!(launcher.requests().len(), 25);
}

#[cfg(target_os = "linux")]
mod real_process {
    use super::*;
    use atv_remote::daemon::ProcessLauncher;

    /// `sed` turns every request line into a success reply with the same id.
    fn sed_daemon() -> DaemonClient {
        let launcher = ProcessLauncher::new("sed").with_args(vec![
            "-u".to_string(),
            r#"s/,"cmd".*$/,"result":{"ok":true}}/"#.to_string(),
        ]);
        DaemonClient::new(Arc::new(launcher))
    }

    #[tokio::test]
    async fn test_child_process_round_trip() {
        let client = sed_daemon();
        assert_eq!(client.send("list_devices", vec![]).await.unwrap(), json!({"ok": true}));
        assert_eq!(client.send("home", vec![json!("d1")]).await.unwrap(), json!({"ok": true}));
        assert_eq!(client.supervisor().spawn_count(), 1);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let client = DaemonClient::new(Arc::new(ProcessLauncher::new("/nonexistent/atv_daemon.py")));
        let err = client.send("list_devices", vec![]).await.unwrap_err();
        assert!(matches!(err, RemoteError::SpawnFailure(_)));
        assert_eq!(err.to_string().split(':').next(), Some("Failed to start daemon"));
    }

    #[tokio::test]
    async fn test_daemon_that_exits_immediately() {
        let client = DaemonClient::new(Arc::new(ProcessLauncher::new("true")));
        let err = client.send("list_devices", vec![]).await.unwrap_err();
        assert!(err.is_transport());
    }
}
