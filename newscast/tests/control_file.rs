mod common;

use std::sync::Arc;
use std::time::Duration;

use newscast::control::{CONTROL_FILE_NAME, ControlWatcher, STATUS_FILE_NAME};
use newscast::domain::StreamState;
use newscast::store::MemoryItemStore;

use common::{
    FakeGenerator, Script, ScriptedEncoder, approved_item, channel_config, fast_settings, manager,
};

#[tokio::test]
async fn test_control_file_drives_channels() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(
        Arc::new(MemoryItemStore::with_items([approved_item(1, 1)])),
        FakeGenerator::new(),
        ScriptedEncoder::always(Script::Hang),
        fast_settings(3),
        channel_config(),
    );
    let watcher = ControlWatcher::new(manager.clone(), dir.path());
    let control = dir.path().join(CONTROL_FILE_NAME);

    // Nothing to do without a control file.
    watcher.poll_once().await.unwrap();
    assert_eq!(manager.status(1).state, StreamState::Stopped);

    std::fs::write(&control, "start\n").unwrap();
    watcher.poll_once().await.unwrap();
    assert!(!control.exists(), "control file is consumed");
    assert!(manager.status(1).state.is_active());

    let status: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(STATUS_FILE_NAME)).unwrap()).unwrap();
    assert_eq!(status["channels"][0]["channel_id"], 1);
    assert!(status["updated_at"].is_string());

    std::fs::write(&control, "# comment\nbogus\nstop 1\n").unwrap();
    watcher.poll_once().await.unwrap();
    assert_eq!(manager.status(1).state, StreamState::Stopped);

    let status: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(STATUS_FILE_NAME)).unwrap()).unwrap();
    assert_eq!(status["channels"][0]["state"], "stopped");
}

#[tokio::test]
async fn test_watcher_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(
        Arc::new(MemoryItemStore::new()),
        FakeGenerator::new(),
        ScriptedEncoder::always(Script::Hang),
        fast_settings(3),
        channel_config(),
    );
    let watcher =
        ControlWatcher::new(manager.clone(), dir.path()).with_interval(Duration::from_millis(10));
    let status_path = watcher.status_path().to_path_buf();
    let cancel = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(watcher.run(cancel.clone()));

    std::fs::write(dir.path().join(CONTROL_FILE_NAME), "restart 4").unwrap();
    assert!(
        common::eventually(Duration::from_secs(5), || manager.get(4).is_some()).await,
        "restart creates and starts the channel"
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(status_path.exists());
    manager.shutdown(Duration::from_secs(2)).await;
}
