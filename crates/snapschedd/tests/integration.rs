//! Integration tests for snapschedd
//!
//! These tests verify the end-to-end behavior of the daemon over real
//! directories and a real socket.

use chrono::{TimeZone, Utc};
use snapsched_api::{Command, ErrorCode, ResponsePayload, ResponseResult, API_VERSION};
use snapsched_config::{parse_config, Settings};
use snapsched_core::SnapScheduler;
use snapsched_ipc::IpcClient;
use snapsched_store::DB_OBJECT_NAME;
use snapsched_util::FsName;
use snapschedd::{build_connector, handle_command, Service};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;

fn make_settings(dir: &Path) -> Settings {
    let root = dir.join("fs");
    std::fs::create_dir_all(root.join("vol")).unwrap();

    let config = format!(
        r#"
config_version = 1
default_fs = "local"

[daemon]
socket_path = "{socket}"
data_dir = "{data}"

[scheduler]
max_consecutive_failures = 2

[[filesystems]]
name = "local"
root = "{root}"
"#,
        socket = dir.join("snapschedd.sock").display(),
        data = dir.join("data").display(),
        root = root.display(),
    );

    parse_config(&config).unwrap()
}

fn add(path: &str, schedule: &str, retention: Option<&str>) -> Command {
    Command::AddSchedule {
        path: path.into(),
        schedule: schedule.into(),
        retention: retention.map(Into::into),
        start: Some("2024-01-01T00:00:00".into()),
        fs: None,
        subvol: None,
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start_service(settings: Settings) -> Running {
    let service = Service::new(settings, None).await.unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(service.run(async move {
        let _ = rx.await;
    }));
    Running { shutdown, task }
}

impl Running {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_commands_over_socket() {
    let dir = TempDir::new().unwrap();
    let settings = make_settings(dir.path());
    let socket = settings.daemon.socket_path.clone();
    let running = start_service(settings).await;

    let mut client = IpcClient::connect(&socket).await.unwrap();

    let response = client.send(Command::Ping).await.unwrap();
    assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));

    let response = client.send(add("/vol", "1h", Some("24h7d"))).await.unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::ScheduleAdded)
    ));

    let response = client
        .send(Command::ListSchedules {
            path: "/".into(),
            recursive: true,
            fs: None,
        })
        .await
        .unwrap();
    match response.result {
        ResponseResult::Ok(ResponsePayload::Schedules { schedules }) => {
            assert_eq!(schedules.len(), 1);
            assert_eq!(schedules[0].schedule.to_string(), "1h");
            assert_eq!(schedules[0].retention.to_string(), "24h7d");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let response = client.send(Command::GetStatus).await.unwrap();
    match response.result {
        ResponseResult::Ok(ResponsePayload::Status { filesystems }) => {
            assert_eq!(filesystems.len(), 1);
            assert_eq!(filesystems[0].fs, FsName::new("local"));
            assert_eq!(filesystems[0].next.as_ref().unwrap().path, "/vol");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let response = client.send(add("/vol", "60m", None)).await.unwrap();
    match response.result {
        ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::DuplicateRule),
        other => panic!("unexpected result: {:?}", other),
    }

    let response = client
        .send(Command::RemoveSchedule {
            path: "/vol".into(),
            schedule: None,
            start: None,
            fs: None,
        })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::ScheduleRemoved { removed: 1 })
    ));

    running.stop().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_schedules_survive_restart() {
    let dir = TempDir::new().unwrap();
    let settings = make_settings(dir.path());
    let socket = settings.daemon.socket_path.clone();
    let metadata_dir = settings.filesystems[0].metadata_dir.clone();

    let running = start_service(settings.clone()).await;
    let mut client = IpcClient::connect(&socket).await.unwrap();
    client.send(add("/vol", "1d", Some("7d"))).await.unwrap();
    drop(client);
    running.stop().await;

    assert!(metadata_dir.join(DB_OBJECT_NAME).exists());

    let running = start_service(settings).await;
    let mut client = IpcClient::connect(&socket).await.unwrap();
    let response = client
        .send(Command::GetSchedule {
            path: "/vol".into(),
            fs: None,
        })
        .await
        .unwrap();
    match response.result {
        ResponseResult::Ok(ResponsePayload::Details { details }) => {
            assert_eq!(details.len(), 1);
            assert!(details[0].active);
            assert_eq!(details[0].retention.to_string(), "7d");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    running.stop().await;
}

#[tokio::test]
async fn test_firing_on_local_directories() {
    let dir = TempDir::new().unwrap();
    let settings = make_settings(dir.path());
    let root = settings.filesystems[0].root.clone();
    let connector = build_connector(&settings).unwrap();
    let scheduler = SnapScheduler::new(Arc::new(connector), settings.scheduler.clone());

    scheduler
        .add_schedule(
            "/vol",
            "1m",
            Some("2M"),
            Some("2024-01-01T00:00:00"),
            None,
            None,
        )
        .unwrap();
    let local = FsName::new("local");
    let wakeup = scheduler.next_wakeup(&local).unwrap();

    for minute in 1..=4 {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap();
        assert!(scheduler.fire_at(wakeup.clone(), at).created());
    }

    let mut names: Vec<String> = std::fs::read_dir(root.join("vol/.snap"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "scheduled-2024-01-01-00_03_00".to_string(),
            "scheduled-2024-01-01-00_04_00".to_string(),
        ]
    );

    let details = scheduler.get_schedule("/vol", None).unwrap();
    assert_eq!(details[0].created_count, 4);
    assert_eq!(details[0].pruned_count, 2);
}

#[tokio::test]
async fn test_missing_directory_deactivates_path() {
    let dir = TempDir::new().unwrap();
    let settings = make_settings(dir.path());
    let connector = build_connector(&settings).unwrap();
    let scheduler = SnapScheduler::new(Arc::new(connector), settings.scheduler.clone());

    scheduler
        .add_schedule("/missing", "1h", None, Some("2024-01-01"), None, None)
        .unwrap();
    let local = FsName::new("local");
    let wakeup = scheduler.next_wakeup(&local).unwrap();

    let first = scheduler.fire_at(wakeup.clone(), Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
    assert!(!first.created());
    assert!(!first.deactivated);

    let second = scheduler.fire_at(wakeup, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
    assert!(second.deactivated);
    assert!(scheduler.next_wakeup(&local).is_none());
}

#[tokio::test]
async fn test_corrupt_database_is_reported() {
    let dir = TempDir::new().unwrap();
    let settings = make_settings(dir.path());
    let metadata_dir = settings.filesystems[0].metadata_dir.clone();
    std::fs::create_dir_all(&metadata_dir).unwrap();
    std::fs::write(metadata_dir.join(DB_OBJECT_NAME), "CREATE TABLE half(").unwrap();

    let connector = build_connector(&settings).unwrap();
    let scheduler = SnapScheduler::new(Arc::new(connector), settings.scheduler.clone());
    assert_eq!(scheduler.load_all(), 0);

    let response = handle_command(
        &scheduler,
        1,
        API_VERSION,
        Command::ListSchedules {
            path: "/".into(),
            recursive: true,
            fs: None,
        },
    );
    match response.result {
        ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::FatalCorruption),
        other => panic!("unexpected result: {:?}", other),
    }

    // The blob is left untouched for repair
    assert_eq!(
        std::fs::read_to_string(metadata_dir.join(DB_OBJECT_NAME)).unwrap(),
        "CREATE TABLE half("
    );
}
