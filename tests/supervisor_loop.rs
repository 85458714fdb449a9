// tests/supervisor_loop.rs
use ainews_pipeline::config::{ScheduleEntry, SupervisorSettings};
use ainews_pipeline::supervisor::{logs, snapshot};
use ainews_pipeline::supervisor::{PidFile, ServiceStatus, StopOutcome, TaskState};
use ainews_pipeline::Supervisor;
use std::time::{Duration, Instant};

fn entry(name: &str, script: &str, interval_secs: u64) -> ScheduleEntry {
    ScheduleEntry {
        task_name: name.into(),
        interval: Duration::from_secs(interval_secs),
        enabled: true,
        command: vec!["sh".into(), "-c".into(), script.into()],
    }
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        tick_ms: 50,
        stop_grace_secs: 1,
        ..SupervisorSettings::default()
    }
}

#[tokio::test]
async fn long_running_worker_is_not_spawned_twice() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = Supervisor::new(vec![entry("slow", "sleep 5", 60)], settings(), tmp.path());

    let now = Instant::now();
    sup.tick(now);
    let first = sup.status()[0].clone();
    assert_eq!(first.state, TaskState::Running);

    // next interval elapses while the first run is still alive
    sup.tick(now + Duration::from_secs(61));
    let second = sup.status()[0].clone();
    assert_eq!(second.runs, 1);
    assert_eq!(second.pid, first.pid);

    // the orphaned `sleep 5` exits on its own
}

#[tokio::test]
async fn monitor_kills_stale_worker_past_the_ceiling() {
    let tmp = tempfile::tempdir().unwrap();
    let s = SupervisorSettings {
        stale_log_secs: 0,
        max_runtime_secs: 0,
        ..settings()
    };
    let mut sup = Supervisor::new(vec![entry("hung", "sleep 30", 60)], s, tmp.path());
    sup.tick(Instant::now());
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    sup.monitor().await;
    let st = &sup.status()[0];
    assert_eq!(st.state, TaskState::Idle);
    assert_eq!(st.pid, None);
    assert_eq!(st.runs, 1);
}

#[tokio::test]
async fn run_loop_owns_the_pid_file_and_runs_tasks_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("logs");
    let pid_path = tmp.path().join("orchestrator.pid");
    let sup = Supervisor::new(vec![entry("quick", "echo ran", 3600)], settings(), &log_dir)
        .with_pid_file(PidFile::new(&pid_path));

    let reader = PidFile::new(&pid_path);
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(reader.read(), Some(std::process::id()));
    };
    sup.run(shutdown).await.unwrap();

    assert!(!pid_path.exists());
    let runs = logs::task_logs(&log_dir, "quick");
    assert_eq!(runs.len(), 1);

    // the task snapshot outlives the pid file for a later `status`
    let snap = snapshot::read(&snapshot::snapshot_path(&pid_path)).unwrap();
    assert_eq!(snap.tasks[0].task_name, "quick");
    assert_eq!(snap.tasks[0].runs, 1);
}

#[tokio::test]
async fn pid_file_status_and_stop() {
    let tmp = tempfile::tempdir().unwrap();
    let pf = PidFile::new(tmp.path().join("svc.pid"));
    assert_eq!(pf.status(), ServiceStatus::Stopped);

    let child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id().unwrap();
    pf.write(pid).unwrap();
    assert_eq!(pf.status(), ServiceStatus::Running { pid });

    // reap in the background so the pid does not linger as a zombie
    let reaper = tokio::spawn(async move {
        let mut child = child;
        let _ = child.wait().await;
    });
    let out = pf.stop(Duration::from_secs(2)).await;
    assert_eq!(out, StopOutcome::Terminated { pid });
    assert!(pf.read().is_none());
    reaper.await.unwrap();
}
