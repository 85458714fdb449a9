// tests/cli_supervise.rs
use ainews_pipeline::supervisor::snapshot;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    done()
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let cfg = format!(
        "[paths]\n\
         data_dir = \"{d}/data\"\n\
         log_dir = \"{d}/logs\"\n\
         pid_file = \"{d}/logs/orchestrator.pid\"\n\
         \n\
         [store]\n\
         url = \"memory:\"\n\
         \n\
         [supervisor]\n\
         tick_ms = 50\n\
         \n\
         [schedule.heartbeat]\n\
         interval = \"1h\"\n\
         command = [\"true\"]\n",
        d = dir.display()
    );
    let path = dir.join("ainews.toml");
    fs::write(&path, cfg).unwrap();
    path
}

#[test]
fn sigterm_stops_supervise_and_removes_pid_file() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let pid_file = tmp.path().join("logs/orchestrator.pid");
    let state_file = snapshot::snapshot_path(&pid_file);

    let mut child = Command::new(env!("CARGO_BIN_EXE_ainews"))
        .arg("--config")
        .arg(&config)
        .arg("supervise")
        .current_dir(tmp.path())
        .env_remove("AINEWS_CONFIG")
        .env_remove("AINEWS_STORE_URL")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id();

    let started = wait_until(Duration::from_secs(10), || {
        fs::read_to_string(&pid_file).is_ok_and(|s| s.trim() == pid.to_string())
    });
    if !started {
        let _ = child.kill();
        panic!("supervise never wrote {}", pid_file.display());
    }
    // the heartbeat task runs on the first tick
    assert!(wait_until(Duration::from_secs(5), || {
        snapshot::read(&state_file).is_some_and(|s| s.tasks.iter().any(|t| t.runs == 1))
    }));

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).unwrap();
    let mut status = None;
    assert!(wait_until(Duration::from_secs(10), || {
        status = child.try_wait().unwrap();
        status.is_some()
    }));

    assert!(status.unwrap().success(), "exit status {status:?}");
    assert!(!pid_file.exists());
    let snap = snapshot::read(&state_file).unwrap();
    assert_eq!(snap.pid, pid);
    assert_eq!(snap.tasks[0].task_name, "heartbeat");
}
