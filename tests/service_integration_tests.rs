//! Integration tests for the process runner and the launcher's job control
//!
//! The launcher tests drive real workflows against a scripted tool runner so
//! that no extractor, glewinfo or df binary is needed.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use launcher_core::models::{GameId, JobStatus, LauncherConfig, Settings, StepStatus};
use launcher_core::services::{Invocation, OutputEvent, OutputSink, ProcessError, ProcessOutcome};
use launcher_core::{
    JobEvent, JobKind, Launcher, LauncherError, Metrics, ProcessRunner, SettingsStore, ToolRunner,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::process::Child;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Duration, Instant, timeout};

/// Tool runner that answers from a script instead of spawning processes
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    opengl_ok: bool,
    /// When set, extractor runs wait for a notification before finishing
    hold_extractor: Option<Arc<Notify>>,
}

impl ScriptedRunner {
    fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.program.file_name().unwrap_or_default().to_string())
            .collect()
    }
}

fn outcome(code: i32, stdout: &str) -> ProcessOutcome {
    ProcessOutcome {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration: Duration::ZERO,
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: Invocation,
        sink: Option<OutputSink>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let program = invocation.program.file_name().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(invocation);

        match program.as_str() {
            "glewinfo" => Ok(outcome(if self.opengl_ok { 0 } else { 1 }, "")),
            "df" => Ok(outcome(
                0,
                "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 1 1 999999999 1% /\n",
            )),
            "extractor" | "extractor.exe" => {
                if let Some(hold) = &self.hold_extractor {
                    hold.notified().await;
                }
                if let Some(sink) = sink {
                    let _ = sink.send(OutputEvent::Stdout("[extractor] done".to_string())).await;
                    let _ = sink.send(OutputEvent::Exited(Some(0))).await;
                }
                Ok(outcome(0, "[extractor] done\n"))
            }
            _ => Ok(outcome(0, "")),
        }
    }

    fn spawn_detached(&self, invocation: Invocation) -> Result<Child, ProcessError> {
        Err(ProcessError::Spawn {
            program: invocation.program.to_string(),
            source: std::io::Error::other("detached launches are not scripted"),
        })
    }
}

struct Harness {
    _temp: TempDir,
    root: Utf8PathBuf,
    launcher: Launcher,
    runner: Arc<ScriptedRunner>,
}

fn harness(runner: ScriptedRunner) -> Harness {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();

    let install = root.join("install");
    let data = install.join("versions/official/v0.2.1/data/goal_src");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("game.gp"), "(project)").unwrap();

    let settings = SettingsStore::with_settings(
        root.join("settings.json"),
        Duration::from_secs(60),
        Settings {
            installation_dir: Some(install),
            active_version: Some("v0.2.1".to_string()),
            active_version_folder: Some("official".to_string()),
            ..Default::default()
        },
    );
    let config = LauncherConfig {
        data_dir: root.clone(),
        log_dir: root.join("logs"),
        ..Default::default()
    };

    let runner = Arc::new(runner);
    let launcher = Launcher::with_parts(config, settings, runner.clone(), Arc::new(Metrics::new()));
    Harness {
        _temp: temp,
        root,
        launcher,
        runner,
    }
}

fn install_job(iso: Utf8PathBuf) -> JobKind {
    JobKind::Install {
        game_name: GameId::Jak1,
        path_to_iso: iso,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_runner_streams_output_then_exit() {
    let runner = ProcessRunner::new();
    let (tx, mut rx) = mpsc::channel(64);

    let result = runner
        .run(
            Invocation::new("sh").args(["-c", "echo building; echo 'bad input' >&2; exit 3"]),
            Some(tx),
        )
        .await
        .unwrap();

    assert_eq!(result.exit_code, Some(3));
    assert!(!result.success());
    assert_eq!(result.last_error_line(), Some("bad input"));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(events.contains(&OutputEvent::Stdout("building".to_string())));
    assert!(events.contains(&OutputEvent::Stderr("bad input".to_string())));
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, OutputEvent::Exited(_) | OutputEvent::TimedOut(_)))
        .collect();
    assert_eq!(terminal, vec![&OutputEvent::Exited(Some(3))]);
    assert_eq!(events.last(), Some(&OutputEvent::Exited(Some(3))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_runner_keeps_reading_after_invalid_utf8() {
    // Enough output after the bad line to fill the pipe if nobody drains it
    let script = r#"printf 'caf\351\n'; i=0; while [ $i -lt 20000 ]; do echo "line $i"; i=$((i+1)); done; echo LAST"#;
    let result = ProcessRunner::new()
        .run(
            Invocation::new("sh")
                .args(["-c", script])
                .timeout(Duration::from_secs(20)),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.starts_with("caf\u{FFFD}\n"));
    assert!(result.stdout.contains("line 19999\n"));
    assert!(result.stdout.ends_with("LAST\n"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_runner_kills_on_timeout() {
    let runner = ProcessRunner::new();
    let (tx, mut rx) = mpsc::channel(64);
    let started = Instant::now();

    let result = runner
        .run(
            Invocation::new("sh")
                .args(["-c", "echo started; exec sleep 5"])
                .timeout(Duration::from_millis(300)),
            Some(tx),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    match result {
        Err(ProcessError::Timeout { stdout, after, .. }) => {
            assert_eq!(after, Duration::from_millis(300));
            assert!(stdout.contains("started"));
        }
        other => panic!("Expected timeout, got {:?}", other),
    }

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert_eq!(last, Some(OutputEvent::TimedOut(Duration::from_millis(300))));
}

#[tokio::test]
async fn test_process_runner_reports_missing_program() {
    let runner = ProcessRunner::new();
    let result = runner
        .run(Invocation::new("/definitely/not/a/real/tool"), None)
        .await;
    assert!(matches!(result, Err(ProcessError::Spawn { .. })));
}

#[tokio::test]
async fn test_requirement_gate_blocks_install() {
    let h = harness(ScriptedRunner::default());
    let iso = h.root.join("game.iso");
    std::fs::write(&iso, "iso").unwrap();

    let result = h.launcher.start_job(install_job(iso)).await;

    match result {
        Err(LauncherError::RequirementUnmet(blocking)) => {
            assert!(blocking.contains(&"opengl".to_string()));
        }
        other => panic!("Expected requirement failure, got {:?}", other),
    }
    assert_eq!(h.launcher.tracker().status(), JobStatus::Inactive);
    assert!(h.launcher.tracker().snapshot().steps.is_empty());
    assert!(!h.runner.programs().iter().any(|p| p.starts_with("extractor")));
}

#[tokio::test]
async fn test_bypass_skips_requirement_gate() {
    let h = harness(ScriptedRunner::default());
    h.launcher.settings().update(|s| s.bypass_requirements = true);
    let iso = h.root.join("game.iso");
    std::fs::write(&iso, "iso").unwrap();

    let snapshot = h.launcher.run_job(install_job(iso)).await.unwrap();

    assert_eq!(snapshot.overall_status, JobStatus::Success, "{:?}", snapshot);
    assert!(snapshot.steps.iter().all(|s| s.status == StepStatus::Success));
    assert!(h.launcher.settings().is_game_installed(GameId::Jak1));
    assert_eq!(
        h.launcher.settings().installed_version(GameId::Jak1).as_deref(),
        Some("v0.2.1")
    );

    let programs = h.runner.programs();
    assert!(!programs.contains(&"glewinfo".to_string()));
    // extract, decompile, compile
    assert_eq!(programs.iter().filter(|p| p.starts_with("extractor")).count(), 3);
}

#[tokio::test]
async fn test_ungated_jobs_ignore_requirements() {
    let h = harness(ScriptedRunner::default());

    let snapshot = h
        .launcher
        .run_job(JobKind::Compile {
            game_name: GameId::Jak1,
        })
        .await
        .unwrap();

    assert_eq!(snapshot.overall_status, JobStatus::Success);
    assert!(!h.runner.programs().contains(&"glewinfo".to_string()));
}

#[tokio::test]
async fn test_only_one_job_runs_at_a_time() {
    let hold = Arc::new(Notify::new());
    let h = harness(ScriptedRunner {
        hold_extractor: Some(hold.clone()),
        ..Default::default()
    });
    let compile = JobKind::Compile {
        game_name: GameId::Jak2,
    };

    h.launcher.start_job(compile.clone()).await.unwrap();
    assert!(matches!(
        h.launcher.start_job(compile.clone()).await,
        Err(LauncherError::JobAlreadyRunning)
    ));
    assert!(matches!(
        h.launcher.clear_job().await,
        Err(LauncherError::JobAlreadyRunning)
    ));

    // Wait until the compile step is parked in the runner
    timeout(Duration::from_secs(2), async {
        while !h.runner.programs().iter().any(|p| p.starts_with("extractor")) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Compile step never started");
    hold.notify_one();

    let snapshot = timeout(Duration::from_secs(2), h.launcher.wait_for_job())
        .await
        .expect("Job did not finish")
        .expect("No job was running");
    assert_eq!(snapshot.overall_status, JobStatus::Success);

    h.launcher.clear_job().await.unwrap();
    assert_eq!(h.launcher.tracker().status(), JobStatus::Inactive);
    h.launcher.start_job(compile).await.unwrap();
}

#[tokio::test]
async fn test_tool_output_reaches_job_logs() {
    let h = harness(ScriptedRunner::default());
    let mut events = h.launcher.tracker().subscribe();

    let snapshot = h
        .launcher
        .run_job(JobKind::Compile {
            game_name: GameId::Jak1,
        })
        .await
        .unwrap();

    assert_eq!(snapshot.overall_status, JobStatus::Success);
    assert!(snapshot.logs.contains(&"[extractor] done".to_string()));
    assert!(h.root.join("logs/extractor.0.log").exists());

    // The line is logged while the compile step is still running
    let mut logged = false;
    while let Ok(event) = events.try_recv() {
        match event {
            JobEvent::LogsAppended { lines } if lines.contains(&"[extractor] done".to_string()) => {
                logged = true;
            }
            JobEvent::StepFinished { label, .. } if label == "setup.compile" => {
                assert!(logged, "Step finished before its output was logged");
            }
            _ => {}
        }
    }
    assert!(logged);
}

#[tokio::test]
async fn test_waiting_does_not_release_the_job_slot() {
    let hold = Arc::new(Notify::new());
    let h = harness(ScriptedRunner {
        hold_extractor: Some(hold.clone()),
        ..Default::default()
    });
    let compile = JobKind::Compile {
        game_name: GameId::Jak2,
    };
    h.launcher.start_job(compile.clone()).await.unwrap();

    // A waiter that gives up must leave the running job registered
    assert!(
        timeout(Duration::from_millis(50), h.launcher.wait_for_job())
            .await
            .is_err()
    );
    assert!(matches!(
        h.launcher.start_job(compile.clone()).await,
        Err(LauncherError::JobAlreadyRunning)
    ));

    // Two waiters both see the final state
    let (first, second, ()) = tokio::join!(
        h.launcher.wait_for_job(),
        h.launcher.wait_for_job(),
        async {
            while !h.runner.programs().iter().any(|p| p.starts_with("extractor")) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            hold.notify_one();
        }
    );
    assert_eq!(first.unwrap().overall_status, JobStatus::Success);
    assert_eq!(second.unwrap().overall_status, JobStatus::Success);
}

#[tokio::test]
async fn test_mod_names_cannot_escape_the_mods_directory() {
    let h = harness(ScriptedRunner::default());
    h.launcher.settings().update(|s| s.bypass_requirements = true);

    let result = h
        .launcher
        .start_job(JobKind::InstallMod {
            game_name: GameId::Jak1,
            source_name: "community".to_string(),
            mod_name: "../../../active".to_string(),
            version_name: "1.0.0".to_string(),
            asset_url: "http://127.0.0.1:9/mod.zip".to_string(),
            path_to_iso: None,
        })
        .await;

    assert!(matches!(result, Err(LauncherError::InvalidName { .. })));
    assert_eq!(h.launcher.tracker().status(), JobStatus::Inactive);
    assert!(h.runner.programs().is_empty());
}

#[tokio::test]
async fn test_missing_install_dir_is_not_configured() {
    let h = harness(ScriptedRunner::default());
    h.launcher.settings().update(|s| s.installation_dir = None);

    let result = h
        .launcher
        .start_job(JobKind::Decompile {
            game_name: GameId::Jak3,
        })
        .await;

    assert!(matches!(result, Err(LauncherError::NotConfigured(_))));
    assert_eq!(h.launcher.tracker().status(), JobStatus::Inactive);
}
