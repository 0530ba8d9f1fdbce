//! Spawning and supervising the game process
use crate::game::launcher::jpms::HiddenJars;
use crate::game::launcher::natives::cleanup_natives;
use crate::game::launcher::types::LaunchPlan;
use crate::utils::process::{command_line, AnvilCommandExt};
use crate::utils::redact::{redact_args, redact_text};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

/// Rotated copies kept next to the live log (`launcher.log.1` is the newest).
const KEPT_LOGS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// Receives (instance_id, line, stream) for every line the game prints.
pub type LogCallback = Arc<dyn Fn(&str, &str, LogStream) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub success: bool,
}

/// Things to undo once the game is gone, whatever its exit code.
#[derive(Debug, Default)]
pub struct ExitCleanup {
    pub natives_dir: Option<PathBuf>,
    pub hidden: Option<HiddenJars>,
}

impl ExitCleanup {
    async fn run(mut self, instance_id: &str) {
        if let Some(dir) = self.natives_dir.take() {
            cleanup_natives(&dir).await;
        }
        if let Some(mut hidden) = self.hidden.take() {
            if let Err(e) = hidden.restore() {
                log::warn!("[{}] {:#}", instance_id, e);
            }
        }
    }
}

/// Shifts `launcher.log` to `launcher.log.1` and so on, dropping the oldest.
pub fn rotate_logs(log_file: &Path, keep: usize) -> Result<()> {
    if !log_file.exists() {
        return Ok(());
    }
    let numbered = |n: usize| {
        let mut name = log_file.as_os_str().to_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    };
    if keep == 0 {
        return std::fs::remove_file(log_file).with_context(|| format!("Failed to remove {:?}", log_file));
    }
    let oldest = numbered(keep);
    if oldest.exists() {
        std::fs::remove_file(&oldest).with_context(|| format!("Failed to remove {:?}", oldest))?;
    }
    for n in (1..keep).rev() {
        let from = numbered(n);
        if from.exists() {
            std::fs::rename(&from, numbered(n + 1)).with_context(|| format!("Failed to rotate {:?}", from))?;
        }
    }
    std::fs::rename(log_file, numbered(1)).with_context(|| format!("Failed to rotate {:?}", log_file))?;
    Ok(())
}

/// Runs one game process: tees its output to the instance log, and cleans up
/// after it exits.
pub struct ProcessSupervisor {
    instance_id: String,
    log_file: PathBuf,
    callback: Option<LogCallback>,
    secrets: Vec<String>,
    cleanup: ExitCleanup,
}

impl ProcessSupervisor {
    pub fn new(instance_id: impl Into<String>, log_file: impl Into<PathBuf>) -> Self {
        Self {
            instance_id: instance_id.into(),
            log_file: log_file.into(),
            callback: None,
            secrets: Vec::new(),
            cleanup: ExitCleanup::default(),
        }
    }

    pub fn with_callback(mut self, callback: LogCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Values masked in the logged command line and in forwarded output.
    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_cleanup(mut self, cleanup: ExitCleanup) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Spawns a prepared plan; its natives directory and hidden jars are
    /// handed to the exit cleanup.
    pub async fn launch_plan(self, mut plan: LaunchPlan, detached: bool) -> Result<ChildHandle> {
        let mut args = Vec::with_capacity(plan.args.len() + 1);
        args.push(plan.java_path.to_string_lossy().to_string());
        args.append(&mut plan.args);
        let cleanup = ExitCleanup {
            natives_dir: Some(plan.natives_dir.clone()),
            hidden: plan.hidden.take(),
        };
        self.with_secrets(std::mem::take(&mut plan.secrets))
            .with_cleanup(cleanup)
            .launch(&args, &plan.cwd, detached)
            .await
    }

    /// `args[0]` is the executable. Output goes to the log file, the `log`
    /// facade under `[<instance>/<stream>]`, and the callback if any.
    pub async fn launch(self, args: &[String], cwd: &Path, detached: bool) -> Result<ChildHandle> {
        let ProcessSupervisor {
            instance_id,
            log_file,
            callback,
            secrets,
            cleanup,
        } = self;

        let spawned = spawn_child(&instance_id, &log_file, &secrets, args, cwd, detached).await;
        let (mut child, file) = match spawned {
            Ok(v) => v,
            Err(e) => {
                cleanup.run(&instance_id).await;
                return Err(e);
            }
        };
        let pid = child.id().unwrap_or_default();
        log::info!("[{}] Game process started with PID {}", instance_id, pid);

        let file = Arc::new(Mutex::new(file));
        let secrets = Arc::new(secrets);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(
                stdout,
                LogStream::Stdout,
                instance_id.clone(),
                file.clone(),
                callback.clone(),
                secrets.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(
                stderr,
                LogStream::Stderr,
                instance_id.clone(),
                file.clone(),
                callback.clone(),
                secrets.clone(),
            )));
        }

        let (tx, rx) = watch::channel(None);
        let monitor_id = instance_id.clone();
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => {
                    if status.success() {
                        log::info!("[{}] Game exited normally", monitor_id);
                    } else {
                        log::error!("[{}] Game exited with {}", monitor_id, status);
                    }
                    ExitInfo {
                        code: status.code(),
                        success: status.success(),
                    }
                }
                Err(e) => {
                    log::error!("[{}] Failed to wait for game process: {}", monitor_id, e);
                    ExitInfo {
                        code: None,
                        success: false,
                    }
                }
            };
            for reader in readers {
                let _ = reader.await;
            }
            if let Err(e) = file.lock().await.flush().await {
                log::warn!("[{}] Failed to flush game log: {}", monitor_id, e);
            }
            cleanup.run(&monitor_id).await;
            let _ = tx.send(Some(info));
        });

        Ok(ChildHandle {
            pid,
            instance_id,
            log_file,
            status: rx,
        })
    }
}

async fn spawn_child(
    instance_id: &str,
    log_file: &Path,
    secrets: &[String],
    args: &[String],
    cwd: &Path,
    detached: bool,
) -> Result<(tokio::process::Child, tokio::fs::File)> {
    let (program, rest) = args.split_first().context("Empty command line")?;
    if !cwd.is_dir() {
        tokio::fs::create_dir_all(cwd)
            .await
            .with_context(|| format!("Failed to create working directory {:?}", cwd))?;
    }
    if let Some(parent) = log_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }
    rotate_logs(log_file, KEPT_LOGS)?;
    let file = tokio::fs::File::create(log_file)
        .await
        .with_context(|| format!("Failed to create log file {:?}", log_file))?;

    let secret_refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
    log::info!(
        "[{}] Exec: {}",
        instance_id,
        command_line(program, &redact_args(rest, &secret_refs))
    );

    let mut command = tokio::process::Command::new(program);
    command
        .args(rest)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if detached {
        command.detach();
    } else {
        command.suppress_console();
    }
    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    Ok((child, file))
}

async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: LogStream,
    instance_id: String,
    file: Arc<Mutex<tokio::fs::File>>,
    callback: Option<LogCallback>,
    secrets: Arc<Vec<String>>,
) {
    let secret_refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
    let mut lines = tokio::io::BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => redact_text(&line, &secret_refs),
            Ok(None) => break,
            Err(e) => {
                log::warn!("[{}/{}] read error: {}", instance_id, stream.as_str(), e);
                break;
            }
        };
        {
            let mut f = file.lock().await;
            if let Err(e) = f.write_all(format!("{}\n", line).as_bytes()).await {
                log::warn!("[{}] Failed to write game log: {}", instance_id, e);
            }
        }
        match stream {
            LogStream::Stdout => log::info!("[{}/stdout] {}", instance_id, line),
            LogStream::Stderr => log::warn!("[{}/stderr] {}", instance_id, line),
        }
        if let Some(cb) = &callback {
            cb(&instance_id, &line, stream);
        }
    }
}

/// A running (or finished) game process.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    pid: u32,
    instance_id: String,
    log_file: PathBuf,
    status: watch::Receiver<Option<ExitInfo>>,
}

impl ChildHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Exit status once the process has exited and cleanup has run.
    pub fn try_status(&self) -> Option<ExitInfo> {
        *self.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.try_status().is_none()
    }

    /// Resolves after the process exits and its cleanup has finished.
    pub async fn wait(&self) -> Result<ExitInfo> {
        let mut rx = self.status.clone();
        loop {
            if let Some(info) = *rx.borrow_and_update() {
                return Ok(info);
            }
            rx.changed()
                .await
                .context("Process monitor stopped without an exit status")?;
        }
    }

    /// Asks the game to stop; `force` kills it outright.
    pub async fn kill(&self, force: bool) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        log::info!("[{}] Stopping PID {} (force: {})", self.instance_id, self.pid, force);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
            kill(Pid::from_raw(self.pid as i32), signal)
                .with_context(|| format!("Failed to send {:?} to {}", signal, self.pid))?;
        }

        #[cfg(windows)]
        {
            let pid = self.pid.to_string();
            let mut args = vec!["/PID", pid.as_str(), "/T"];
            if force {
                args.push("/F");
            }
            let output = tokio::process::Command::new("taskkill")
                .args(&args)
                .suppress_console()
                .output()
                .await
                .context("Failed to execute taskkill")?;
            if !output.status.success() {
                anyhow::bail!(
                    "Failed to kill process: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rotation_keeps_a_bounded_history() {
        let tmp = tempdir().unwrap();
        let log = tmp.path().join("launcher.log");
        for run in 0..5 {
            std::fs::write(&log, format!("run {}", run)).unwrap();
            rotate_logs(&log, 3).unwrap();
        }
        assert!(!log.exists());
        let read = |n: usize| std::fs::read_to_string(tmp.path().join(format!("launcher.log.{}", n))).unwrap();
        assert_eq!(read(1), "run 4");
        assert_eq!(read(3), "run 2");
        assert!(!tmp.path().join("launcher.log.4").exists());
    }

    #[tokio::test]
    async fn spawn_failure_still_cleans_up() {
        let tmp = tempdir().unwrap();
        let natives = tmp.path().join("natives/abc");
        std::fs::create_dir_all(&natives).unwrap();
        let result = ProcessSupervisor::new("inst", tmp.path().join("logs/launcher.log"))
            .with_cleanup(ExitCleanup {
                natives_dir: Some(natives.clone()),
                hidden: None,
            })
            .launch(
                &["/definitely/not/a/binary".to_string()],
                tmp.path(),
                false,
            )
            .await;
        assert!(result.is_err());
        assert!(!natives.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_logged_and_cleanup_runs_on_failure_exit() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tmp = tempdir().unwrap();
        let natives = tmp.path().join("natives/abc");
        std::fs::create_dir_all(&natives).unwrap();
        let log_file = tmp.path().join("logs/launcher.log");
        std::fs::create_dir_all(log_file.parent().unwrap()).unwrap();
        std::fs::write(&log_file, "previous run").unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: LogCallback = Arc::new(move |id, line, stream| {
            sink.lock()
                .unwrap()
                .push(format!("{}:{}:{}", id, stream.as_str(), line));
        });

        let args: Vec<String> = vec![
            "/bin/sh".into(),
            "-c".into(),
            "echo hello; echo token=hunter2-secret 1>&2; exit 3".into(),
        ];
        let handle = ProcessSupervisor::new("inst", &log_file)
            .with_callback(callback)
            .with_secrets(vec!["hunter2-secret".into()])
            .with_cleanup(ExitCleanup {
                natives_dir: Some(natives.clone()),
                hidden: None,
            })
            .launch(&args, tmp.path(), false)
            .await
            .unwrap();

        let exit = handle.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
        assert!(!handle.is_running());
        assert!(!natives.exists());

        let text = std::fs::read_to_string(&log_file).unwrap();
        assert!(text.contains("hello"));
        assert!(!text.contains("hunter2-secret"));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("logs/launcher.log.1")).unwrap(),
            "previous run"
        );

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&"inst:stdout:hello".to_string()));
        assert!(seen.iter().any(|l| l.starts_with("inst:stderr:token=")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_stops_a_running_game() {
        let tmp = tempdir().unwrap();
        let args: Vec<String> = vec!["/bin/sh".into(), "-c".into(), "exec sleep 30".into()];
        let handle = ProcessSupervisor::new("inst", tmp.path().join("launcher.log"))
            .launch(&args, tmp.path(), false)
            .await
            .unwrap();
        assert!(handle.is_running());
        handle.kill(true).await.unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(10), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.code, None);
    }
}
