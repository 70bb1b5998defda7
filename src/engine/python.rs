use super::{docling, Engine, EngineDiag, EngineSession};
use crate::{
    config::Config, document::StructuredDocument, error::EngineError, models::ModelCache,
    util::expand_tilde,
};
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Output, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const WORKER_SCRIPT: &str = "docling_worker.py";
const STDERR_TAIL_LINES: usize = 40;

pub struct PythonEngine {
    launcher: Launcher,
    doctor_timeout: Duration,
}

/// Everything needed to (re)start a worker process.
#[derive(Clone)]
struct Launcher {
    python_exe: PathBuf,
    script: PathBuf,
    env: Vec<(String, String)>,
    models_dir: PathBuf,
    offline: bool,
    load_timeout: Duration,
    convert_timeout: Duration,
    keep_stderr: bool,
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    document: Option<serde_json::Value>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    load_seconds: Option<f64>,
}

impl PythonEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = expand_tilde(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        let script = scripts_dir.join(WORKER_SCRIPT);
        if !script.exists() {
            return Err(anyhow!("missing script: {}", script.display()));
        }

        let cache = ModelCache::resolve(cfg)?;
        let mut env = cache.env_vars();
        env.extend(cfg.engine.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(Self {
            launcher: Launcher {
                python_exe: resolve_python_exe(&cfg.engine.python_exe),
                script,
                env,
                models_dir: cache.dir().to_path_buf(),
                offline: cache.offline(),
                load_timeout: secs(cfg.engine.load_timeout_seconds),
                convert_timeout: secs(cfg.engine.convert_timeout_seconds),
                keep_stderr: cfg.debug.keep_python_stderr,
            },
            doctor_timeout: secs(cfg.engine.doctor_timeout_seconds),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.launcher.models_dir
    }
}

/// Zero means unbounded.
fn secs(n: u64) -> Duration {
    if n == 0 {
        Duration::MAX
    } else {
        Duration::from_secs(n)
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("DOCLING_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        let venv = PathBuf::from(".venv").join("bin").join("python");
        if venv.exists() {
            return venv;
        }
        return PathBuf::from(if cfg!(windows) { "python" } else { "python3" });
    }
    expand_tilde(raw)
}

impl Launcher {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.script);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.env("PYTHONIOENCODING", "utf-8");
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    fn spawn(&self) -> Result<Worker> {
        debug!(
            "spawning worker {} {}",
            self.python_exe.display(),
            self.script.display()
        );
        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("spawning python: {}", self.python_exe.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("no stderr"))?;

        let (line_tx, lines) = unbounded();
        std::thread::Builder::new()
            .name("docling-stdout".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let done = line.is_err();
                    if line_tx.send(line).is_err() || done {
                        break;
                    }
                }
            })
            .with_context(|| "spawn stdout reader")?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail = Arc::clone(&stderr_tail);
        let keep = self.keep_stderr;
        std::thread::Builder::new()
            .name("docling-stderr".into())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    if keep {
                        debug!("python stderr: {}", line.trim_end());
                    }
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
            .with_context(|| "spawn stderr reader")?;

        Ok(Worker {
            child,
            stdin,
            lines,
            stderr_tail,
        })
    }

    /// Starts a worker and has it construct the converter (downloading models if needed).
    fn start(&self) -> Result<Worker> {
        let mut worker = self.spawn()?;
        let started = Instant::now();
        let reply = match worker.request(&serde_json::json!({"cmd": "load"}), self.load_timeout) {
            Ok(reply) => reply,
            Err(err) if err.downcast_ref::<Timeout>().is_some() => {
                return Err(EngineError::Timeout(self.load_timeout.as_secs()).into());
            }
            Err(err) => return Err(err),
        };
        if !reply.ok {
            bail!(
                "docling load failed: {}",
                reply.error.unwrap_or_else(|| "unknown error".into())
            );
        }
        info!(
            "docling worker ready pid={} models={} offline={} load={:.1}s elapsed={:?}",
            worker.child.id(),
            self.models_dir.display(),
            self.offline,
            reply.load_seconds.unwrap_or_default(),
            started.elapsed()
        );
        Ok(worker)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("python worker did not answer within {0:?}")]
struct Timeout(Duration);

struct Worker {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<std::io::Result<String>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl Worker {
    fn request(&mut self, req: &serde_json::Value, timeout: Duration) -> Result<WorkerReply> {
        let mut line = serde_json::to_vec(req)?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .and_then(|_| self.stdin.flush())
            .map_err(|err| anyhow!("writing to python worker: {err}; {}", self.stderr_summary()))?;

        let deadline = Instant::now().checked_add(timeout);
        loop {
            let next = match deadline {
                Some(d) => self
                    .lines
                    .recv_timeout(d.saturating_duration_since(Instant::now())),
                None => self.lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let raw = match next {
                Ok(line) => line.with_context(|| "reading python worker stdout")?,
                Err(RecvTimeoutError::Timeout) => return Err(Timeout(timeout).into()),
                Err(RecvTimeoutError::Disconnected) => {
                    let status = self.child.try_wait().ok().flatten();
                    bail!(
                        "python worker exited (status {:?}); {}",
                        status,
                        self.stderr_summary()
                    );
                }
            };
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerReply>(raw) {
                Ok(reply) => return Ok(reply),
                Err(_) => debug!("ignoring non-protocol stdout line: {raw}"),
            }
        }
    }

    fn stderr_summary(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.is_empty() {
            "no stderr output".to_string()
        } else {
            format!(
                "stderr: {}",
                tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
            )
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A loaded Docling converter living in a long-running python process.
///
/// If the process dies or times out it is dropped and restarted on the next call.
pub struct PythonSession {
    launcher: Launcher,
    worker: Option<Worker>,
}

impl EngineSession for PythonSession {
    fn convert(&mut self, input: &Path) -> Result<StructuredDocument> {
        if self.worker.is_none() {
            warn!("python worker not running; restarting");
            self.worker = Some(self.launcher.start()?);
        }
        let Some(worker) = self.worker.as_mut() else {
            bail!("python worker unavailable");
        };

        let req = serde_json::json!({"cmd": "convert", "input": input});
        let reply = match worker.request(&req, self.launcher.convert_timeout) {
            Ok(reply) => reply,
            Err(err) => {
                self.worker = None;
                return Err(err).with_context(|| format!("converting {}", input.display()));
            }
        };
        for w in &reply.warnings {
            warn!("docling: {w}");
        }
        if !reply.ok {
            bail!(
                "{}",
                reply.error.unwrap_or_else(|| "docling conversion failed".into())
            );
        }
        let value = reply
            .document
            .ok_or_else(|| anyhow!("docling reply carried no document"))?;
        docling::from_docling_value(value)
    }
}

impl Engine for PythonEngine {
    type Session = PythonSession;

    fn doctor(&self) -> Result<EngineDiag> {
        let mut child = self
            .launcher
            .command()
            .spawn()
            .with_context(|| format!("spawning python: {}", self.launcher.python_exe.display()))?;
        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            stdin.write_all(b"{\"cmd\":\"doctor\"}\n")?;
            stdin.flush().ok();
        }
        let output = wait_with_timeout(&mut child, self.doctor_timeout)?;
        if !output.status.success() {
            return Err(anyhow!(
                "python doctor failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| anyhow!("python doctor printed no JSON"))?;

        #[derive(Deserialize)]
        struct DoctorReply {
            ok: bool,
            #[serde(default)]
            python_version: String,
            #[serde(default)]
            docling_version: Option<String>,
            #[serde(default)]
            error: Option<String>,
        }
        let reply: DoctorReply =
            serde_json::from_str(line).with_context(|| "parsing python doctor JSON")?;
        Ok(EngineDiag {
            python_exe: self.launcher.python_exe.display().to_string(),
            python_version: reply.python_version,
            docling_version: reply.docling_version,
            models_dir: self.launcher.models_dir.display().to_string(),
            offline: self.launcher.offline,
            ok: reply.ok,
            error: reply.error,
        })
    }

    fn load(&self) -> Result<PythonSession> {
        let worker = self.launcher.start()?;
        Ok(PythonSession {
            launcher: self.launcher.clone(),
            worker: Some(worker),
        })
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so verbose python logging can't deadlock the child
    // on a full stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("python process timed out after {:?}", timeout);
            let _ = child.kill();
            let _ = child.wait();
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Err(anyhow!(
                "python process exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr)
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
