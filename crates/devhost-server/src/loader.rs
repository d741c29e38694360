//! Module loaders — turn a hot-load module reference into a handler.
//!
//! The host never knows how code is located. It asks its [`ModuleLoader`],
//! which may look the reference up in a static [`PluginTable`], treat it as
//! the path of an executable ([`CommandLoader`]), or try several of those in
//! turn ([`ChainLoader`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use devhost_protocol::{ServiceError, ServiceResult};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::service::{BoxFuture, Handler, ServiceContext};

/// Errors resolving a module reference.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("module reference is empty")]
    EmptyReference,
    #[error("no module registered for reference `{0}`")]
    Unknown(String),
    #[error("cannot read module {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("module {} is not a file", .0.display())]
    NotAFile(PathBuf),
    #[error("module {} is not executable", .0.display())]
    NotExecutable(PathBuf),
    #[error("no loaders configured")]
    NoLoaders,
}

/// Resolves a module reference to a handler.
///
/// `resolve` is synchronous and may block on I/O. `__hotload` calls it from
/// the blocking pool, never on a runtime worker.
pub trait ModuleLoader: Send + Sync + 'static {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn Handler>, LoadError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Static plugin table
// ─────────────────────────────────────────────────────────────────────────────

/// Handlers compiled into the process, keyed by reference string.
#[derive(Default)]
pub struct PluginTable {
    entries: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl PluginTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handler` loadable as `reference`. Replaces an earlier entry.
    pub fn register(&self, reference: impl Into<String>, handler: Arc<dyn Handler>) {
        self.entries.write().insert(reference.into(), handler);
    }

    pub fn with(self, reference: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.register(reference, handler);
        self
    }

    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.entries.read().keys().cloned().collect();
        refs.sort();
        refs
    }
}

impl ModuleLoader for PluginTable {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn Handler>, LoadError> {
        if reference.is_empty() {
            return Err(LoadError::EmptyReference);
        }
        self.entries
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| LoadError::Unknown(reference.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executable modules
// ─────────────────────────────────────────────────────────────────────────────

/// Treats references as paths to executables.
///
/// Relative references are resolved against `base_dir`. Resolution only
/// checks the file; the program runs once per call.
#[derive(Debug, Clone)]
pub struct CommandLoader {
    base_dir: PathBuf,
}

impl CommandLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Loader rooted at the process working directory.
    pub fn current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn locate(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl Default for CommandLoader {
    fn default() -> Self {
        Self::current_dir()
    }
}

impl ModuleLoader for CommandLoader {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn Handler>, LoadError> {
        if reference.trim().is_empty() {
            return Err(LoadError::EmptyReference);
        }
        let path = self.locate(reference);
        let meta = std::fs::metadata(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(LoadError::NotAFile(path));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                return Err(LoadError::NotExecutable(path));
            }
        }
        debug!("Resolved command module {}", path.display());
        Ok(Arc::new(CommandHandler { program: path }))
    }
}

/// Runs an executable per call: JSON payload on stdin, result on stdout.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: PathBuf,
}

impl CommandHandler {
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Handler for CommandHandler {
    fn call(&self, payload: Value, ctx: ServiceContext) -> BoxFuture<'static, ServiceResult> {
        let program = self.program.clone();
        Box::pin(async move { run_command(&program, &payload, ctx.service()).await })
    }
}

async fn run_command(program: &Path, payload: &Value, service: &str) -> ServiceResult {
    let input = serde_json::to_vec(payload)
        .map_err(|e| ServiceError::invalid_payload(format!("Cannot encode payload: {e}")))?;

    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ServiceError::handler_failed(format!("Failed to start {}: {e}", program.display()))
        })?;

    // stdin is written while stdout drains.
    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            // Programs may close stdin without reading it.
            let _ = stdin.write_all(&input).await;
        })
    });

    let output = child.wait_with_output().await.map_err(|e| {
        ServiceError::handler_failed(format!("Failed to run {}: {e}", program.display()))
    })?;
    if let Some(writer) = writer {
        let _ = writer.await;
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("Module for {service} exited with {}", output.status);
        return Err(ServiceError::handler_failed(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }

    Ok(parse_output(&output.stdout))
}

/// JSON if it parses, trimmed text otherwise, null when empty.
fn parse_output(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chains
// ─────────────────────────────────────────────────────────────────────────────

/// Tries each loader in order; the first that resolves wins.
#[derive(Default)]
pub struct ChainLoader {
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl ChainLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loaders.push(loader);
        self
    }
}

impl ModuleLoader for ChainLoader {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn Handler>, LoadError> {
        let mut last = LoadError::NoLoaders;
        for loader in &self.loaders {
            match loader.resolve(reference) {
                Ok(handler) => return Ok(handler),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}
