//! Conversion engine adapter.
//!
//! Owns one lazily loaded engine session. Loading happens at most once per
//! successful lifetime: concurrent callers park on a condvar until the loader
//! publishes `Ready` or `Failed`, and every caller sees the same outcome.
//! A failure is sticky until `reset` is called.

use super::{Engine, EngineSession};
use crate::{
    document::StructuredDocument,
    error::{ConversionError, EngineError},
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// The `%PDF-` marker may be preceded by junk; readers accept it within the first KiB.
const PDF_HEADER_WINDOW: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

enum Slot<S> {
    Uninitialized,
    Loading,
    Ready(Arc<Mutex<S>>),
    Failed(EngineError),
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ConversionError> {
        if self.is_cancelled() {
            Err(ConversionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct EngineAdapter<E: Engine> {
    engine: E,
    slot: Mutex<Slot<E::Session>>,
    changed: Condvar,
    max_input_file_bytes: u64,
}

impl<E: Engine> EngineAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            slot: Mutex::new(Slot::Uninitialized),
            changed: Condvar::new(),
            max_input_file_bytes: u64::MAX,
        }
    }

    pub fn with_max_input_file_bytes(mut self, max: u64) -> Self {
        self.max_input_file_bytes = max;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn max_input_file_bytes(&self) -> u64 {
        self.max_input_file_bytes
    }

    pub fn state(&self) -> EngineState {
        match &*self.lock_slot() {
            Slot::Uninitialized => EngineState::Uninitialized,
            Slot::Loading => EngineState::Loading,
            Slot::Ready(_) => EngineState::Ready,
            Slot::Failed(err) => EngineState::Failed(err.to_string()),
        }
    }

    pub fn ensure_ready(&self) -> Result<(), EngineError> {
        self.session().map(|_| ())
    }

    /// Clears a sticky failure so the next request loads again.
    /// Returns false when the adapter was not in the failed state.
    pub fn reset(&self) -> bool {
        let mut slot = self.lock_slot();
        if matches!(*slot, Slot::Failed(_)) {
            *slot = Slot::Uninitialized;
            info!("engine state reset after failure");
            true
        } else {
            false
        }
    }

    pub fn convert(
        &self,
        input: &Path,
        cancel: &CancelToken,
    ) -> Result<StructuredDocument, ConversionError> {
        validate_source(input, self.max_input_file_bytes)?;
        cancel.check()?;

        let session = self.session()?;
        cancel.check()?;

        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiting for the session lock can take as long as another conversion.
        cancel.check()?;

        let started = Instant::now();
        debug!("convert start {}", input.display());
        let doc = session
            .convert(input)
            .map_err(|err| ConversionError::EngineFailure(format!("{err:#}")))?;
        info!(
            "converted {} pages={} tables={} in {:?}",
            input.display(),
            doc.page_count(),
            doc.table_count(),
            started.elapsed()
        );
        Ok(doc)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot<E::Session>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Result<Arc<Mutex<E::Session>>, EngineError> {
        let mut slot = self.lock_slot();
        loop {
            match &*slot {
                Slot::Ready(session) => return Ok(Arc::clone(session)),
                Slot::Failed(err) => return Err(err.clone()),
                Slot::Loading => {
                    slot = self
                        .changed
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Slot::Uninitialized => break,
            }
        }
        *slot = Slot::Loading;
        drop(slot);

        let guard = LoadGuard { adapter: self };
        info!("loading conversion engine");
        let started = Instant::now();
        let outcome = self.engine.load();

        let mut slot = self.lock_slot();
        let result = match outcome {
            Ok(session) => {
                info!("conversion engine ready in {:?}", started.elapsed());
                let session = Arc::new(Mutex::new(session));
                *slot = Slot::Ready(Arc::clone(&session));
                Ok(session)
            }
            Err(err) => {
                let err = match err.downcast::<EngineError>() {
                    Ok(typed) => typed,
                    Err(other) => EngineError::Load(format!("{other:#}")),
                };
                warn!("conversion engine failed to load: {err}");
                *slot = Slot::Failed(err.clone());
                Err(err)
            }
        };
        drop(slot);
        std::mem::forget(guard);
        self.changed.notify_all();
        result
    }
}

/// Publishes a failure if `Engine::load` unwinds, so waiters never park forever.
struct LoadGuard<'a, E: Engine> {
    adapter: &'a EngineAdapter<E>,
}

impl<E: Engine> Drop for LoadGuard<'_, E> {
    fn drop(&mut self) {
        let mut slot = self.adapter.lock_slot();
        if matches!(*slot, Slot::Loading) {
            *slot = Slot::Failed(EngineError::Load("engine load panicked".into()));
        }
        drop(slot);
        self.adapter.changed.notify_all();
    }
}

/// Checks that `path` is an existing, readable PDF within the size limit.
pub fn validate_source(path: &Path, max_bytes: u64) -> Result<(), ConversionError> {
    let meta = std::fs::metadata(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ConversionError::unreadable(path, "file does not exist")
        } else {
            ConversionError::unreadable(path, err.to_string())
        }
    })?;
    if !meta.is_file() {
        return Err(ConversionError::unreadable(path, "not a regular file"));
    }
    if meta.len() > max_bytes {
        return Err(ConversionError::unreadable(
            path,
            format!("file is {} bytes, limit is {}", meta.len(), max_bytes),
        ));
    }

    let mut head = Vec::with_capacity(PDF_HEADER_WINDOW);
    File::open(path)
        .and_then(|f| f.take(PDF_HEADER_WINDOW as u64).read_to_end(&mut head))
        .map_err(|err| ConversionError::unreadable(path, err.to_string()))?;
    if !head.windows(5).any(|w| w == b"%PDF-") {
        return Err(ConversionError::unreadable(path, "missing %PDF- header"));
    }
    Ok(())
}
