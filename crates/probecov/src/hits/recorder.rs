//! Hit Recorder
//!
//! Lives inside the instrumented process. Each probed method owns a slot that
//! is allocated on its first hit and guarded by its own mutex, so threads
//! hitting different methods never contend.

use super::{HitIdentity, HitRecord, HITS_EXTENSION};
use crate::ids::{MethodKey, PointId};
use crate::image::{ModuleImage, ProbedMethod};
use crate::result::ProbecovResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Lifecycle of one method's record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Never hit
    Uninitialized,
    /// Counting
    Active,
    /// Written to the hits directory; terminal
    Flushed,
}

#[derive(Debug)]
struct Slot {
    record: HitRecord,
    flushed: bool,
}

/// Thread-safe counters for every probed method of one module
#[derive(Debug)]
pub struct HitRecorder {
    hits_path: PathBuf,
    assembly: String,
    location: PathBuf,
    methods: Vec<ProbedMethod>,
    slots: Vec<OnceLock<Mutex<Slot>>>,
}

impl HitRecorder {
    /// Recorder for an instrumented module loaded from `location`
    ///
    /// Returns `None` when the module carries no probe manifest.
    #[must_use]
    pub fn from_module(image: &ModuleImage, location: impl Into<PathBuf>) -> Option<Self> {
        let manifest = image.probes.as_ref()?;
        Some(Self::new(
            &manifest.hits_path,
            &image.name,
            location,
            manifest.methods.clone(),
        ))
    }

    /// Recorder over an explicit method table
    #[must_use]
    pub fn new(
        hits_path: &Path,
        assembly: &str,
        location: impl Into<PathBuf>,
        methods: Vec<ProbedMethod>,
    ) -> Self {
        let slots = methods.iter().map(|_| OnceLock::new()).collect();
        Self {
            hits_path: hits_path.to_path_buf(),
            assembly: assembly.to_string(),
            location: location.into(),
            methods,
            slots,
        }
    }

    /// Directory hits are flushed to
    #[must_use]
    pub fn hits_path(&self) -> &Path {
        &self.hits_path
    }

    fn identity(&self, method: &ProbedMethod) -> HitIdentity {
        HitIdentity {
            assembly: self.assembly.clone(),
            class: method.class.clone(),
            method: method.method.clone(),
            location: self.location.clone(),
        }
    }

    fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one execution of `point` in method `key`
    ///
    /// Unknown keys and hits after a flush are ignored.
    pub fn hit(&self, key: MethodKey, point: PointId) {
        let (Some(slot), Some(method)) = (self.slots.get(key.as_usize()), self.methods.get(key.as_usize()))
        else {
            tracing::trace!(key = key.as_u32(), "hit for unknown method");
            return;
        };
        let slot = slot.get_or_init(|| {
            Mutex::new(Slot {
                record: HitRecord::new(self.identity(method)),
                flushed: false,
            })
        });
        let mut slot = Self::lock(slot);
        if !slot.flushed {
            slot.record.record(point);
        }
    }

    /// Lifecycle state of method `key`
    #[must_use]
    pub fn state(&self, key: MethodKey) -> RecordState {
        match self.slots.get(key.as_usize()).and_then(OnceLock::get) {
            None => RecordState::Uninitialized,
            Some(slot) if Self::lock(slot).flushed => RecordState::Flushed,
            Some(_) => RecordState::Active,
        }
    }

    /// Copy of every record allocated so far
    #[must_use]
    pub fn snapshot(&self) -> Vec<HitRecord> {
        self.slots
            .iter()
            .filter_map(OnceLock::get)
            .map(|slot| Self::lock(slot).record.clone())
            .collect()
    }

    /// Write every active record to a new file in the hits directory
    ///
    /// Returns the file written, or `None` when nothing was active. Records
    /// stay active if the write fails.
    pub fn flush(&self) -> ProbecovResult<Option<PathBuf>> {
        let mut taken = Vec::new();
        let mut records = Vec::new();
        for slot in self.slots.iter().filter_map(OnceLock::get) {
            let mut guard = Self::lock(slot);
            if !guard.flushed {
                guard.flushed = true;
                records.push(guard.record.clone());
                taken.push(slot);
            }
        }
        if records.is_empty() {
            return Ok(None);
        }

        match self.write(&records) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), records = records.len(), "hits flushed");
                Ok(Some(path))
            }
            Err(e) => {
                for slot in taken {
                    Self::lock(slot).flushed = false;
                }
                Err(e)
            }
        }
    }

    fn write(&self, records: &[HitRecord]) -> ProbecovResult<PathBuf> {
        std::fs::create_dir_all(&self.hits_path)?;
        let target = self
            .hits_path
            .join(format!("{}.{HITS_EXTENSION}", uuid::Uuid::new_v4()));
        let mut file = tempfile::NamedTempFile::new_in(&self.hits_path)?;
        serde_json::to_writer(&mut file, records)?;
        file.flush()?;
        file.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder(dir: &Path) -> HitRecorder {
        HitRecorder::new(
            dir,
            "Calc",
            "/tmp/probecov/calc.pcbm",
            vec![
                ProbedMethod {
                    class: "Calc.Math".to_string(),
                    method: "Int32 Add(Int32,Int32)".to_string(),
                },
                ProbedMethod {
                    class: "Calc.Math".to_string(),
                    method: "Int32 Abs(Int32)".to_string(),
                },
            ],
        )
    }

    #[test]
    fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        let add = MethodKey::new(0);
        let abs = MethodKey::new(1);

        assert_eq!(recorder.state(add), RecordState::Uninitialized);
        recorder.hit(add, PointId::new(1));
        assert_eq!(recorder.state(add), RecordState::Active);
        assert_eq!(recorder.state(abs), RecordState::Uninitialized);

        let path = recorder.flush().unwrap().unwrap();
        assert_eq!(path.extension().unwrap(), HITS_EXTENSION);
        assert_eq!(recorder.state(add), RecordState::Flushed);

        // flushed records are never mutated again
        recorder.hit(add, PointId::new(1));
        assert_eq!(recorder.snapshot()[0].counter, 1);
        assert!(recorder.flush().unwrap().is_none());
    }

    #[test]
    fn test_flush_writes_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let hits = dir.path().join("nested").join("hits");
        let recorder = recorder(&hits);
        recorder.hit(MethodKey::new(1), PointId::new(2));
        recorder.hit(MethodKey::new(1), PointId::new(2));

        let path = recorder.flush().unwrap().unwrap();
        let records: Vec<HitRecord> = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity.method, "Int32 Abs(Int32)");
        assert_eq!(records[0].count(PointId::new(2)), 2);
        assert_eq!(std::fs::read_dir(&hits).unwrap().count(), 1);
    }

    #[test]
    fn test_unknown_key_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        recorder.hit(MethodKey::new(9), PointId::new(1));
        assert!(recorder.snapshot().is_empty());
        assert_eq!(recorder.state(MethodKey::new(9)), RecordState::Uninitialized);
    }

    #[test]
    fn test_concurrent_hits_are_all_counted() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(recorder(dir.path()));
        std::thread::scope(|s| {
            for t in 0..8_u32 {
                let recorder = Arc::clone(&recorder);
                s.spawn(move || {
                    for i in 0..1000_u32 {
                        recorder.hit(MethodKey::new(t % 2), PointId::new(1 + i % 4));
                    }
                });
            }
        });
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.len(), 2);
        for record in &snapshot {
            assert_eq!(record.counter, 4000);
            assert_eq!(record.count(PointId::new(1)), 1000);
            assert!(record.is_consistent());
        }
    }

    #[test]
    fn test_from_module_without_manifest() {
        assert!(HitRecorder::from_module(&ModuleImage::default(), "x").is_none());
    }
}
