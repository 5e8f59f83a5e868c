//! Capabilities the engine is handed instead of reaching for globals:
//! project data, buffer persistence, and the clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use rustc_hash::FxHashMap;

use crate::error::CcpmError;
use crate::models::{Buffer, BufferStatus, BufferType, Dependency, Task};

/// Read access to projects, their tasks and dependencies.
pub trait ProjectSource: Send + Sync {
    fn project_exists(&self, project_id: &str) -> Result<bool, CcpmError>;
    fn get_task_graph(&self, project_id: &str) -> Result<Vec<Task>, CcpmError>;
    fn get_dependencies(&self, project_id: &str) -> Result<Vec<Dependency>, CcpmError>;
}

/// Which buffers `list_buffers` returns. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct BufferFilter {
    pub project_id: Option<String>,
    pub buffer_type: Option<BufferType>,
    pub status: Option<BufferStatus>,
}

impl BufferFilter {
    pub fn matches(&self, buffer: &Buffer) -> bool {
        self.project_id.as_deref().map_or(true, |p| p == buffer.project_id)
            && self.buffer_type.map_or(true, |t| t == buffer.buffer_type)
            && self.status.map_or(true, |s| s == buffer.status)
    }
}

/// Partial update of a buffer. Unset fields are left alone.
#[derive(Clone, Debug, Default)]
pub struct BufferUpdate {
    pub name: Option<String>,
    pub status: Option<BufferStatus>,
    pub consumed_minutes: Option<f64>,
}

/// Buffer persistence.
///
/// Every method is atomic with respect to the others. `replace_active_buffers`
/// is the single transactional boundary: either the prior active set is
/// archived and the new one inserted, or nothing changes. Archived buffers
/// are never mutated again; every update on one fails with `BufferArchived`.
pub trait BufferStore: Send + Sync {
    fn replace_active_buffers(
        &self,
        project_id: &str,
        buffers: Vec<Buffer>,
        now_ms: i64,
    ) -> Result<(), CcpmError>;
    fn load_active_buffers(&self, project_id: &str) -> Result<Vec<Buffer>, CcpmError>;
    fn get_buffer(&self, buffer_id: &str) -> Result<Option<Buffer>, CcpmError>;
    fn list_buffers(&self, filter: &BufferFilter) -> Result<Vec<Buffer>, CcpmError>;
    fn update_buffer(
        &self,
        buffer_id: &str,
        update: &BufferUpdate,
        now_ms: i64,
    ) -> Result<Buffer, CcpmError>;
    fn increment_consumed(&self, buffer_id: &str, delta: f64, now_ms: i64) -> Result<Buffer, CcpmError>;
    fn reset_consumed(&self, buffer_id: &str, minutes: f64, now_ms: i64) -> Result<Buffer, CcpmError>;
    /// Returns whether a buffer was removed.
    fn delete_buffer(&self, buffer_id: &str) -> Result<bool, CcpmError>;
}

/// Source of "now" as epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
struct ProjectData {
    tasks: Vec<Task>,
    dependencies: Vec<Dependency>,
}

/// Thread-safe in-memory implementation of both store capabilities.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    projects: RwLock<FxHashMap<String, ProjectData>>,
    buffers: Mutex<Vec<Buffer>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a project's task graph.
    pub fn put_project(
        &self,
        project_id: &str,
        tasks: Vec<Task>,
        dependencies: Vec<Dependency>,
    ) -> Result<(), CcpmError> {
        self.projects
            .write()?
            .insert(project_id.to_string(), ProjectData { tasks, dependencies });
        Ok(())
    }

    /// Apply `mutate` to one task of a project, e.g. to move it to COMPLETED.
    pub fn update_task<F>(&self, project_id: &str, task_id: &str, mutate: F) -> Result<bool, CcpmError>
    where
        F: FnOnce(&mut Task),
    {
        let mut projects = self.projects.write()?;
        let task = projects
            .get_mut(project_id)
            .and_then(|p| p.tasks.iter_mut().find(|t| t.id == task_id));
        match task {
            Some(task) => {
                mutate(task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn with_project<T>(
        &self,
        project_id: &str,
        read: impl FnOnce(&ProjectData) -> T,
    ) -> Result<T, CcpmError> {
        let projects = self.projects.read()?;
        projects
            .get(project_id)
            .map(read)
            .ok_or_else(|| CcpmError::ProjectNotFound(project_id.to_string()))
    }

    /// Mutate one active buffer under the lock. Archived buffers are frozen.
    fn mutate_buffer<F>(&self, buffer_id: &str, mutate: F) -> Result<Buffer, CcpmError>
    where
        F: FnOnce(&mut Buffer) -> Result<(), CcpmError>,
    {
        let mut buffers = self.buffers.lock()?;
        let buffer = buffers
            .iter_mut()
            .find(|b| b.id == buffer_id)
            .ok_or_else(|| CcpmError::BufferNotFound(buffer_id.to_string()))?;
        if !buffer.is_active() {
            return Err(CcpmError::BufferArchived(buffer_id.to_string()));
        }
        // Stage on a copy so a rejected update leaves the stored buffer intact
        let mut staged = buffer.clone();
        mutate(&mut staged)?;
        *buffer = staged.clone();
        Ok(staged)
    }
}

impl ProjectSource for InMemoryStore {
    fn project_exists(&self, project_id: &str) -> Result<bool, CcpmError> {
        Ok(self.projects.read()?.contains_key(project_id))
    }

    fn get_task_graph(&self, project_id: &str) -> Result<Vec<Task>, CcpmError> {
        self.with_project(project_id, |p| p.tasks.clone())
    }

    fn get_dependencies(&self, project_id: &str) -> Result<Vec<Dependency>, CcpmError> {
        self.with_project(project_id, |p| p.dependencies.clone())
    }
}

impl BufferStore for InMemoryStore {
    fn replace_active_buffers(
        &self,
        project_id: &str,
        buffers: Vec<Buffer>,
        now_ms: i64,
    ) -> Result<(), CcpmError> {
        for buffer in &buffers {
            buffer.validate()?;
            if buffer.project_id != project_id {
                return Err(CcpmError::Storage(format!(
                    "buffer {} belongs to project {}, not {}",
                    buffer.id, buffer.project_id, project_id
                )));
            }
        }

        let mut stored = self.buffers.lock()?;
        if let Some(dup) = buffers
            .iter()
            .find(|new| stored.iter().any(|old| old.id == new.id))
        {
            return Err(CcpmError::Storage(format!("duplicate buffer id {}", dup.id)));
        }

        for old in stored
            .iter_mut()
            .filter(|b| b.project_id == project_id && b.is_active())
        {
            old.status = BufferStatus::Archived;
            old.updated_at_ms = now_ms;
        }
        stored.extend(buffers);
        Ok(())
    }

    fn load_active_buffers(&self, project_id: &str) -> Result<Vec<Buffer>, CcpmError> {
        self.list_buffers(&BufferFilter {
            project_id: Some(project_id.to_string()),
            status: Some(BufferStatus::Active),
            ..BufferFilter::default()
        })
    }

    fn get_buffer(&self, buffer_id: &str) -> Result<Option<Buffer>, CcpmError> {
        Ok(self.buffers.lock()?.iter().find(|b| b.id == buffer_id).cloned())
    }

    fn list_buffers(&self, filter: &BufferFilter) -> Result<Vec<Buffer>, CcpmError> {
        Ok(self
            .buffers
            .lock()?
            .iter()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    fn update_buffer(
        &self,
        buffer_id: &str,
        update: &BufferUpdate,
        now_ms: i64,
    ) -> Result<Buffer, CcpmError> {
        self.mutate_buffer(buffer_id, |buffer| {
            if let Some(consumed) = update.consumed_minutes {
                if !consumed.is_finite() || consumed < buffer.consumed_minutes {
                    return Err(CcpmError::InvalidConsumption(format!(
                        "consumed minutes may only grow ({} -> {}); use reset",
                        buffer.consumed_minutes, consumed
                    )));
                }
                buffer.consumed_minutes = consumed;
            }
            if let Some(name) = &update.name {
                buffer.name = name.clone();
            }
            if let Some(status) = update.status {
                buffer.status = status;
            }
            buffer.updated_at_ms = now_ms;
            Ok(())
        })
    }

    fn increment_consumed(&self, buffer_id: &str, delta: f64, now_ms: i64) -> Result<Buffer, CcpmError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(CcpmError::InvalidConsumption(format!(
                "delta must be a non-negative number, got {}",
                delta
            )));
        }
        self.mutate_buffer(buffer_id, |buffer| {
            buffer.consumed_minutes += delta;
            buffer.updated_at_ms = now_ms;
            Ok(())
        })
    }

    fn reset_consumed(&self, buffer_id: &str, minutes: f64, now_ms: i64) -> Result<Buffer, CcpmError> {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(CcpmError::InvalidConsumption(format!(
                "reset value must be a non-negative number, got {}",
                minutes
            )));
        }
        self.mutate_buffer(buffer_id, |buffer| {
            buffer.consumed_minutes = minutes;
            buffer.updated_at_ms = now_ms;
            Ok(())
        })
    }

    fn delete_buffer(&self, buffer_id: &str) -> Result<bool, CcpmError> {
        let mut buffers = self.buffers.lock()?;
        let before = buffers.len();
        buffers.retain(|b| b.id != buffer_id);
        Ok(buffers.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn make_buffer(id: &str, project: &str, buffer_type: BufferType) -> Buffer {
        Buffer {
            id: id.to_string(),
            project_id: project.to_string(),
            buffer_type,
            name: format!("buffer {}", id),
            planned_minutes: 100.0,
            consumed_minutes: 0.0,
            feeding_path_task_id: match buffer_type {
                BufferType::Feeding => Some("merge".to_string()),
                BufferType::Project => None,
            },
            chain_task_ids: vec!["a".to_string()],
            status: BufferStatus::Active,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .replace_active_buffers(
                "p",
                vec![
                    make_buffer("b1", "p", BufferType::Project),
                    make_buffer("b2", "p", BufferType::Feeding),
                ],
                1,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_replace_archives_previous_set() {
        let store = seeded_store();
        store
            .replace_active_buffers("p", vec![make_buffer("b3", "p", BufferType::Project)], 5)
            .unwrap();

        let active = store.load_active_buffers("p").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "b3");

        let old = store.get_buffer("b1").unwrap().unwrap();
        assert_eq!(old.status, BufferStatus::Archived);
        assert_eq!(old.updated_at_ms, 5);
    }

    #[test]
    fn test_replace_rejects_invalid_set_without_side_effects() {
        let store = seeded_store();
        let mut broken = make_buffer("b3", "p", BufferType::Feeding);
        broken.feeding_path_task_id = None;

        let err = store
            .replace_active_buffers("p", vec![make_buffer("b4", "p", BufferType::Project), broken], 5)
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE");

        let active: Vec<String> = store
            .load_active_buffers("p")
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(active, vec!["b1", "b2"]);
        assert!(store.get_buffer("b4").unwrap().is_none());
    }

    #[test]
    fn test_replace_leaves_other_projects_alone() {
        let store = seeded_store();
        store
            .replace_active_buffers("q", vec![make_buffer("q1", "q", BufferType::Project)], 2)
            .unwrap();
        assert_eq!(store.load_active_buffers("p").unwrap().len(), 2);
        assert_eq!(store.load_active_buffers("q").unwrap().len(), 1);
    }

    #[test]
    fn test_list_filter() {
        let store = seeded_store();
        let feeding = store
            .list_buffers(&BufferFilter {
                buffer_type: Some(BufferType::Feeding),
                ..BufferFilter::default()
            })
            .unwrap();
        assert_eq!(feeding.len(), 1);
        assert_eq!(feeding[0].id, "b2");
        assert_eq!(store.list_buffers(&BufferFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_increment_rejects_negative_and_archived() {
        let store = seeded_store();
        let err = store.increment_consumed("b1", -1.0, 2).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONSUMPTION");

        store
            .update_buffer(
                "b1",
                &BufferUpdate {
                    status: Some(BufferStatus::Archived),
                    ..BufferUpdate::default()
                },
                3,
            )
            .unwrap();
        let err = store.increment_consumed("b1", 1.0, 4).unwrap_err();
        assert_eq!(err, CcpmError::BufferArchived("b1".to_string()));

        let err = store.increment_consumed("nope", 1.0, 4).unwrap_err();
        assert_eq!(err.code(), "BUFFER_NOT_FOUND");
    }

    #[test]
    fn test_update_consumed_only_grows() {
        let store = seeded_store();
        store.increment_consumed("b1", 30.0, 2).unwrap();

        let lower = BufferUpdate {
            consumed_minutes: Some(10.0),
            name: Some("renamed".to_string()),
            ..BufferUpdate::default()
        };
        assert_eq!(
            store.update_buffer("b1", &lower, 3).unwrap_err().code(),
            "INVALID_CONSUMPTION"
        );
        // Rejected update must not leak the rename
        let current = store.get_buffer("b1").unwrap().unwrap();
        assert_eq!(current.name, "buffer b1");
        assert_eq!(current.consumed_minutes, 30.0);

        let higher = BufferUpdate {
            consumed_minutes: Some(45.0),
            ..BufferUpdate::default()
        };
        let updated = store.update_buffer("b1", &higher, 4).unwrap();
        assert_eq!(updated.consumed_minutes, 45.0);
        assert_eq!(updated.updated_at_ms, 4);
    }

    #[test]
    fn test_archived_buffer_is_frozen() {
        let store = seeded_store();
        store
            .replace_active_buffers("p", vec![make_buffer("b3", "p", BufferType::Project)], 5)
            .unwrap();

        let rename = BufferUpdate {
            name: Some("mutated".to_string()),
            ..BufferUpdate::default()
        };
        let rearchive = BufferUpdate {
            status: Some(BufferStatus::Archived),
            ..BufferUpdate::default()
        };
        for update in [&rename, &rearchive] {
            assert_eq!(
                store.update_buffer("b1", update, 9).unwrap_err(),
                CcpmError::BufferArchived("b1".to_string())
            );
        }
        assert!(store.reset_consumed("b1", 0.0, 9).is_err());

        let frozen = store.get_buffer("b1").unwrap().unwrap();
        assert_eq!(frozen.name, "buffer b1");
        assert_eq!(frozen.status, BufferStatus::Archived);
        assert_eq!(frozen.updated_at_ms, 5);
    }

    #[test]
    fn test_reset_is_only_way_down() {
        let store = seeded_store();
        store.increment_consumed("b2", 80.0, 2).unwrap();
        let reset = store.reset_consumed("b2", 5.0, 3).unwrap();
        assert_eq!(reset.consumed_minutes, 5.0);
        assert!(store.reset_consumed("b2", f64::NAN, 4).is_err());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(seeded_store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.increment_consumed("b1", 1.0, 9).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_buffer("b1").unwrap().unwrap().consumed_minutes, 800.0);
    }

    #[test]
    fn test_delete_and_project_lookup() {
        let store = seeded_store();
        assert!(store.delete_buffer("b1").unwrap());
        assert!(!store.delete_buffer("b1").unwrap());

        assert!(!store.project_exists("p").unwrap());
        assert!(matches!(
            store.get_task_graph("p"),
            Err(CcpmError::ProjectNotFound(_))
        ));
        store.put_project("p", Vec::new(), Vec::new()).unwrap();
        assert!(store.project_exists("p").unwrap());
        assert!(store.get_dependencies("p").unwrap().is_empty());
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(7);
        assert_eq!(clock.now_ms(), 7);
        assert!(SystemClock.now_ms() > 1_600_000_000_000);
    }
}
