use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

type SharedLock = Arc<RwLock<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[allow(dead_code)] // Held only to release on drop
pub enum Guard {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

fn acquire(lock: &SharedLock, mode: LockMode) -> Guard {
    match mode {
        LockMode::Read => Guard::Read(lock.read_arc()),
        LockMode::Write => Guard::Write(lock.write_arc()),
    }
}

/// Guards held by one operation, released together on drop
#[must_use]
pub struct LockSet {
    guards: Vec<Guard>,
}

impl LockSet {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Lock registry owned by a `Database`.
///
/// Acquisition order is always: projects lock, then one project lock, then table
/// locks sorted by name. Every operation builds exactly one `LockSet`, so no thread
/// ever waits on a lock while holding one acquired later in that order.
///
/// - projects lock: write for create/delete/rename project, read otherwise
/// - project lock: write for create/delete/alter table, read for row operations
/// - table lock: write for mutations, read for searches
pub struct LockManager {
    projects: SharedLock,
    project_locks: Mutex<HashMap<String, SharedLock>>,
    table_locks: Mutex<HashMap<(String, String), SharedLock>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            projects: Arc::new(RwLock::new(())),
            project_locks: Mutex::new(HashMap::new()),
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn projects(&self, mode: LockMode) -> LockSet {
        LockSet {
            guards: vec![acquire(&self.projects, mode)],
        }
    }

    /// Projects read lock plus the project's own lock in `mode`
    pub fn project(&self, project: &str, mode: LockMode) -> LockSet {
        let projects = acquire(&self.projects, LockMode::Read);
        let lock = self.project_lock(project);
        LockSet {
            guards: vec![projects, acquire(&lock, mode)],
        }
    }

    /// Project read lock plus table locks, taken in name order
    pub fn tables(&self, project: &str, tables: &[(&str, LockMode)]) -> LockSet {
        let mut set = self.project(project, LockMode::Read);
        self.add_tables(&mut set, project, tables);
        set
    }

    /// Extend a set holding the project lock with table locks, taken in name order.
    /// A table listed twice is locked once, in the strongest requested mode.
    /// Call at most once per set.
    pub fn add_tables(&self, set: &mut LockSet, project: &str, tables: &[(&str, LockMode)]) {
        let mut wanted: Vec<(&str, LockMode)> = Vec::with_capacity(tables.len());
        for &(table, mode) in tables {
            match wanted.iter_mut().find(|(name, _)| *name == table) {
                Some(entry) if mode == LockMode::Write => entry.1 = LockMode::Write,
                Some(_) => {}
                None => wanted.push((table, mode)),
            }
        }
        wanted.sort_by(|a, b| a.0.cmp(b.0));

        for (table, mode) in wanted {
            let lock = self.table_lock(project, table);
            set.guards.push(acquire(&lock, mode));
        }
    }

    /// Drop registry entries of a project. Callers hold the projects write lock.
    pub fn forget_project(&self, project: &str) {
        self.project_locks.lock().remove(project);
        self.table_locks.lock().retain(|(p, _), _| p != project);
    }

    /// Drop the registry entry of a table. Callers hold the project write lock.
    pub fn forget_table(&self, project: &str, table: &str) {
        self.table_locks.lock().remove(&(project.to_string(), table.to_string()));
    }

    fn project_lock(&self, project: &str) -> SharedLock {
        self.project_locks
            .lock()
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn table_lock(&self, project: &str, table: &str) -> SharedLock {
        self.table_locks
            .lock()
            .entry((project.to_string(), table.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_table_resolves_to_one_lock() {
        let locks = Arc::new(LockManager::new());
        let a = locks.table_lock("p", "t");
        let b = locks.table_lock("p", "t");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &locks.table_lock("p", "u")));
        assert!(!Arc::ptr_eq(&a, &locks.table_lock("q", "t")));
    }

    #[test]
    fn duplicate_tables_take_the_strongest_mode() {
        let locks = LockManager::new();
        let set = locks.tables("p", &[("b", LockMode::Read), ("a", LockMode::Read), ("b", LockMode::Write)]);
        assert_eq!(set.len(), 4);
        assert!(matches!(set.guards[3], Guard::Write(_)));
        assert!(matches!(set.guards[2], Guard::Read(_)));
    }

    #[test]
    fn writers_exclude_each_other() {
        let locks = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    // Opposite listing orders must not deadlock
                    let tables = if i % 2 == 0 {
                        [("a", LockMode::Write), ("b", LockMode::Write)]
                    } else {
                        [("b", LockMode::Write), ("a", LockMode::Write)]
                    };
                    for _ in 0..20 {
                        let _set = locks.tables("p", &tables);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readers_share() {
        let locks = LockManager::new();
        let first = locks.tables("p", &[("t", LockMode::Read)]);
        let second = locks.tables("p", &[("t", LockMode::Read)]);
        assert_eq!(first.len() + second.len(), 6);
    }
}
