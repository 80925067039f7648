use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use crate::analysis::analyzer::Analyzer;
use crate::core::error::{Error, Result};
use crate::core::locks::{LockManager, LockMode};
use crate::core::types::RowId;
use crate::index::text_index::TextIndex;
use crate::schema::schema::is_valid_name;
use crate::storage::layout::{StorageLayout, TableLayout};

const INDEX_EXTENSION: &str = "text";
const DEINDEX_EXTENSION: &str = "rtext";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Index,    // Replace the row's postings with the payload's words
    Deindex,  // Drop the row's postings
}

/// One unit of full-text work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextJob {
    pub op: TextOp,
    pub project: String,
    pub table: String,
    pub field: String,
    pub row_id: RowId,
    pub payload: String,  // Raw text for `Index`, empty for `Deindex`
}

impl TextJob {
    pub fn index(project: &str, table: &str, field: &str, row_id: RowId, text: &str) -> Self {
        TextJob {
            op: TextOp::Index,
            project: project.to_string(),
            table: table.to_string(),
            field: field.to_string(),
            row_id,
            payload: text.to_string(),
        }
    }

    pub fn deindex(project: &str, table: &str, field: &str, row_id: RowId) -> Self {
        TextJob {
            op: TextOp::Deindex,
            project: project.to_string(),
            table: table.to_string(),
            field: field.to_string(),
            row_id,
            payload: String::new(),
        }
    }

    fn extension(&self) -> &'static str {
        match self.op {
            TextOp::Index => INDEX_EXTENSION,
            TextOp::Deindex => DEINDEX_EXTENSION,
        }
    }

    fn field_key(&self) -> (String, String, String) {
        (self.project.clone(), self.table.clone(), self.field.clone())
    }
}

/// Receiver of full-text work produced by row mutations
pub trait TextSink: Send + Sync {
    /// Journal `job` durably and queue it. Returns once the journal entry is written.
    fn submit(&self, job: TextJob) -> Result<()>;
}

struct Shared {
    layout: StorageLayout,
    locks: Arc<LockManager>,
    analyzer: Analyzer,
    field_locks: Mutex<HashMap<(String, String, String), Arc<Mutex<()>>>>,
    pending: Mutex<usize>,
    drained: Condvar,
}

impl Shared {
    fn field_lock(&self, job: &TextJob) -> Arc<Mutex<()>> {
        self.field_locks
            .lock()
            .entry(job.field_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn apply(&self, job: &TextJob) -> Result<()> {
        let _project = self.locks.project(&job.project, LockMode::Read);

        let table = self.layout.table(&job.project, &job.table);
        if !table.exists() {
            warn!(project = %job.project, table = %job.table, row = %job.row_id, "Table gone before its full-text job ran");
            return Ok(());
        }

        let field_lock = self.field_lock(job);
        let _field = field_lock.lock();

        let index = TextIndex::open(&table, &job.field);
        match job.op {
            TextOp::Index => index.replace(job.row_id, &self.analyzer.term_frequencies(&job.payload))?,
            TextOp::Deindex => index.remove(job.row_id)?,
        }
        clear_journal(&table, job)?;

        debug!(project = %job.project, table = %job.table, field = %job.field, row = %job.row_id, op = ?job.op, "Full-text job applied");
        Ok(())
    }

    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// Background full-text indexer.
///
/// Jobs are routed to one worker per `(project, table, field)` hash, so a field's
/// jobs apply in submission order; a per-field mutex serialises posting rewrites
/// with journal writes. Every job is journaled under the table's `txtinstrs/`
/// until applied, and journals left by an earlier process are replayed on start.
/// Failures are logged and dropped.
pub struct TextIndexer {
    shared: Arc<Shared>,
    senders: Vec<Sender<TextJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl TextIndexer {
    pub fn start(layout: StorageLayout, locks: Arc<LockManager>, workers: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            layout,
            locks,
            analyzer: Analyzer::full_text(),
            field_locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(0),
            drained: Condvar::new(),
        });

        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let (sender, receiver) = channel::unbounded();
            let worker_shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("flatbase-text-{}", i))
                .spawn(move || run_worker(worker_shared, receiver))?;
            senders.push(sender);
            handles.push(handle);
        }

        let indexer = TextIndexer {
            shared,
            senders,
            workers: handles,
        };
        let reconciled = indexer.reconcile()?;
        info!(workers, reconciled, "Full-text indexer started");
        Ok(indexer)
    }

    /// Queue every journaled job found on disk. Returns the number queued.
    pub fn reconcile(&self) -> Result<usize> {
        let _projects = self.shared.locks.projects(LockMode::Read);
        let mut queued = 0;
        for project in list_dirs(&self.shared.layout.base_dir)? {
            queued += self.reconcile_dir(&project)?;
        }
        Ok(queued)
    }

    /// Queue the journaled jobs of one project
    pub fn reconcile_project(&self, project: &str) -> Result<usize> {
        let _project = self.shared.locks.project(project, LockMode::Read);
        self.reconcile_dir(project)
    }

    /// Block until every queued job has been applied or dropped
    pub fn wait_idle(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    fn reconcile_dir(&self, project: &str) -> Result<usize> {
        let mut queued = 0;
        for table_name in list_dirs(&self.shared.layout.project_dir(project))? {
            let table = self.shared.layout.table(project, &table_name);
            let mut jobs = Vec::new();

            let entries = match fs::read_dir(table.staging_dir()) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name();
                let Some((row_id, field, op)) = name.to_str().and_then(parse_journal_name) else {
                    warn!(path = %entry.path().display(), "Unrecognised file in full-text staging area");
                    continue;
                };
                let job = match op {
                    TextOp::Index => TextJob::index(project, &table_name, &field, row_id, &fs::read_to_string(entry.path())?),
                    TextOp::Deindex => TextJob::deindex(project, &table_name, &field, row_id),
                };
                jobs.push(job);
            }

            // Removals first, then by row
            jobs.sort_by_key(|job| (job.op == TextOp::Index, job.row_id, job.field.clone()));
            for job in jobs {
                self.enqueue(job)?;
                queued += 1;
            }
        }
        Ok(queued)
    }

    fn enqueue(&self, job: TextJob) -> Result<()> {
        let mut hasher = DefaultHasher::new();
        job.field_key().hash(&mut hasher);
        let worker = (hasher.finish() % self.senders.len() as u64) as usize;

        *self.shared.pending.lock() += 1;
        self.senders[worker].send(job).map_err(|_| {
            self.shared.finish_one();
            Error::storage("Full-text indexer has shut down")
        })
    }
}

impl TextSink for TextIndexer {
    fn submit(&self, job: TextJob) -> Result<()> {
        let table = self.shared.layout.table(&job.project, &job.table);
        {
            let field_lock = self.shared.field_lock(&job);
            let _field = field_lock.lock();
            write_journal(&table, &job)?;
        }
        self.enqueue(job)
    }
}

impl Drop for TextIndexer {
    fn drop(&mut self) {
        // Workers drain their queues and exit once every sender is gone
        self.senders.clear();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Full-text worker panicked");
            }
        }
    }
}

fn run_worker(shared: Arc<Shared>, jobs: Receiver<TextJob>) {
    for job in jobs.iter() {
        if let Err(e) = shared.apply(&job) {
            error!(
                project = %job.project, table = %job.table, field = %job.field, row = %job.row_id,
                error = %e, "Full-text indexing failed"
            );
        }
        shared.finish_one();
    }
}

fn write_journal(table: &TableLayout, job: &TextJob) -> Result<()> {
    fs::create_dir_all(table.staging_dir())?;
    let (own, other) = match job.op {
        TextOp::Index => (INDEX_EXTENSION, DEINDEX_EXTENSION),
        TextOp::Deindex => (DEINDEX_EXTENSION, INDEX_EXTENSION),
    };
    fs::write(table.staging_path(job.row_id, &job.field, own), &job.payload)?;
    remove_if_present(&table.staging_path(job.row_id, &job.field, other))
}

/// Remove the job's journal entry unless a later submission replaced it
fn clear_journal(table: &TableLayout, job: &TextJob) -> Result<()> {
    let path = table.staging_path(job.row_id, &job.field, job.extension());
    match job.op {
        TextOp::Index => match fs::read_to_string(&path) {
            Ok(current) if current == job.payload => remove_if_present(&path),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
        TextOp::Deindex => remove_if_present(&path),
    }
}

/// `{rowId}#{field}.text` or `{rowId}#{field}.rtext`
fn parse_journal_name(name: &str) -> Option<(RowId, String, TextOp)> {
    let (stem, extension) = name.rsplit_once('.')?;
    let op = match extension {
        INDEX_EXTENSION => TextOp::Index,
        DEINDEX_EXTENSION => TextOp::Deindex,
        _ => return None,
    };
    let (row_id, field) = stem.split_once('#')?;
    let row_id = row_id.parse::<u64>().ok()?;
    if !is_valid_name(field) {
        return None;
    }
    Some((RowId(row_id), field.to_string(), op))
}

fn list_dirs(dir: &std::path::Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().filter(|n| is_valid_name(n)) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn remove_if_present(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (StorageLayout, TableLayout) {
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let table = layout.table("p", "posts");
        fs::create_dir_all(&table.dir).unwrap();
        (layout, table)
    }

    fn search(table: &TableLayout, word: &str) -> Vec<u64> {
        TextIndex::open(table, "body").postings(word).unwrap().row_ids().iter().collect()
    }

    #[test]
    fn journal_names() {
        assert_eq!(parse_journal_name("12#body.text"), Some((RowId(12), "body".to_string(), TextOp::Index)));
        assert_eq!(parse_journal_name("3#a_b.rtext"), Some((RowId(3), "a_b".to_string(), TextOp::Deindex)));
        assert_eq!(parse_journal_name("x#body.text"), None);
        assert_eq!(parse_journal_name("1#body.tmp"), None);
        assert_eq!(parse_journal_name("1body.text"), None);
    }

    #[test]
    fn jobs_apply_and_clear_their_journal() {
        let dir = TempDir::new().unwrap();
        let (layout, table) = setup(&dir);
        let indexer = TextIndexer::start(layout, Arc::new(LockManager::new()), 2).unwrap();

        indexer.submit(TextJob::index("p", "posts", "body", RowId(1), "Hello <b>world</b>")).unwrap();
        indexer.submit(TextJob::index("p", "posts", "body", RowId(2), "hello again")).unwrap();
        indexer.wait_idle();

        assert_eq!(search(&table, "hello"), vec![1, 2]);
        assert_eq!(search(&table, "world"), vec![1]);
        assert_eq!(fs::read_dir(table.staging_dir()).unwrap().count(), 0);

        indexer.submit(TextJob::deindex("p", "posts", "body", RowId(1))).unwrap();
        indexer.wait_idle();
        assert_eq!(search(&table, "hello"), vec![2]);
        assert!(search(&table, "world").is_empty());
        assert_eq!(indexer.pending(), 0);
    }

    #[test]
    fn leftover_journals_are_replayed_on_start() {
        let dir = TempDir::new().unwrap();
        let (layout, table) = setup(&dir);
        fs::create_dir_all(table.staging_dir()).unwrap();
        fs::write(table.staging_path(RowId(7), "body", "text"), "recovered words").unwrap();
        fs::write(table.staging_dir().join("junk.bin"), "").unwrap();

        let indexer = TextIndexer::start(layout, Arc::new(LockManager::new()), 1).unwrap();
        indexer.wait_idle();

        assert_eq!(search(&table, "recovered"), vec![7]);
        assert!(!table.staging_path(RowId(7), "body", "text").exists());
    }

    #[test]
    fn jobs_for_missing_tables_are_dropped() {
        let dir = TempDir::new().unwrap();
        let (layout, _) = setup(&dir);
        let indexer = TextIndexer::start(layout, Arc::new(LockManager::new()), 1).unwrap();

        indexer.enqueue(TextJob::index("p", "ghost", "body", RowId(1), "boo")).unwrap();
        indexer.wait_idle();
        assert_eq!(indexer.pending(), 0);
    }
}
