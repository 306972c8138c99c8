//! File-backed storage provider (one JSON-lines file per partition).
//!
//! ## Layout
//!
//! `<root>/<stream>.<index>.journal`, one serialized [`JournalRecord`] per
//! line. A line is only ever written whole, followed by `sync_data`.
//!
//! ## Durability & Recovery
//!
//! - A batch is written in one `write_all` and synced; on failure the file is
//!   truncated back to its last durable length, so no partial batch is
//!   visible.
//! - Opening a writer scans the file, checks that positions are contiguous
//!   from zero and truncates a torn (newline-less) tail left by a crash.
//! - Readers are bounded by the committed byte length the provider knows of,
//!   or by the file length when no writer is open in this process.
//!
//! ## Single writer
//!
//! Besides the provider's own lease, a writer claims its journal file by
//! canonical path in a process-wide table, so two providers pointed at the
//! same directory cannot both write one partition.
//!
//! Only live subscriptions from the current tip are supported.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use memstate_core::Partition;
use memstate_journal::{
    BatchingWriter, JournalError, JournalReader, JournalRecord, JournalSink,
    JournalSubscriptionSource, JournalWriter, LiveTail, LiveTailSubscriptionSource, RecordIter,
    StorageProvider, WriterOptions, WriterRegistry,
};

const JOURNAL_EXTENSION: &str = "journal";

/// Durable extent of a partition file as last committed by this process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
struct Committed {
    bytes: u64,
    records: u64,
}

type CommittedMap = Arc<Mutex<HashMap<Partition, Committed>>>;

/// File-system storage provider.
#[derive(Debug, Clone)]
pub struct FileStorageProvider {
    root: PathBuf,
    writers: Arc<WriterRegistry>,
    tail: Arc<LiveTail>,
    committed: CommittedMap,
    options: WriterOptions,
}

impl FileStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, WriterOptions::default())
    }

    pub fn with_options(root: impl Into<PathBuf>, options: WriterOptions) -> Self {
        Self {
            root: root.into(),
            writers: Arc::new(WriterRegistry::new()),
            tail: Arc::new(LiveTail::new()),
            committed: Arc::new(Mutex::new(HashMap::new())),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the journal file backing `partition`.
    pub fn journal_path(&self, partition: &Partition) -> PathBuf {
        self.root.join(format!("{partition}.{JOURNAL_EXTENSION}"))
    }

    fn reader(&self, partition: &Partition) -> FileReader {
        FileReader {
            partition: partition.clone(),
            path: self.journal_path(partition),
            committed: Arc::clone(&self.committed),
        }
    }
}

impl StorageProvider for FileStorageProvider {
    fn initialize(&self) -> Result<(), JournalError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| JournalError::write(format!("create {}: {e}", self.root.display())))
    }

    fn create_journal_writer(&self, partition: &Partition) -> Result<Box<dyn JournalWriter>, JournalError> {
        let lease = self.writers.acquire(partition)?;
        let path = self.journal_path(partition);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| JournalError::write(format!("open {}: {e}", path.display())))?;

        let claim = FileClaim::acquire(&path, partition)?;
        let extent = recover(&mut file, partition, &path)?;
        set_committed(&self.committed, partition, extent)?;

        let sink = FileSink {
            partition: partition.clone(),
            path,
            file,
            extent,
            committed: Arc::clone(&self.committed),
            claim: Some(claim),
        };
        let writer = BatchingWriter::new(lease, sink, extent.records, Arc::clone(&self.tail), self.options);
        Ok(Box::new(writer))
    }

    fn create_journal_reader(&self, partition: &Partition) -> Result<Box<dyn JournalReader>, JournalError> {
        Ok(Box::new(self.reader(partition)))
    }

    fn create_journal_subscription_source(
        &self,
        partition: &Partition,
    ) -> Result<Box<dyn JournalSubscriptionSource>, JournalError> {
        Ok(Box::new(LiveTailSubscriptionSource::new(
            Arc::new(self.reader(partition)),
            Arc::clone(&self.tail),
            false,
        )))
    }

    fn supports_catchup_subscriptions(&self) -> bool {
        false
    }
}

fn set_committed(map: &CommittedMap, partition: &Partition, extent: Committed) -> Result<(), JournalError> {
    map.lock()
        .map_err(|_| JournalError::Poisoned("committed extents"))?
        .insert(partition.clone(), extent);
    Ok(())
}

/// Journal files that have an open writer in this process.
fn claimed_files() -> &'static Mutex<HashSet<PathBuf>> {
    static CLAIMED: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    CLAIMED.get_or_init(Default::default)
}

/// Exclusive claim on a journal file; released on drop.
#[derive(Debug)]
struct FileClaim {
    path: PathBuf,
}

impl FileClaim {
    fn acquire(path: &Path, partition: &Partition) -> Result<Self, JournalError> {
        let path = fs::canonicalize(path)
            .map_err(|e| JournalError::write(format!("resolve {}: {e}", path.display())))?;
        let mut claimed = claimed_files()
            .lock()
            .map_err(|_| JournalError::Poisoned("claimed journal files"))?;
        if !claimed.insert(path.clone()) {
            return Err(JournalError::DuplicateWriter(partition.clone()));
        }
        Ok(Self { path })
    }
}

impl Drop for FileClaim {
    fn drop(&mut self) {
        let mut claimed = match claimed_files().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claimed.remove(&self.path);
    }
}

/// Validate an existing journal file and drop a torn tail.
fn recover(file: &mut File, partition: &Partition, path: &Path) -> Result<Committed, JournalError> {
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|e| JournalError::read(format!("read {}: {e}", path.display())))?;

    let durable_len = contents.iter().rposition(|b| *b == b'\n').map(|i| i + 1).unwrap_or(0);
    if durable_len < contents.len() {
        warn!(
            partition = %partition,
            path = %path.display(),
            torn_bytes = contents.len() - durable_len,
            "truncating torn journal tail"
        );
        file.set_len(durable_len as u64)
            .map_err(|e| JournalError::write(format!("truncate {}: {e}", path.display())))?;
    }

    let mut records = 0u64;
    for line in contents[..durable_len].split(|b| *b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let record = decode(line, records)?;
        if record.position() != records {
            return Err(JournalError::corrupt(
                records,
                format!("found position {} out of sequence", record.position()),
            ));
        }
        records += 1;
    }

    debug!(partition = %partition, records, bytes = durable_len, "journal file recovered");
    Ok(Committed {
        bytes: durable_len as u64,
        records,
    })
}

fn decode(line: &[u8], position: u64) -> Result<JournalRecord, JournalError> {
    serde_json::from_slice(line).map_err(|e| JournalError::corrupt(position, e.to_string()))
}

struct FileSink {
    partition: Partition,
    path: PathBuf,
    file: File,
    extent: Committed,
    committed: CommittedMap,
    claim: Option<FileClaim>,
}

impl FileSink {
    fn write_batch(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.sync_data()
    }

    /// Cut the file back to its durable length through a fresh handle.
    fn roll_back(&self) -> std::io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(self.extent.bytes)?;
        file.sync_data()
    }
}

impl JournalSink for FileSink {
    fn commit(&mut self, batch: &[JournalRecord]) -> Result<(), JournalError> {
        let mut bytes = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut bytes, record)
                .map_err(|e| JournalError::write(format!("encode position {}: {e}", record.position())))?;
            bytes.push(b'\n');
        }

        if let Err(err) = self.write_batch(&bytes) {
            if let Err(truncate) = self.roll_back() {
                warn!(partition = %self.partition, error = %truncate, "rollback truncate failed");
            }
            return Err(JournalError::write(err.to_string()));
        }

        self.extent = Committed {
            bytes: self.extent.bytes + bytes.len() as u64,
            records: self.extent.records + batch.len() as u64,
        };
        set_committed(&self.committed, &self.partition, self.extent)
    }

    fn release(&mut self) -> Result<(), JournalError> {
        let synced = self
            .file
            .sync_all()
            .map_err(|e| JournalError::write(format!("sync on close: {e}")));
        self.claim.take();
        synced
    }
}

#[derive(Debug)]
struct FileReader {
    partition: Partition,
    path: PathBuf,
    committed: CommittedMap,
}

impl FileReader {
    fn known_extent(&self) -> Result<Option<Committed>, JournalError> {
        Ok(self
            .committed
            .lock()
            .map_err(|_| JournalError::Poisoned("committed extents"))?
            .get(&self.partition)
            .copied())
    }

    /// Open the file limited to its durable prefix; `None` if it does not exist.
    fn open_bounded(&self) -> Result<Option<std::io::Take<File>>, JournalError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JournalError::read(format!("open {}: {e}", self.path.display()))),
        };

        let bound = match self.known_extent()? {
            Some(extent) => extent.bytes,
            None => file
                .metadata()
                .map_err(|e| JournalError::read(format!("stat {}: {e}", self.path.display())))?
                .len(),
        };

        Ok(Some(file.take(bound)))
    }
}

impl JournalReader for FileReader {
    fn partition(&self) -> &Partition {
        &self.partition
    }

    fn tip(&self) -> Result<u64, JournalError> {
        if let Some(extent) = self.known_extent()? {
            return Ok(extent.records);
        }
        let Some(file) = self.open_bounded()? else {
            return Ok(0);
        };
        let mut records = 0u64;
        for segment in BufReader::new(file).split(b'\n') {
            let segment = segment.map_err(|e| JournalError::read(e.to_string()))?;
            if !segment.is_empty() {
                records += 1;
            }
        }
        Ok(records)
    }

    fn records_from(&self, position: u64) -> Result<RecordIter, JournalError> {
        let Some(file) = self.open_bounded()? else {
            return Ok(Box::new(std::iter::empty()));
        };

        let lines = BufReader::new(file)
            .split(b'\n')
            .filter(|segment| !matches!(segment, Ok(bytes) if bytes.is_empty()))
            .enumerate()
            .skip(usize::try_from(position).unwrap_or(usize::MAX))
            .map(|(index, segment)| {
                let segment = segment.map_err(|e| JournalError::read(e.to_string()))?;
                decode(&segment, index as u64)
            });

        Ok(Box::new(lines))
    }
}
