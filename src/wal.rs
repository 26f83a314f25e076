use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Bytes of framing around each payload: length prefix + crc32 suffix.
const FRAME_OVERHEAD: u64 = 8;

/// Largest payload a record may carry. A longer length prefix is corruption.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Encode a single event as `[u32 len][bincode][u32 crc32]`, little endian.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "journal record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on EOF before the buffer fills.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next record. `Ok(None)` at end of file or at the first torn or
/// corrupt record; everything from there on is unusable.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, u64::from(len) + FRAME_OVERHEAD))),
        Err(_) => Ok(None),
    }
}

/// Result of reading a journal file from the start.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
    /// Trailing bytes that did not form a valid record.
    pub discarded: u64,
}

/// Append-only write-ahead log backing one tenant's ledger.
///
/// Each record is `[u32: len][bincode: Event][u32: crc32]`. A crash can leave a
/// torn last record; `open` cuts the file back to its intact prefix so later
/// appends stay readable.
///
/// Records are staged in memory and written by `flush_sync`. A failed flush
/// truncates the file back to its last durable length, so bytes of a batch
/// reported as failed never reach replay. If that truncation fails too the
/// log is poisoned and refuses further writes until reopened.
pub struct Wal {
    file: File,
    path: PathBuf,
    pending: Vec<u8>,
    pending_records: u64,
    durable_len: u64,
    poisoned: bool,
    appends_since_compact: u64,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Wal {
    /// Replay the log at `path`, drop any torn tail, and open it for appending.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        if replay.discarded > 0 {
            warn!(
                "journal {}: discarding {} trailing bytes after {} intact records",
                path.display(),
                replay.discarded,
                replay.events.len()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let wal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_records: 0,
            durable_len: replay.valid_len,
            poisoned: false,
            appends_since_compact: replay.events.len() as u64,
            #[cfg(test)]
            fail_next_sync: false,
        };
        Ok((wal, replay.events))
    }

    /// Read every intact record. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, size)) = decode_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += size;
        }
        replay.discarded = total.saturating_sub(replay.valid_len);
        Ok(replay)
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "journal poisoned by a failed rollback; reopen required",
            ));
        }
        Ok(())
    }

    /// Stage one record without writing. `flush_sync` makes the batch durable.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        let mark = self.pending.len();
        if let Err(e) = encode_record(&mut self.pending, event) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_records += 1;
        Ok(())
    }

    /// Drop every staged record.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_records = 0;
    }

    /// Write and fsync the staged records. On failure the staged records are
    /// dropped and the file is cut back to its previous durable length.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        match self.write_pending() {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.appends_since_compact += self.pending_records;
                self.discard_pending();
                Ok(())
            }
            Err(e) => {
                self.discard_pending();
                if let Err(rollback) = self.rollback() {
                    error!(
                        "journal {}: rollback to {} bytes failed: {rollback}",
                        self.path.display(),
                        self.durable_len
                    );
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    fn write_pending(&mut self) -> io::Result<()> {
        self.file.write_all(&self.pending)?;
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("injected fsync failure"));
        }
        self.file.sync_all()
    }

    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.durable_len)?;
        self.file.sync_all()
    }

    /// Make the next `flush_sync` fail after its bytes hit the file.
    #[cfg(test)]
    pub fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write the compacted record set next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.file = file;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }
}
