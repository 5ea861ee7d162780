use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Encode one commit as `[len][bincode(Vec<Event>)][crc32]`.
fn encode_record(events: &[Event]) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "WAL record too large"))?;
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

/// Read the next record. `Ok(None)` on a clean end, a torn tail, or a bad checksum.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Vec<Event>, u64)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    for buf in [&mut payload[..], &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
        return Ok(None);
    }
    match bincode::deserialize::<Vec<Event>>(&payload) {
        Ok(events) => Ok(Some((events, 8 + len as u64))),
        Err(_) => Ok(None),
    }
}

/// Append-only write-ahead log of calendar changes.
///
/// Each record is one commit: every event of a booking (or a batch of date blocks)
/// sits behind a single length prefix and checksum, so a crash mid-write loses the
/// whole commit rather than half of it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    records_since_compact: u64,
    /// File length and record count as of the last successful `flush_sync`.
    durable_len: u64,
    durable_records: u64,
    /// Set while a rollback is outstanding. Appends retry it first.
    poisoned: bool,
}

/// What a replay recovered.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    pub records: u64,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
}

impl Wal {
    /// Open (or create) the WAL at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            records_since_compact: 0,
            durable_len,
            durable_records: 0,
            poisoned: false,
        })
    }

    /// Replay the log, cut off any torn or corrupt tail, and open for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > replay.valid_len
        {
            warn!(
                path = %path.display(),
                discarded = meta.len() - replay.valid_len,
                "truncating damaged WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let mut wal = Self::open(path)?;
        wal.records_since_compact = replay.records;
        wal.durable_records = replay.records;
        Ok((wal, replay.events))
    }

    /// Read every intact record. Stops at the first damaged one.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((events, size)) = decode_record(&mut reader)? {
            replay.events.extend(events);
            replay.records += 1;
            replay.valid_len += size;
        }
        Ok(replay)
    }

    /// Frame a commit without touching the file.
    pub fn encode(events: &[Event]) -> io::Result<Vec<u8>> {
        encode_record(events)
    }

    /// Buffer one framed commit. Nothing is durable until [`Wal::flush_sync`].
    pub fn append_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.poisoned {
            self.rollback()?;
        }
        self.writer.write_all(frame)?;
        self.records_since_compact += 1;
        Ok(())
    }

    pub fn append_buffered(&mut self, events: &[Event]) -> io::Result<()> {
        let frame = encode_record(events)?;
        self.append_frame(&frame)
    }

    /// Flush buffered commits and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len = self.writer.get_ref().metadata()?.len();
        self.durable_records = self.records_since_compact;
        Ok(())
    }

    /// Discard everything appended since the last successful [`Wal::flush_sync`],
    /// buffered or already written, and truncate the file back to that point.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.poisoned = true;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts drops the unwritten buffer instead of flushing it
        let _ = stale.into_parts();
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.records_since_compact = self.durable_records;
        self.poisoned = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.append_buffered(events)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot to `<path>.tmp` and fsync. One record per calendar.
    pub fn write_compact_file(path: &Path, records: &[Vec<Event>]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for events in records.iter().filter(|r| !r.is_empty()) {
            writer.write_all(&encode_record(events)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        #[cfg(unix)]
        {
            if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                File::open(dir)?.sync_all()?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.records_since_compact = 0;
        self.durable_records = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.records_since_compact
    }
}
