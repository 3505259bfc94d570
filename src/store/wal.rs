use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Largest payload accepted on replay. Anything bigger is treated as a torn
/// length prefix.
const MAX_RECORD_BYTES: usize = 1 << 20;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one record. `Ok(None)` means clean end of log or a torn/corrupt tail.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_BYTES {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
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
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

/// `read_exact` that reports EOF as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only reservation log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// A truncated last entry (crash mid-write) is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
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

    /// Replace the log with `events`: write a temp file, fsync, rename over.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All valid events on disk, oldest first. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = decode_event(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReservationStatus;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roadstay_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn status_event(status: ReservationStatus) -> Event {
        Event::ReservationStatusChanged {
            id: Ulid::new(),
            unit_id: Ulid::new(),
            status,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            status_event(ReservationStatus::Confirmed),
            Event::ReservationDeleted { id: Ulid::new(), unit_id: Ulid::new() },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = status_event(ReservationStatus::Rejected);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let event = status_event(ReservationStatus::Confirmed);
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn rewrite_then_append() {
        let path = tmp_path("rewrite_append.wal");
        let kept = status_event(ReservationStatus::Confirmed);
        let later = status_event(ReservationStatus::Rejected);
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..10 {
                wal.append(&status_event(ReservationStatus::Pending)).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 10);
            wal.rewrite(std::slice::from_ref(&kept)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
    }
}
