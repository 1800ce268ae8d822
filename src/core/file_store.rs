// On-disk cache backend: one directory per (version, table) with a JSON state
// record and a checksummed JSONL record set.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};
use crate::core::model::{Record, VersionedKey};
use crate::core::store::{CacheBackend, CacheEntry};

const STATE_FILE: &str = "state.json";
const RECORDS_FILE: &str = "records.jsonl";
const LOCK_FILE: &str = ".lock";
const RECORDS_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RecordsHeader {
    format: u32,
    count: usize,
    sha256: String,
}

#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &VersionedKey) -> PathBuf {
        self.root.join(key.version()).join(key.table())
    }

    fn ensure_entry_dir(&self, key: &VersionedKey) -> Result<PathBuf, Error> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create cache directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        Ok(dir)
    }

    fn write_lock(&self, dir: &Path) -> Result<WriteLock, Error> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        file.lock_exclusive().map_err(|err| {
            let mut error = Error::new(ErrorKind::Io)
                .with_message("failed to lock cache entry")
                .with_path(&path);
            if is_permission_error(&err) {
                error = error.with_hint("Check permissions on the cache directory.");
            }
            error.with_source(err)
        })?;
        Ok(WriteLock { file })
    }
}

struct WriteLock {
    file: File,
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_permission_error(err: &io::Error) -> bool {
    let errno = err.raw_os_error().unwrap_or_default();
    errno == EACCES || errno == EPERM || err.kind() == io::ErrorKind::PermissionDenied
}

impl CacheBackend for FileStore {
    fn read_entry(&self, key: &VersionedKey) -> Result<Option<CacheEntry>, Error> {
        let path = self.entry_dir(key).join(STATE_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read cache state")
                    .with_path(&path)
                    .with_source(err));
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                tracing::warn!(key = %key, path = %path.display(), error = %err, "ignoring unreadable cache state");
                Ok(None)
            }
        }
    }

    fn write_entry(&self, key: &VersionedKey, entry: &CacheEntry) -> Result<(), Error> {
        let dir = self.ensure_entry_dir(key)?;
        let bytes = serde_json::to_vec(entry).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode cache state")
                .with_source(err)
        })?;
        write_replace(&dir.join(STATE_FILE), &bytes)
    }

    fn write_records(&self, key: &VersionedKey, records: Vec<Record>) -> Result<(), Error> {
        let dir = self.ensure_entry_dir(key)?;
        let _lock = self.write_lock(&dir)?;
        let path = dir.join(RECORDS_FILE);
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(key = %key, "deleted previous record set"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to delete previous record set")
                    .with_path(&path)
                    .with_source(err));
            }
        }
        let bytes = encode_records(&records)?;
        write_replace(&path, &bytes)
    }

    fn read_records(&self, key: &VersionedKey) -> Result<Vec<Record>, Error> {
        let path = self.entry_dir(key).join(RECORDS_FILE);
        let bytes = fs::read(&path).map_err(|err| {
            let kind = if err.kind() == io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message("failed to read record set")
                .with_key(key)
                .with_path(&path)
                .with_source(err)
        })?;
        decode_records(&bytes).map_err(|err| err.with_key(key).with_path(&path))
    }
}

fn encode_records(records: &[Record]) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    for record in records {
        serde_json::to_writer(&mut body, record).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode record")
                .with_source(err)
        })?;
        body.push(b'\n');
    }

    let header = RecordsHeader {
        format: RECORDS_FORMAT,
        count: records.len(),
        sha256: hex_digest(&body),
    };
    let mut out = serde_json::to_vec(&header).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode record set header")
            .with_source(err)
    })?;
    out.push(b'\n');
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_records(bytes: &[u8]) -> Result<Vec<Record>, Error> {
    let split = bytes
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("record set header missing"))?;
    let (header, body) = (&bytes[..split], &bytes[split + 1..]);
    let header: RecordsHeader = serde_json::from_slice(header).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid record set header")
            .with_source(err)
    })?;
    if header.format != RECORDS_FORMAT {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported record set format"));
    }
    if hex_digest(body) != header.sha256 {
        return Err(Error::new(ErrorKind::Corrupt).with_message("record set checksum mismatch"));
    }

    let mut records = Vec::with_capacity(header.count);
    for line in body.split(|byte| *byte == b'\n').filter(|line| !line.is_empty()) {
        let record = serde_json::from_slice(line).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("invalid stored record")
                .with_source(err)
        })?;
        records.push(record);
    }
    if records.len() != header.count {
        return Err(Error::new(ErrorKind::Corrupt).with_message("record count mismatch"));
    }
    Ok(records)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

// Write to a sibling temp file, then rename over the target.
fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    let io_err = |err: io::Error, target: &Path| {
        Error::new(ErrorKind::Io).with_path(target).with_source(err)
    };

    let mut file = File::create(&tmp).map_err(|err| io_err(err, &tmp))?;
    file.write_all(bytes).map_err(|err| io_err(err, &tmp))?;
    file.sync_all().map_err(|err| io_err(err, &tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|err| io_err(err, path))
}
