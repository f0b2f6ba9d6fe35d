use crc32fast::Hasher;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;
use vibebuff_core::error::{ErrorCode, VibebuffError};

const HEADER_LEN: u64 = 16;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Data integrity error (CRC mismatch)")]
    CrcMismatch,
    #[error("Corrupt entry")]
    CorruptEntry,
    #[error("Entry of {0} bytes exceeds the record size limit")]
    EntryTooLarge(usize),
}

impl VibebuffError for WalError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

/// Append-only log. Appended records are buffered in memory and only reach
/// the file on [`Wal::flush`]; a failed flush rolls the file and the LSN back
/// to the last durable record.
pub struct Wal {
    file: File,
    pending: Vec<u8>,
    current_lsn: AtomicU64,
    durable_lsn: u64,
    durable_len: u64,
    // Set when a rollback could not truncate; retried before the next write.
    needs_truncate: bool,
    #[cfg(test)]
    fail_next_write: bool,
}

impl Wal {
    /// Open a WAL file, creating it if needed. Call [`Wal::replay`] to
    /// restore the LSN of an existing log.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;
        let durable_len = file.metadata().await?.len();

        Ok(Self {
            file,
            pending: Vec::new(),
            current_lsn: AtomicU64::new(0),
            durable_lsn: 0,
            durable_len,
            needs_truncate: false,
            #[cfg(test)]
            fail_next_write: false,
        })
    }

    /// Append an entry to the WAL. Returns the assigned LSN.
    /// Format: [LSN: 8 bytes][CRC: 4 bytes][Len: 4 bytes][Payload: Len bytes]
    pub async fn append(&mut self, payload: &[u8]) -> Result<u64, WalError> {
        let len =
            u32::try_from(payload.len()).map_err(|_| WalError::EntryTooLarge(payload.len()))?;
        let lsn = self.current_lsn.fetch_add(1, Ordering::SeqCst) + 1;

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        self.pending.extend_from_slice(&lsn.to_be_bytes());
        self.pending.extend_from_slice(&crc.to_be_bytes());
        self.pending.extend_from_slice(&len.to_be_bytes());
        self.pending.extend_from_slice(payload);

        Ok(lsn)
    }

    /// Write buffered records and fsync. On failure nothing buffered since
    /// the last successful flush survives, on disk or in the LSN sequence.
    pub async fn flush(&mut self) -> Result<(), WalError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        match self.write_pending().await {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.durable_lsn = self.current_lsn();
                self.pending.clear();
                Ok(())
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }

    pub fn current_lsn(&self) -> u64 {
        self.current_lsn.load(Ordering::SeqCst)
    }

    async fn write_pending(&mut self) -> Result<(), WalError> {
        if self.needs_truncate {
            self.file.set_len(self.durable_len).await?;
            self.needs_truncate = false;
        }

        #[cfg(test)]
        {
            if std::mem::take(&mut self.fail_next_write) {
                // Half the batch lands before the device gives up.
                let half = self.pending.len() / 2;
                self.file.write_all(&self.pending[..half]).await?;
                return Err(WalError::Io(std::io::Error::other("injected write failure")));
            }
        }

        self.file.write_all(&self.pending).await?;
        self.file.sync_all().await?;
        Ok(())
    }

    async fn rollback(&mut self) {
        self.pending.clear();
        self.current_lsn.store(self.durable_lsn, Ordering::SeqCst);
        if let Err(err) = self.file.set_len(self.durable_len).await {
            warn!(
                error = %err,
                durable_len = self.durable_len,
                "WAL rollback truncate failed, retrying on next write"
            );
            self.needs_truncate = true;
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_write_failure(&mut self) {
        self.fail_next_write = true;
    }

    /// Replays the WAL from the beginning and returns the last valid LSN.
    /// A torn entry at the tail is truncated.
    pub async fn replay<F>(&mut self, mut callback: F) -> Result<u64, WalError>
    where
        F: FnMut(u64, Vec<u8>) -> Result<(), WalError>,
    {
        self.flush().await?;
        let file = &mut self.file;
        let file_len = file.metadata().await?.len();
        file.seek(std::io::SeekFrom::Start(0)).await?;

        let mut last_lsn = 0;
        let mut valid_end_pos = 0;

        loop {
            // A crash can cut the header itself short.
            let mut header = [0u8; HEADER_LEN as usize];
            match file.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            }
            let lsn = u64::from_be_bytes([
                header[0], header[1], header[2], header[3], header[4], header[5], header[6],
                header[7],
            ]);
            let crc = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
            let len =
                u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as u64;

            // Never allocate more than the file can still hold.
            if len > file_len.saturating_sub(valid_end_pos + HEADER_LEN) {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            match file.read_exact(&mut payload).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != crc {
                return Err(WalError::CrcMismatch);
            }

            callback(lsn, payload)?;
            last_lsn = lsn;
            valid_end_pos += HEADER_LEN + len;
        }

        if valid_end_pos < file_len {
            warn!(valid_end_pos, "truncating torn WAL tail");
            file.set_len(valid_end_pos).await?;
        }

        file.seek(std::io::SeekFrom::End(0)).await?;
        self.current_lsn.store(last_lsn, Ordering::SeqCst);
        self.durable_lsn = last_lsn;
        self.durable_len = valid_end_pos;

        Ok(last_lsn)
    }
}
