//! Append-only transaction journal.
//!
//! Every committed store transaction is one frame:
//!
//! ```text
//! magic (4) + version (2) + flags (1) + body_len (4) + body + crc32 (4)
//! ```
//!
//! The body is a CBOR batch of table mutations, AES-256-GCM sealed when
//! the store is encrypted (flag bit set). The CRC covers header and
//! body. A torn frame at the tail is truncated on open, so a crash
//! mid-commit always leaves the pre-transaction state; corruption
//! anywhere before the tail is fatal.

use crate::crypto::FrameCipher;
use crate::error::{StoreError, StoreResult};
use fieldsync_storage::JournalBackend;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FSJL";

/// Current journal format version.
pub const FRAME_VERSION: u16 = 1;

/// Frame flag: body is AES-256-GCM sealed.
pub const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// magic (4) + version (2) + flags (1) + body_len (4).
const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// A persisted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Table {
    /// `pending_records`.
    Pending,
    /// `sync_metadata` (singleton row).
    Metadata,
    /// `quarantined_records`.
    Quarantine,
    /// `sync_log_entries`.
    Log,
    /// `storage_metrics` (singleton row).
    Metrics,
}

/// One table mutation inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableOp {
    /// Insert or replace a row.
    Put {
        /// Target table.
        table: Table,
        /// Row key bytes.
        key: Vec<u8>,
        /// CBOR row value.
        value: Vec<u8>,
    },
    /// Delete a row.
    Delete {
        /// Target table.
        table: Table,
        /// Row key bytes.
        key: Vec<u8>,
    },
}

/// The append-only journal over a byte-store backend.
pub struct Journal {
    backend: Box<dyn JournalBackend>,
    cipher: Option<FrameCipher>,
}

impl Journal {
    /// Creates a journal over a backend, optionally encrypted.
    #[must_use]
    pub fn new(backend: Box<dyn JournalBackend>, cipher: Option<FrameCipher>) -> Self {
        Self { backend, cipher }
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Commits one transaction as a single durable frame.
    ///
    /// The frame is flushed and synced before this returns, so a
    /// committed transaction survives process termination.
    pub fn commit(&mut self, ops: &[TableOp]) -> StoreResult<()> {
        let mut body = Vec::new();
        ciborium::into_writer(&ops, &mut body).map_err(StoreError::codec)?;

        let mut flags = 0u8;
        if let Some(cipher) = &self.cipher {
            body = cipher.seal(&body)?;
            flags |= FLAG_ENCRYPTED;
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        frame.push(flags);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        self.backend.append(&frame)?;
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Replays all committed transactions in order.
    ///
    /// A torn frame at the tail is truncated away (crash recovery);
    /// corruption before the tail returns [`StoreError::Corrupted`].
    pub fn replay(&mut self) -> StoreResult<Vec<TableOp>> {
        let size = self.backend.size()? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.backend.read_at(0, size)?;

        let mut ops = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < HEADER_SIZE {
                self.truncate_tail(offset)?;
                break;
            }

            let header = &bytes[offset..offset + HEADER_SIZE];
            if header[..4] != FRAME_MAGIC {
                return Err(StoreError::Corrupted(format!(
                    "bad frame magic at offset {offset}"
                )));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version != FRAME_VERSION {
                return Err(StoreError::Corrupted(format!(
                    "unsupported journal version {version}"
                )));
            }
            let flags = header[6];
            let body_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

            let frame_len = HEADER_SIZE + body_len + CRC_SIZE;
            if remaining < frame_len {
                self.truncate_tail(offset)?;
                break;
            }

            let frame_end = offset + frame_len;
            let crc_stored = u32::from_le_bytes([
                bytes[frame_end - 4],
                bytes[frame_end - 3],
                bytes[frame_end - 2],
                bytes[frame_end - 1],
            ]);
            let crc_actual = compute_crc32(&bytes[offset..frame_end - CRC_SIZE]);
            if crc_stored != crc_actual {
                if frame_end == bytes.len() {
                    // Partially overwritten tail frame counts as torn.
                    self.truncate_tail(offset)?;
                    break;
                }
                return Err(StoreError::Corrupted(format!(
                    "checksum mismatch at offset {offset}"
                )));
            }

            let body = &bytes[offset + HEADER_SIZE..frame_end - CRC_SIZE];
            let plain = if flags & FLAG_ENCRYPTED != 0 {
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    StoreError::Encryption("journal is encrypted, a key is required".into())
                })?;
                cipher.open(body)?
            } else {
                body.to_vec()
            };

            let frame_ops: Vec<TableOp> =
                ciborium::from_reader(plain.as_slice()).map_err(StoreError::codec)?;
            ops.extend(frame_ops);

            offset = frame_end;
        }

        Ok(ops)
    }

    /// Rewrites the journal to a single frame holding the live state.
    ///
    /// Used by compaction: drops all garbage from superseded frames.
    pub fn rewrite(&mut self, ops: &[TableOp]) -> StoreResult<()> {
        self.backend.truncate(0)?;
        if ops.is_empty() {
            self.backend.flush()?;
            self.backend.sync()?;
            return Ok(());
        }
        self.commit(ops)
    }

    fn truncate_tail(&mut self, valid_end: usize) -> StoreResult<()> {
        tracing::warn!(
            valid_end,
            "dropping torn frame from journal tail during recovery"
        );
        self.backend.truncate(valid_end as u64)?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use fieldsync_storage::InMemoryBackend;

    fn put(table: Table, key: u8, value: u8) -> TableOp {
        TableOp::Put {
            table,
            key: vec![key],
            value: vec![value],
        }
    }

    #[test]
    fn crc32_known_value() {
        // Standard CRC32 test vector
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0x0000_0000);
    }

    #[test]
    fn commit_replay_roundtrip() {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()), None);

        journal.commit(&[put(Table::Pending, 1, 10)]).unwrap();
        journal
            .commit(&[put(Table::Pending, 2, 20), put(Table::Metadata, 0, 1)])
            .unwrap();

        let ops = journal.replay().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], put(Table::Pending, 1, 10));
        assert_eq!(ops[2], put(Table::Metadata, 0, 1));
    }

    /// Writes two frames and returns (journal bytes, first frame end).
    fn two_frame_stream() -> (Vec<u8>, usize) {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()), None);
        journal.commit(&[put(Table::Pending, 1, 10)]).unwrap();
        let first_frame_end = journal.size().unwrap() as usize;
        journal.commit(&[put(Table::Pending, 2, 20)]).unwrap();
        let size = journal.size().unwrap() as usize;
        (journal.backend.read_at(0, size).unwrap(), first_frame_end)
    }

    #[test]
    fn torn_tail_is_truncated() {
        let (mut stream, first_frame_end) = two_frame_stream();

        // Cut the second frame short, as a crash mid-append would.
        stream.truncate(first_frame_end + 7);

        let mut recovered =
            Journal::new(Box::new(InMemoryBackend::with_data(stream)), None);
        assert_eq!(recovered.replay().unwrap(), vec![put(Table::Pending, 1, 10)]);
        // Tail dropped from the backend too.
        assert_eq!(recovered.size().unwrap() as usize, first_frame_end);
    }

    #[test]
    fn corruption_before_tail_is_fatal() {
        let (mut stream, _) = two_frame_stream();

        // Flip a byte inside the first frame's body.
        stream[HEADER_SIZE + 1] ^= 0xFF;

        let mut journal = Journal::new(Box::new(InMemoryBackend::with_data(stream)), None);
        assert!(matches!(journal.replay(), Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn encrypted_journal_roundtrip() {
        let key = EncryptionKey::generate();

        let stream;
        {
            let mut j = Journal::new(
                Box::new(InMemoryBackend::new()),
                Some(FrameCipher::new(&key)),
            );
            j.commit(&[put(Table::Pending, 1, 10)]).unwrap();
            let size = j.size().unwrap() as usize;
            stream = j.backend.read_at(0, size).unwrap();
        }

        let mut reopened = Journal::new(
            Box::new(InMemoryBackend::with_data(stream.clone())),
            Some(FrameCipher::new(&key)),
        );
        assert_eq!(reopened.replay().unwrap(), vec![put(Table::Pending, 1, 10)]);

        // Wrong key fails authentication.
        let mut wrong = Journal::new(
            Box::new(InMemoryBackend::with_data(stream.clone())),
            Some(FrameCipher::new(&EncryptionKey::generate())),
        );
        assert!(matches!(wrong.replay(), Err(StoreError::Encryption(_))));

        // Missing key is rejected up front.
        let mut keyless = Journal::new(Box::new(InMemoryBackend::with_data(stream)), None);
        assert!(matches!(keyless.replay(), Err(StoreError::Encryption(_))));
    }

    #[test]
    fn rewrite_compacts_to_live_state() {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()), None);
        journal.commit(&[put(Table::Pending, 1, 10)]).unwrap();
        journal.commit(&[put(Table::Pending, 2, 20)]).unwrap();
        journal
            .commit(&[TableOp::Delete {
                table: Table::Pending,
                key: vec![1],
            }])
            .unwrap();
        let before = journal.size().unwrap();

        journal.rewrite(&[put(Table::Pending, 2, 20)]).unwrap();
        assert!(journal.size().unwrap() < before);
        assert_eq!(journal.replay().unwrap(), vec![put(Table::Pending, 2, 20)]);
    }
}
