//! TLS over a byte stream.
//!
//! Input arrives in arbitrary pieces. Partial records are buffered until
//! complete, so every call consumes all of its input.

use std::sync::Arc;

use super::tls::{TlsReader, TlsWriter};
use super::Decoded;
use crate::buffer::Buf;
use crate::types::ContentType;
use crate::{Config, Error};

/// Outbound records are concatenated into one byte buffer.
pub type TlsStreamOutput = TlsWriter<Buf>;

#[derive(Debug)]
pub struct TlsStreamInput {
    reader: TlsReader,
    pending: Buf,
}

impl TlsStreamInput {
    pub fn new(config: Arc<Config>) -> Self {
        TlsStreamInput {
            reader: TlsReader::new(config),
            pending: Buf::new(),
        }
    }

    pub fn reader(&self) -> &TlsReader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut TlsReader {
        &mut self.reader
    }

    /// Bytes buffered towards the next record.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn decode(&mut self, data: &[u8]) -> Result<Decoded, Error> {
        self.pending.extend_from_slice(data);
        let mut plaintexts = Vec::new();

        while let Some(frame) = self.reader.bytes_in_complete_packet(&self.pending)? {
            if self.pending.len() < frame.len {
                trace!("Need {} bytes, have {}", frame.len, self.pending.len());
                break;
            }
            let plaintext = self.reader.decode_record(&self.pending[..frame.len], frame)?;
            self.pending.drain_front(frame.len);

            let is_ccs = plaintext.content_type == ContentType::ChangeCipherSpec;
            plaintexts.push(plaintext);
            if is_ccs {
                break;
            }
        }

        Ok(Decoded {
            plaintexts,
            consumed: data.len(),
        })
    }
}
