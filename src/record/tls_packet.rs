//! TLS over caller-framed packets.
//!
//! Nothing is buffered between calls. A call decodes the whole records
//! at the front of its input and reports how much it took; a trailing
//! partial record is left for the caller to resubmit with more bytes.

use std::collections::VecDeque;
use std::sync::Arc;

use super::tls::{TlsReader, TlsWriter};
use super::Decoded;
use crate::buffer::Buf;
use crate::types::ContentType;
use crate::{Config, Error};

/// One queued buffer per outbound record.
pub type TlsPacketOutput = TlsWriter<VecDeque<Buf>>;

#[derive(Debug)]
pub struct TlsPacketInput {
    reader: TlsReader,
}

impl TlsPacketInput {
    pub fn new(config: Arc<Config>) -> Self {
        TlsPacketInput {
            reader: TlsReader::new(config),
        }
    }

    pub fn reader(&self) -> &TlsReader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut TlsReader {
        &mut self.reader
    }

    /// Size of the first record in `data`, if its header is complete.
    pub fn bytes_in_complete_packet(&mut self, data: &[u8]) -> Result<Option<usize>, Error> {
        Ok(self.reader.bytes_in_complete_packet(data)?.map(|f| f.len))
    }

    pub fn decode(&mut self, data: &[u8]) -> Result<Decoded, Error> {
        let mut plaintexts = Vec::new();
        let mut consumed = 0;

        while let Some(frame) = self.reader.bytes_in_complete_packet(&data[consumed..])? {
            let rest = &data[consumed..];
            if rest.len() < frame.len {
                break;
            }
            let plaintext = self.reader.decode_record(&rest[..frame.len], frame)?;
            consumed += frame.len;

            let is_ccs = plaintext.content_type == ContentType::ChangeCipherSpec;
            plaintexts.push(plaintext);
            if is_ccs {
                break;
            }
        }

        Ok(Decoded {
            plaintexts,
            consumed,
        })
    }
}
