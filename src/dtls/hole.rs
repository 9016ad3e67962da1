use crate::Error;

/// A `[offset, limit)` range of a handshake message body not received yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoleDescriptor {
    pub offset: u32,
    pub limit: u32,
}

/// Missing ranges of one handshake message. Empty when complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoleSet {
    message_seq: u16,
    message_length: u32,
    holes: Vec<HoleDescriptor>,
}

impl HoleSet {
    pub fn new(message_seq: u16, message_length: u32) -> Self {
        let holes = if message_length == 0 {
            vec![]
        } else {
            vec![HoleDescriptor {
                offset: 0,
                limit: message_length,
            }]
        };
        HoleSet {
            message_seq,
            message_length,
            holes,
        }
    }

    pub fn message_seq(&self) -> u16 {
        self.message_seq
    }

    pub fn message_length(&self) -> u32 {
        self.message_length
    }

    pub fn is_complete(&self) -> bool {
        self.holes.is_empty()
    }

    pub fn holes(&self) -> &[HoleDescriptor] {
        &self.holes
    }

    /// Whether a fragment claims the same message this set tracks.
    pub fn is_consistent(&self, message_seq: u16, message_length: u32) -> bool {
        self.message_seq == message_seq && self.message_length == message_length
    }

    /// Everything arrived at once.
    pub fn clear(&mut self) {
        self.holes.clear();
    }

    /// Account for the fragment `[offset, offset + length)`.
    ///
    /// A fragment either lies inside one hole, possibly splitting it, or
    /// does not touch any hole at all. One that straddles a hole boundary
    /// is discarded.
    pub fn fill(&mut self, offset: u32, length: u32) -> Result<(), Error> {
        let limit = offset + length;

        for i in 0..self.holes.len() {
            let hole = self.holes[i];
            if hole.limit <= offset || hole.offset >= limit {
                continue;
            }

            if (hole.offset > offset && hole.offset < limit)
                || (hole.limit > offset && hole.limit < limit)
            {
                return Err(Error::Discard("handshake fragment ranges are overlapping"));
            }

            self.holes.remove(i);
            let mut at = i;
            if offset > hole.offset {
                self.holes.insert(
                    at,
                    HoleDescriptor {
                        offset: hole.offset,
                        limit: offset,
                    },
                );
                at += 1;
            }
            if limit < hole.limit {
                self.holes.insert(
                    at,
                    HoleDescriptor {
                        offset: limit,
                        limit: hole.limit,
                    },
                );
            }

            // Holes never overlap, so no other hole is affected.
            break;
        }

        Ok(())
    }
}
