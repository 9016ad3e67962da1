/// Sliding anti-replay window for DTLS record sequence numbers
/// (RFC 6347 §4.1.2.6).
///
/// Tracks the highest authenticated sequence number of one epoch and a
/// 64-bit bitmap of the records just below it. The DTLS input side keeps
/// one window for the current read epoch and resets it on cipher change.
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    max_seq: u64,
    window: u64,
    seen_any: bool,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sequence number would be accepted, without marking it.
    ///
    /// Records are checked before decryption and only marked with
    /// [`ReplayWindow::update`] once they authenticate.
    pub fn is_fresh(&self, seqno: u64) -> bool {
        if !self.seen_any || seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        if offset >= 64 {
            return false;
        }
        (self.window & (1u64 << offset)) == 0
    }

    /// Mark a sequence number as received.
    pub fn update(&mut self, seqno: u64) {
        if !self.seen_any {
            self.seen_any = true;
            self.max_seq = seqno;
            self.window = 1;
        } else if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            self.window = if delta >= 64 { 0 } else { self.window << delta };
            self.window |= 1;
            self.max_seq = seqno;
        } else {
            let offset = self.max_seq - seqno;
            if offset < 64 {
                self.window |= 1u64 << offset;
            }
        }
    }

    /// Check and mark in one step.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.is_fresh(seqno) {
            return false;
        }
        self.update(seqno);
        true
    }

    /// Forget everything, used when the read epoch changes.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
