//! Per-transfer progress estimation.
//!
//! Transports report raw byte counts, which may be compressed on the wire and
//! so disagree with the size declared in the manifest. [`TransferProgress`]
//! maps those reports onto the declared size so the session total adds up.

/// Estimates how many of a file's declared bytes have been received.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    declared_size: u64,
    credited: u64,
    last_raw: u64,
}

impl TransferProgress {
    /// Start tracking a transfer of `declared_size` bytes.
    pub fn new(declared_size: u64) -> Self {
        Self {
            declared_size,
            credited: 0,
            last_raw: 0,
        }
    }

    /// Bytes credited so far.
    pub fn credited(&self) -> u64 {
        self.credited
    }

    /// Record a transport report and return the bytes to add to the
    /// session total.
    ///
    /// When the transport knows a total that differs from the declared size,
    /// the received count is scaled by `declared / total`. The credit is the
    /// larger of that estimate and the raw bytes seen since the last report,
    /// and never exceeds the declared size.
    pub fn record(&mut self, loaded: u64, total: Option<u64>) -> u64 {
        let scaled = match total {
            Some(total) if total > 0 && total != self.declared_size => {
                ((self.declared_size as u128 * loaded as u128) / total as u128) as u64
            }
            _ => loaded,
        };
        let raw_delta = loaded.saturating_sub(self.last_raw);
        self.last_raw = self.last_raw.max(loaded);

        let target = scaled.max(self.credited.saturating_add(raw_delta));
        self.advance_to(target.min(self.declared_size))
    }

    /// Mark the transfer complete and return the remaining bytes to credit.
    pub fn complete(&mut self) -> u64 {
        self.advance_to(self.declared_size)
    }

    fn advance_to(&mut self, target: u64) -> u64 {
        let delta = target.saturating_sub(self.credited);
        self.credited += delta;
        delta
    }
}
