//! Session progress: fixed bands per phase, never decreasing.

/// Reported once the transport is open
pub const CONNECTED: u8 = 10;
/// Reported once init and metadata have been written
pub const NEGOTIATED: u8 = 20;
/// Start of the upload band
pub const UPLOAD_START: u8 = 40;
/// End of the upload band, reached exactly when the last chunk is sent
pub const UPLOAD_END: u8 = 70;
/// Terminal value
pub const COMPLETE: u8 = 100;

/// Map `sent / total` chunks into the upload band
pub fn upload_progress(sent: usize, total: usize) -> u8 {
    if total == 0 || sent >= total {
        return UPLOAD_END;
    }
    let band = usize::from(UPLOAD_END - UPLOAD_START);
    UPLOAD_START + (band * sent / total) as u8
}

/// Monotonic progress cursor for one session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTracker {
    current: u8,
}

impl ProgressTracker {
    /// Current value (0 to 100)
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Raise progress to at least `value`
    ///
    /// Returns the new value when it moved, `None` when `value` would not
    /// advance it.
    pub fn raise(&mut self, value: u8) -> Option<u8> {
        let value = value.min(COMPLETE);
        if value > self.current {
            self.current = value;
            Some(value)
        } else {
            None
        }
    }
}
