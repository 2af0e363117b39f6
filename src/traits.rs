//! Declaration of traits reused across the code.

/// Implementation of the LayoutDisplay trait.
/// It is used to display the layout of a given structure such as a disk or partition.
pub trait LayoutDisplay {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error>;
}

/// Receives coarse progress notifications, in percent.
///
/// Called inline on the scanning thread: implementations must return quickly.
/// Values are within `[0, 100]` but not guaranteed to be increasing.
pub trait ProgressSink {
    fn update(&self, percent: u8);
}

impl<F: Fn(u8)> ProgressSink for F {
    fn update(&self, percent: u8) {
        self(percent.min(100))
    }
}

/// Progress sink discarding every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _percent: u8) {}
}
