mod test_pattern;
mod v4l_capture;

pub use test_pattern::TestPatternSource;
pub use v4l_capture::WebcamCapture;

use crate::error::Result;
use crate::raster::{Dimensions, Raster};
use tokio::runtime::{Handle, RuntimeFlavor};

/// Trait for live frame sources
pub trait FrameSource {
    /// Read the current frame, already sized to `dimensions()`.
    ///
    /// Fails with `NoFrameAvailable` while the stream has not started or
    /// after it has ended.
    fn current_frame(&mut self) -> Result<Raster>;

    /// Get the size of yielded frames
    fn dimensions(&self) -> Dimensions;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn current_frame(&mut self) -> Result<Raster> {
        (**self).current_frame()
    }

    fn dimensions(&self) -> Dimensions {
        (**self).dimensions()
    }
}

/// Run a blocking device read from inside a cycle.
///
/// On a multi-threaded runtime the worker hands its other tasks off first,
/// so a slow camera does not stall timers or background decodes. Elsewhere
/// the read runs inline.
pub(crate) fn read_blocking<T>(read: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(read)
        }
        _ => read(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_inline_outside_runtime() {
        assert_eq!(read_blocking(|| 7), 7);
    }

    #[tokio::test]
    async fn reads_inline_on_current_thread_runtime() {
        assert_eq!(read_blocking(|| "frame"), "frame");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_runtime_keeps_ticking_during_read() {
        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        });
        let value = read_blocking(|| {
            std::thread::sleep(std::time::Duration::from_millis(50));
            42
        });
        assert_eq!(value, 42);
        assert!(ticker.await.is_ok());
    }
}
