use std::fmt;

use crate::models::error::CaptureError;

type ReleaseFn<H> = Box<dyn FnOnce(H) -> Result<(), CaptureError> + Send>;

/// Exclusive owner of one native handle and the call that releases it.
///
/// `release` consumes the guard and reports the outcome. A guard that is
/// dropped without `release` (early return, unwinding) still releases the
/// handle and logs any failure. Guards declared later in a scope drop first,
/// so acquisition order gives reverse release order for free.
pub struct NativeResource<H: Copy + Send + 'static> {
    label: &'static str,
    handle: H,
    release: Option<ReleaseFn<H>>,
}

impl<H: Copy + Send + 'static> NativeResource<H> {
    pub fn new<F>(label: &'static str, handle: H, release: F) -> Self
    where
        F: FnOnce(H) -> Result<(), CaptureError> + Send + 'static,
    {
        log::debug!("Acquired {}", label);
        Self {
            label,
            handle,
            release: Some(Box::new(release)),
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Release the handle now.
    pub fn release(mut self) -> Result<(), CaptureError> {
        self.release_inner()
    }

    /// Give up ownership without releasing. The caller becomes responsible
    /// for the handle.
    pub fn into_raw(mut self) -> H {
        self.release = None;
        self.handle
    }

    fn release_inner(&mut self) -> Result<(), CaptureError> {
        let Some(release) = self.release.take() else {
            return Ok(());
        };
        log::debug!("Releasing {}", self.label);
        release(self.handle).map_err(|e| {
            CaptureError::TeardownFailed(format!("{}: {}", self.label, e))
        })
    }
}

impl<H: Copy + Send + 'static> Drop for NativeResource<H> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::error!("{}", e);
        }
    }
}

impl<H: Copy + Send + fmt::Debug + 'static> fmt::Debug for NativeResource<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeResource")
            .field("label", &self.label)
            .field("handle", &self.handle)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Collects the outcomes of a multi-step teardown.
///
/// Every step runs regardless of earlier failures; the first error is kept
/// and later ones are logged.
#[derive(Debug, Default)]
pub struct TeardownReport {
    first_error: Option<CaptureError>,
    failures: usize,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: Result<(), CaptureError>) {
        if let Err(e) = result {
            self.failures += 1;
            if self.first_error.is_none() {
                self.first_error = Some(e);
            } else {
                log::error!("Additional teardown failure: {}", e);
            }
        }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn finish(self) -> Result<(), CaptureError> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
