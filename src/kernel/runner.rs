//! Background driver ticking a kernel at its configured frequency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{error, info};

use super::{CognitiveKernel, KernelError};

/// Owns a kernel on a dedicated thread until [`stop`](KernelRunner::stop)
/// hands it back.
#[derive(Debug)]
pub struct KernelRunner {
    handle: Option<JoinHandle<CognitiveKernel>>,
    shutdown: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
}

impl KernelRunner {
    /// Mark the kernel running and move it onto a worker thread. The loop
    /// exits on the first tick error; the kernel is still returned by `stop`.
    pub fn spawn(mut kernel: CognitiveKernel) -> Result<Self, KernelError> {
        kernel.start()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));
        let interval = kernel.config().integration.tick_interval();

        let flag = Arc::clone(&shutdown);
        let counter = Arc::clone(&cycles);
        let handle = thread::Builder::new()
            .name("cognitive-kernel".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    if let Err(err) = kernel.tick() {
                        error!(error = %err, "kernel runner stopping");
                        break;
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                    if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                        thread::park_timeout(remaining);
                    }
                }
                kernel.stop();
                kernel
            })
            .map_err(KernelError::Spawn)?;

        info!(interval_ms = interval.as_millis() as u64, "kernel runner spawned");
        Ok(Self {
            handle: Some(handle),
            shutdown,
            cycles,
        })
    }

    /// Ticks completed by the worker so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker, wait for the current tick and take the kernel back.
    pub fn stop(mut self) -> Result<CognitiveKernel, KernelError> {
        self.join()
    }

    fn join(&mut self) -> Result<CognitiveKernel, KernelError> {
        self.shutdown.store(true, Ordering::Release);
        let handle = self.handle.take().ok_or(KernelError::WorkerPanicked)?;
        handle.thread().unpark();
        handle.join().map_err(|_| KernelError::WorkerPanicked)
    }
}

impl Drop for KernelRunner {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::KernelStatus;

    #[test]
    fn runner_ticks_and_returns_the_kernel() {
        let mut config = KernelConfig::default();
        config.integration.tick_frequency = 200.0;
        let kernel = CognitiveKernel::new(config).unwrap();

        let runner = KernelRunner::spawn(kernel).unwrap();
        assert!(runner.is_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.cycles() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let kernel = runner.stop().unwrap();
        assert!(kernel.cycle_count() >= 3);
        assert_eq!(kernel.status(), KernelStatus::Paused);
    }

    #[test]
    fn shut_down_kernel_cannot_be_spawned() {
        let mut kernel = CognitiveKernel::new(KernelConfig::default()).unwrap();
        kernel.shutdown();
        assert!(matches!(
            KernelRunner::spawn(kernel),
            Err(KernelError::Shutdown)
        ));
    }
}
