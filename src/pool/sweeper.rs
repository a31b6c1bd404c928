//! Background sweeper thread.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::Shared;
use crate::error::{ContainerError, ContainerResult};

/// Runs `evict_aged` on a pool every sweep interval until stopped.
///
/// The thread only holds a weak reference to the pool so a forgotten sweeper
/// never keeps a dropped pool alive.
pub(crate) struct Sweeper {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn spawn<T: Send + 'static>(pool: Weak<Shared<T>>, interval: Duration, name: String) -> ContainerResult<Self> {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = signal.clone();

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let (stopped, wake) = &*thread_signal;
                loop {
                    {
                        let mut stopped = stopped.lock();
                        if !*stopped {
                            wake.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    match pool.upgrade() {
                        Some(shared) => {
                            shared.evict_aged();
                        }
                        None => break,
                    }
                }
            })
            .map_err(|e| ContainerError::IllegalState(format!("cannot spawn pool sweeper: {}", e)))?;

        Ok(Self { signal, handle: Some(handle) })
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let (stopped, wake) = &*self.signal;
            *stopped.lock() = true;
            wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("pool sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
