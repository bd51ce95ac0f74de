use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};

use bosk_tree::Node;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::update::Update;

use super::{factory, BoskDriver, DriverFactory};

enum Command {
    Submit(Update),
    Flush(oneshot::Sender<DriverResult<()>>),
}

/// Moves submissions onto a dedicated thread, preserving their order.
///
/// `flush` queues a marker behind everything already submitted and waits
/// for the worker to reach it and flush downstream. On the worker itself,
/// i.e. from a hook, it flushes downstream directly. Must not be flushed
/// from inside a tokio runtime: the wait is a blocking receive.
pub struct AsyncDriver {
    downstream: Arc<dyn BoskDriver>,
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl AsyncDriver {
    pub fn new(downstream: Arc<dyn BoskDriver>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let worker_downstream = downstream.clone();
        let worker = std::thread::spawn(move || {
            while let Some(command) = rx.blocking_recv() {
                match command {
                    Command::Submit(update) => {
                        if let Err(e) = worker_downstream.submit(update) {
                            warn!(error = %e, "async submission failed downstream");
                        }
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(worker_downstream.flush());
                    }
                }
            }
            debug!("async driver worker stopped");
        });
        Self {
            downstream,
            sender: Mutex::new(Some(tx)),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn factory() -> DriverFactory {
        factory(|_, downstream| Ok(Arc::new(AsyncDriver::new(downstream))))
    }

    fn send(&self, command: Command) -> DriverResult<()> {
        match &*self.sender.lock().expect("async sender lock poisoned") {
            Some(tx) => tx.send(command).map_err(|_| DriverError::Shutdown),
            None => Err(DriverError::Shutdown),
        }
    }
}

impl BoskDriver for AsyncDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        self.downstream.initial_root()
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        self.send(Command::Submit(update))
    }

    fn flush(&self) -> DriverResult<()> {
        if std::thread::current().id() == self.worker_id {
            return self.downstream.flush();
        }
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        rx.blocking_recv().map_err(|_| DriverError::Shutdown)?
    }

    fn close(&self) {
        // Dropping the sender lets the worker finish what's queued and exit.
        self.sender.lock().expect("async sender lock poisoned").take();
        let worker = self.worker.lock().expect("async worker lock poisoned").take();
        if let Some(worker) = worker {
            if self.worker_id != std::thread::current().id() && worker.join().is_err() {
                warn!("async driver worker panicked");
            }
        }
        self.downstream.close();
    }
}

impl Drop for AsyncDriver {
    fn drop(&mut self) {
        self.sender.lock().expect("async sender lock poisoned").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Target};

    #[test]
    fn updates_apply_in_order_after_flush() {
        let bosk = testing::bosk_with(AsyncDriver::factory());
        let driver = bosk.driver();
        let name = bosk.reference_to::<String>("/name").unwrap();
        for i in 0..50 {
            driver.submit_replacement(&name, &format!("v{i}")).unwrap();
        }
        let a = bosk.reference_to::<Target>("/targets/a").unwrap();
        driver.submit_replacement(&a, &Target::new("a")).unwrap();
        driver.flush().unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "v49");
        assert!(a.exists().unwrap());
    }

    #[test]
    fn closed_driver_rejects_work() {
        let bosk = testing::bosk_with(AsyncDriver::factory());
        bosk.close();
        let name = bosk.reference_to::<String>("/name").unwrap();
        assert!(bosk.driver().submit_replacement(&name, &"x".into()).is_err());
        assert!(bosk.driver().flush().is_err());
    }

    #[test]
    fn hooks_may_flush_on_the_worker() {
        let bosk = testing::bosk_with(AsyncDriver::factory());
        let scope = bosk.reference_to::<Target>("/targets/-target-").unwrap();
        let name = bosk.reference_to::<String>("/name").unwrap();
        let renamed = name.clone();
        bosk.register_hook("rename", &scope, 0, move |_, driver| {
            driver.submit_replacement(&renamed, &"hooked".to_string()).unwrap();
            driver.flush().unwrap();
        })
        .unwrap();

        let driver = bosk.driver();
        let a = bosk.reference_to::<Target>("/targets/a").unwrap();
        driver.submit_replacement(&a, &Target::new("a")).unwrap();
        let (done, finished) = std::sync::mpsc::channel();
        let flusher = driver.clone();
        std::thread::spawn(move || done.send(flusher.flush()).unwrap());
        finished
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("flush did not return")
            .unwrap();

        // The hook's own submission queues behind the flush marker.
        driver.flush().unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "hooked");
    }
}
