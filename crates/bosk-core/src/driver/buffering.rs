use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use bosk_tree::Node;
use tracing::debug;

use crate::error::DriverResult;
use crate::update::Update;

use super::{factory, BoskDriver, DriverFactory};

/// Holds submitted updates until the next flush, then forwards them in order.
pub struct BufferingDriver {
    downstream: Arc<dyn BoskDriver>,
    buffer: Mutex<Vec<Update>>,
    /// Serializes flushes so batches reach downstream in submission order.
    /// `submit` never takes it.
    forwarding: Mutex<()>,
    /// The thread currently forwarding, if any. Hooks run on it.
    forwarder: Mutex<Option<ThreadId>>,
}

impl BufferingDriver {
    pub fn new(downstream: Arc<dyn BoskDriver>) -> Self {
        Self {
            downstream,
            buffer: Mutex::new(Vec::new()),
            forwarding: Mutex::new(()),
            forwarder: Mutex::new(None),
        }
    }

    pub fn factory() -> DriverFactory {
        factory(|_, downstream| Ok(Arc::new(BufferingDriver::new(downstream))))
    }

    /// Forward until the buffer stays empty, including updates that hooks
    /// submit while earlier ones apply.
    fn forward_all(&self) -> DriverResult<()> {
        loop {
            let batch = std::mem::take(&mut *self.buffer.lock().expect("buffer lock poisoned"));
            if batch.is_empty() {
                return Ok(());
            }
            debug!(count = batch.len(), "forwarding buffered updates");
            for update in batch {
                self.downstream.submit(update)?;
            }
        }
    }

    /// Number of updates waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().expect("buffer lock poisoned").len()
    }
}

impl BoskDriver for BufferingDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        self.downstream.initial_root()
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        self.buffer
            .lock()
            .expect("buffer lock poisoned")
            .push(update);
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        let current = std::thread::current().id();
        if *self.forwarder.lock().expect("forwarder lock poisoned") == Some(current) {
            // A hook flushing mid-forward; the outer flush drains what it adds.
            return self.downstream.flush();
        }
        let _forwarding = self.forwarding.lock().expect("forwarding lock poisoned");
        *self.forwarder.lock().expect("forwarder lock poisoned") = Some(current);
        let forwarded = self.forward_all();
        *self.forwarder.lock().expect("forwarder lock poisoned") = None;
        forwarded?;
        self.downstream.flush()
    }

    fn close(&self) {
        self.downstream.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Target};

    #[test]
    fn nothing_applies_until_flush() {
        let bosk = testing::bosk_with(BufferingDriver::factory());
        let a = bosk.reference_to::<Target>("/targets/a").unwrap();
        bosk.driver().submit_replacement(&a, &Target::new("a")).unwrap();
        {
            let _ctx = bosk.read_context();
            assert!(!a.exists().unwrap());
        }
        bosk.driver().flush().unwrap();
        let _ctx = bosk.read_context();
        assert!(a.exists().unwrap());
    }

    #[test]
    fn hooks_may_submit_and_flush_while_forwarding() {
        let bosk = testing::bosk_with(BufferingDriver::factory());
        let scope = bosk.reference_to::<Target>("/targets/-target-").unwrap();
        let name = bosk.reference_to::<String>("/name").unwrap();
        let renamed = name.clone();
        bosk.register_hook("rename", &scope, 0, move |target, driver| {
            let label = target.path().to_string();
            driver.submit_replacement(&renamed, &label).unwrap();
            driver.flush().unwrap();
        })
        .unwrap();

        let a = bosk.reference_to::<Target>("/targets/a").unwrap();
        let driver = bosk.driver();
        driver.submit_replacement(&a, &Target::new("a")).unwrap();
        let (done, finished) = std::sync::mpsc::channel();
        let flusher = driver.clone();
        std::thread::spawn(move || done.send(flusher.flush()).unwrap());
        finished
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("flush did not return")
            .unwrap();

        let _ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "/targets/a");
    }
}
