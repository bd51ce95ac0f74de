use std::sync::Arc;

use bosk_tree::Node;

use crate::error::{DriverError, DriverResult};
use crate::update::Update;

use super::BoskDriver;

/// Broadcasts every call to several downstream drivers, in order.
///
/// The initial root comes from the first downstream that can supply one;
/// the reasons the earlier ones declined are kept as suppressed messages if
/// none can.
pub struct ForwardingDriver {
    downstreams: Vec<Arc<dyn BoskDriver>>,
}

impl ForwardingDriver {
    pub fn new(downstreams: Vec<Arc<dyn BoskDriver>>) -> Self {
        Self { downstreams }
    }
}

impl BoskDriver for ForwardingDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        let mut suppressed = Vec::new();
        for downstream in &self.downstreams {
            match downstream.initial_root() {
                Ok(root) => return Ok(root),
                Err(DriverError::UnsupportedInitialization {
                    reason,
                    suppressed: nested,
                }) => {
                    suppressed.push(reason);
                    suppressed.extend(nested);
                }
                Err(other) => return Err(other),
            }
        }
        Err(DriverError::UnsupportedInitialization {
            reason: format!(
                "none of {} downstream drivers can supply an initial root",
                self.downstreams.len()
            ),
            suppressed,
        })
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        for downstream in &self.downstreams {
            downstream.submit(update.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        for downstream in &self.downstreams {
            downstream.flush()?;
        }
        Ok(())
    }

    fn close(&self) {
        for downstream in &self.downstreams {
            downstream.close();
        }
    }
}
