//! Receive card façade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::RxConfig;
use crate::Error;

use super::{AdcLink, DeviceError, RawGate};

/// Idle backoff of the capture worker while the gate ring is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Depth of the gate-event signal queue. Signals are best-effort; the gate
/// list itself is the source of truth, the queue only wakes the controller.
const GATE_QUEUE_DEPTH: usize = 256;

/// Façade over the receive card.
///
/// A capture worker drains the digitiser's gate ring into `rx_data`,
/// appending each per-gate `[n_coils, n_ro]` buffer under an internal lock
/// and signalling a bounded channel. The controller observes the count (or
/// blocks in [`RxCard::wait_for_gates`]) and reads the contents once a gate
/// has been counted.
pub struct RxCard {
    link: Arc<Mutex<Box<dyn AdcLink>>>,
    config: RxConfig,
    gates: Arc<Mutex<Vec<RawGate>>>,
    events: Option<Receiver<()>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<(), DeviceError>>>,
}

impl RxCard {
    pub fn new(link: impl AdcLink, config: RxConfig) -> Self {
        Self {
            link: Arc::new(Mutex::new(Box::new(link))),
            config,
            gates: Arc::new(Mutex::new(Vec::new())),
            events: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.config.num_channels
    }

    pub fn rx_scaling(&self) -> &[f64] {
        &self.config.rx_scaling
    }

    /// Digitiser sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        1.0 / self.config.spcm_dwell_time
    }

    /// Clear previously captured gates and begin capture on a worker thread.
    pub fn start_operation(&mut self) -> Result<(), Error> {
        if self.worker.is_some() {
            return Err(Error::Device(DeviceError::new("capture already running")));
        }
        self.gates
            .lock()
            .map_err(|_| DeviceError::new("gate store mutex poisoned"))?
            .clear();

        let (event_tx, event_rx): (Sender<()>, Receiver<()>) = bounded(GATE_QUEUE_DEPTH);
        self.events = Some(event_rx);
        self.stop.store(false, Ordering::SeqCst);

        let link = Arc::clone(&self.link);
        let gates = Arc::clone(&self.gates);
        let stop = Arc::clone(&self.stop);
        log::debug!(target: "RxCard", "starting capture");

        self.worker = Some(thread::spawn(move || {
            {
                let mut link = link
                    .lock()
                    .map_err(|_| DeviceError::new("adc link mutex poisoned"))?;
                link.begin()?;
            }
            let result = loop {
                if stop.load(Ordering::SeqCst) {
                    break Ok(());
                }
                let gate = {
                    let mut link = link
                        .lock()
                        .map_err(|_| DeviceError::new("adc link mutex poisoned"))?;
                    link.next_gate()
                };
                match gate {
                    Ok(Some(gate)) => {
                        gates
                            .lock()
                            .map_err(|_| DeviceError::new("gate store mutex poisoned"))?
                            .push(gate);
                        // Best-effort wake-up; a full queue loses nothing.
                        let _ = event_tx.try_send(());
                    }
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(err) => break Err(err),
                }
            };
            let mut link = link
                .lock()
                .map_err(|_| DeviceError::new("adc link mutex poisoned"))?;
            link.end()?;
            result
        }));
        Ok(())
    }

    /// Number of gates captured so far. Monotonic within one capture.
    pub fn gate_count(&self) -> usize {
        self.gates.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Block until `expected` gates have arrived or `timeout` passes.
    ///
    /// Returns the number of gates available at return; the caller decides
    /// what an incomplete count means. Waking is driven by the gate-event
    /// queue, so the controller does not busy-poll.
    pub fn wait_for_gates(&self, expected: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let count = self.gate_count();
            if count >= expected {
                return count;
            }
            let Some(events) = &self.events else {
                return count;
            };
            let now = Instant::now();
            if now >= deadline {
                return count;
            }
            match events.recv_timeout(deadline - now) {
                Ok(()) => continue,
                // Timeout or a finished worker: report what is there.
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return self.gate_count()
                }
            }
        }
    }

    /// Snapshot of the captured gates.
    pub fn data(&self) -> Vec<RawGate> {
        self.gates.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Halt capture and join the worker. Idempotent.
    pub fn stop_operation(&mut self) -> Result<(), Error> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => return Err(Error::Device(DeviceError::new("capture worker panicked"))),
            }
        }
        self.events = None;
        Ok(())
    }
}

impl Drop for RxCard {
    fn drop(&mut self) {
        let _ = self.stop_operation();
    }
}
