//! Asynchronous hardware-token protocol (spec §4.8). No analogue exists in
//! the corpus's own `token.rs` (a throwaway hex/uuid generator), so this
//! module is grounded instead in the completion-queue-plus-worker-thread
//! shape design note §9 spells out directly: a background worker does the
//! device I/O, results cross to the caller only through an `Executor` the
//! caller drains on its own thread, and a shared `AtomicBool` carries
//! cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::{TOKEN_CHALLENGE_LEN, TOKEN_RESPONSE_SHA1_LEN};
use crate::secure::SecureBuf;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token device is busy with another operation")]
    Busy,
    #[error("token operation was cancelled")]
    Cancelled,
    #[error("token operation timed out")]
    Timeout,
    #[error("token device error: {0}")]
    Device(String),
}

/// Spec §6.4: numeric tag distinguishing response algorithms. HMAC-SHA-1 is
/// mandatory for today's devices; HMAC-SHA-256 is reserved for future ones
/// (Open Question 2) and is not wired into the key-slot fold in §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAlgorithm {
    HmacSha1 = 1,
    HmacSha256 = 2,
}

/// A physical or simulated token device. Implementations must poll `cancel`
/// at every safe point during a touch wait and return `Err(Cancelled)` as
/// soon as it is observed true.
pub trait TokenDevice: Send + Sync {
    fn create_credential(
        &self,
        rp_id: &str,
        user_name: &str,
        user_id: &[u8],
        pin: &SecureBuf,
        require_touch: bool,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, TokenError>;

    fn challenge_response(
        &self,
        challenge: &[u8; TOKEN_CHALLENGE_LEN],
        algorithm: TokenAlgorithm,
        require_touch: bool,
        pin: &SecureBuf,
        cancel: &AtomicBool,
    ) -> Result<[u8; TOKEN_RESPONSE_SHA1_LEN], TokenError>;
}

/// Where completion callbacks are marshalled to run — never invoked from
/// the worker thread that talked to the device (spec §4.8 rule 2).
pub trait Executor: Send + Sync {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>);
}

/// A queue-based executor: background threads push completed callbacks,
/// the owning "UI" thread calls [`QueueExecutor::drain`] on its own
/// schedule to actually run them.
#[derive(Default)]
pub struct QueueExecutor {
    queue: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl QueueExecutor {
    pub fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()) }
    }

    pub fn drain(&self) {
        let jobs: Vec<_> = {
            let mut queue = self.queue.lock().expect("executor queue mutex poisoned");
            queue.drain(..).collect()
        };
        for job in jobs {
            job();
        }
    }
}

impl Executor for QueueExecutor {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        self.queue.lock().expect("executor queue mutex poisoned").push_back(job);
    }
}

/// Handle to a single token device. At most one operation may be in flight
/// at a time (spec §4.8 rule 1); a second call while busy rejects
/// immediately with [`TokenError::Busy`].
pub struct TokenClient<D: TokenDevice + 'static> {
    device: Arc<D>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl<D: TokenDevice + 'static> TokenClient<D> {
    pub fn new(device: D) -> Self {
        Self { device: Arc::new(device), busy: Arc::new(AtomicBool::new(false)), cancel: Arc::new(AtomicBool::new(false)), handles: Mutex::new(Vec::new()) }
    }

    /// Request cancellation of whatever operation is currently in flight.
    /// A no-op if nothing is running.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Stash a worker handle, pruning ones that have already finished so
    /// the vector doesn't grow across a long-lived client's lifetime.
    fn track(&self, handle: thread::JoinHandle<()>) {
        let mut handles = self.handles.lock().expect("token client handle list poisoned");
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn create_credential_async(
        &self,
        rp_id: String,
        user_name: String,
        user_id: Vec<u8>,
        pin: SecureBuf,
        require_touch: bool,
        executor: Arc<dyn Executor>,
        cb: impl FnOnce(Result<Vec<u8>, TokenError>) + Send + 'static,
    ) {
        if self.busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            executor.spawn(Box::new(move || cb(Err(TokenError::Busy))));
            return;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let device = self.device.clone();
        let busy = self.busy.clone();
        let cancel = self.cancel.clone();

        let handle = thread::spawn(move || {
            let result = device.create_credential(&rp_id, &user_name, &user_id, &pin, require_touch, &cancel);
            drop(pin); // wiped on drop regardless of outcome
            busy.store(false, Ordering::SeqCst);
            executor.spawn(Box::new(move || cb(result)));
        });
        self.track(handle);
    }

    pub fn challenge_response_async(
        &self,
        challenge: [u8; TOKEN_CHALLENGE_LEN],
        algorithm: TokenAlgorithm,
        require_touch: bool,
        timeout_ms: u64,
        pin: SecureBuf,
        executor: Arc<dyn Executor>,
        cb: impl FnOnce(Result<[u8; TOKEN_RESPONSE_SHA1_LEN], TokenError>) + Send + 'static,
    ) {
        if self.busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            executor.spawn(Box::new(move || cb(Err(TokenError::Busy))));
            return;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let device = self.device.clone();
        let cancel = self.cancel.clone();
        let (tx, rx) = mpsc::channel();

        let device_handle = thread::spawn(move || {
            let result = device.challenge_response(&challenge, algorithm, require_touch, &pin, &cancel);
            drop(pin);
            let _ = tx.send(result);
        });
        self.track(device_handle);

        let busy = self.busy.clone();
        let coordinator_cancel = self.cancel.clone();
        let coordinator_handle = thread::spawn(move || {
            let outcome = match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
                Ok(Ok(response)) => {
                    if coordinator_cancel.load(Ordering::SeqCst) {
                        Err(TokenError::Cancelled)
                    } else {
                        Ok(response)
                    }
                }
                Ok(Err(err)) => Err(err),
                Err(RecvTimeoutError::Timeout) => {
                    coordinator_cancel.store(true, Ordering::SeqCst);
                    Err(TokenError::Timeout)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    Err(TokenError::Device("token worker thread vanished without a result".into()))
                }
            };
            busy.store(false, Ordering::SeqCst);
            executor.spawn(Box::new(move || cb(outcome)));
        });
        self.track(coordinator_handle);
    }
}

impl<D: TokenDevice + 'static> Drop for TokenClient<D> {
    /// Request cancellation and join every outstanding worker before the
    /// client goes away (spec §5 "Resource discipline": no detached threads
    /// surviving their owner). A well-behaved `TokenDevice` polls `cancel`
    /// at every safe point, so this returns promptly rather than waiting
    /// out a full touch timeout.
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.handles.lock().expect("token client handle list poisoned"));
        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use std::time::Instant;

    /// A simulated device that returns a fixed HMAC-SHA1 response, checking
    /// `cancel` before "touch" and optionally sleeping to emulate a slow
    /// human tapping the device.
    struct FakeDevice {
        secret: [u8; 32],
        touch_delay: Duration,
    }

    impl TokenDevice for FakeDevice {
        fn create_credential(
            &self,
            _rp_id: &str,
            _user_name: &str,
            _user_id: &[u8],
            _pin: &SecureBuf,
            _require_touch: bool,
            cancel: &AtomicBool,
        ) -> Result<Vec<u8>, TokenError> {
            if cancel.load(Ordering::SeqCst) {
                return Err(TokenError::Cancelled);
            }
            Ok(vec![0xAB; 16])
        }

        fn challenge_response(
            &self,
            challenge: &[u8; TOKEN_CHALLENGE_LEN],
            _algorithm: TokenAlgorithm,
            _require_touch: bool,
            _pin: &SecureBuf,
            cancel: &AtomicBool,
        ) -> Result<[u8; TOKEN_RESPONSE_SHA1_LEN], TokenError> {
            let deadline = Instant::now() + self.touch_delay;
            while Instant::now() < deadline {
                if cancel.load(Ordering::SeqCst) {
                    return Err(TokenError::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
            Ok(crypto::hmac_sha1(&self.secret, challenge))
        }
    }

    fn await_result<T: Send + 'static>(executor: &QueueExecutor, slot: &Arc<Mutex<Option<T>>>) -> T {
        for _ in 0..2000 {
            executor.drain();
            if let Some(value) = slot.lock().unwrap().take() {
                return value;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("callback never fired");
    }

    #[test]
    fn challenge_response_returns_devices_hmac() {
        let secret = [9u8; 32];
        let client = TokenClient::new(FakeDevice { secret, touch_delay: Duration::from_millis(0) });
        let executor = Arc::new(QueueExecutor::new());
        let challenge = [1u8; TOKEN_CHALLENGE_LEN];
        let expected = crypto::hmac_sha1(&secret, &challenge);

        let slot = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        client.challenge_response_async(
            challenge,
            TokenAlgorithm::HmacSha1,
            false,
            1000,
            SecureBuf::new(),
            executor.clone(),
            move |res| *slot2.lock().unwrap() = Some(res),
        );

        let result = await_result(&executor, &slot).unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn second_call_while_busy_is_rejected_immediately() {
        let client = TokenClient::new(FakeDevice { secret: [1u8; 32], touch_delay: Duration::from_millis(200) });
        let executor = Arc::new(QueueExecutor::new());

        let slot1 = Arc::new(Mutex::new(None));
        let slot1b = slot1.clone();
        client.challenge_response_async([0u8; TOKEN_CHALLENGE_LEN], TokenAlgorithm::HmacSha1, false, 5000, SecureBuf::new(), executor.clone(), move |res| {
            *slot1b.lock().unwrap() = Some(res)
        });

        let slot2 = Arc::new(Mutex::new(None));
        let slot2b = slot2.clone();
        client.challenge_response_async([0u8; TOKEN_CHALLENGE_LEN], TokenAlgorithm::HmacSha1, false, 5000, SecureBuf::new(), executor.clone(), move |res| {
            *slot2b.lock().unwrap() = Some(res)
        });

        let second = await_result(&executor, &slot2);
        assert_eq!(second, Err(TokenError::Busy));
    }

    #[test]
    fn cancel_before_completion_yields_cancelled() {
        let client = TokenClient::new(FakeDevice { secret: [2u8; 32], touch_delay: Duration::from_millis(500) });
        let executor = Arc::new(QueueExecutor::new());

        let slot = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        client.challenge_response_async([0u8; TOKEN_CHALLENGE_LEN], TokenAlgorithm::HmacSha1, false, 5000, SecureBuf::new(), executor.clone(), move |res| {
            *slot2.lock().unwrap() = Some(res)
        });

        thread::sleep(Duration::from_millis(20));
        client.cancel();

        let result = await_result(&executor, &slot);
        assert_eq!(result, Err(TokenError::Cancelled));
    }

    #[test]
    fn dropping_client_mid_operation_joins_workers_promptly() {
        let client = TokenClient::new(FakeDevice { secret: [4u8; 32], touch_delay: Duration::from_secs(30) });
        let executor = Arc::new(QueueExecutor::new());

        let slot = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        client.challenge_response_async([0u8; TOKEN_CHALLENGE_LEN], TokenAlgorithm::HmacSha1, false, 60_000, SecureBuf::new(), executor, move |res| {
            *slot2.lock().unwrap() = Some(res)
        });

        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        drop(client);
        let elapsed = started.elapsed();

        // FakeDevice polls `cancel` every millisecond; Drop stores cancel before
        // joining, so both workers should unwind in well under the 30s touch
        // delay or the 60s recv timeout.
        assert!(elapsed < Duration::from_secs(5), "drop took {elapsed:?}, workers were not joined promptly");
    }

    #[test]
    fn timeout_fires_when_device_is_too_slow() {
        let client = TokenClient::new(FakeDevice { secret: [3u8; 32], touch_delay: Duration::from_millis(500) });
        let executor = Arc::new(QueueExecutor::new());

        let slot = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        client.challenge_response_async([0u8; TOKEN_CHALLENGE_LEN], TokenAlgorithm::HmacSha1, false, 30, SecureBuf::new(), executor.clone(), move |res| {
            *slot2.lock().unwrap() = Some(res)
        });

        let result = await_result(&executor, &slot);
        assert_eq!(result, Err(TokenError::Timeout));
    }
}
