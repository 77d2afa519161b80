//! End-to-end hardware-token flow (spec §4.8, scenario S6): a simulated
//! device driven through the real async `TokenClient`/`QueueExecutor`
//! machinery, with its response folded into a `require_token` vault the
//! same way a real caller would wire the two together.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::tempdir;

use towervault::crypto::{self, TOKEN_CHALLENGE_LEN, TOKEN_RESPONSE_SHA1_LEN};
use towervault::error::VaultError;
use towervault::policy::VaultSecurityPolicy;
use towervault::secure::SecureBuf;
use towervault::token::{QueueExecutor, TokenAlgorithm, TokenClient, TokenDevice, TokenError};
use towervault::vault::{FecOptions, Vault};

/// A simulated device that answers with a fixed HMAC-SHA-1 over whatever
/// challenge it's given, optionally stalling before "touch" completes.
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
        _cancel: &AtomicBool,
    ) -> Result<Vec<u8>, TokenError> {
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
        let deadline = std::time::Instant::now() + self.touch_delay;
        while std::time::Instant::now() < deadline {
            if cancel.load(Ordering::SeqCst) {
                return Err(TokenError::Cancelled);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(crypto::hmac_sha1(&self.secret, challenge))
    }
}

fn await_result<T: Send + 'static>(executor: &QueueExecutor, slot: &Arc<Mutex<Option<T>>>) -> T {
    for _ in 0..3000 {
        executor.drain();
        if let Some(value) = slot.lock().unwrap().take() {
            return value;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("callback never fired");
}

fn touch_device(device: FakeDevice, challenge: [u8; TOKEN_CHALLENGE_LEN]) -> [u8; TOKEN_RESPONSE_SHA1_LEN] {
    let client = TokenClient::new(device);
    let executor = Arc::new(QueueExecutor::new());
    let slot = Arc::new(Mutex::new(None));
    let slot2 = slot.clone();

    client.challenge_response_async(challenge, TokenAlgorithm::HmacSha1, false, 5000, SecureBuf::new(), executor.clone(), move |res| {
        *slot2.lock().unwrap() = Some(res)
    });

    await_result(&executor, &slot).expect("device responds")
}

#[test]
fn vault_bound_to_a_token_accepts_the_same_device_and_rejects_a_different_one() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");
    let challenge = [0x42u8; TOKEN_CHALLENGE_LEN];

    let mut policy = VaultSecurityPolicy::default();
    policy.require_token = true;
    policy.token_challenge = Some(challenge);

    let genuine_device = FakeDevice { secret: [1u8; 32], touch_delay: Duration::from_millis(0) };
    let enrollment_response = touch_device(genuine_device, challenge);

    Vault::create_v2(&path, "alice", "correcthorsebatterystaple", policy, Some(&enrollment_response), FecOptions::default())
        .expect("create v2 bound to the token");

    let same_device = FakeDevice { secret: [1u8; 32], touch_delay: Duration::from_millis(0) };
    let same_response = touch_device(same_device, challenge);
    assert!(Vault::open_v2(&path, "alice", "correcthorsebatterystaple", Some(&same_response)).is_ok());

    let different_device = FakeDevice { secret: [2u8; 32], touch_delay: Duration::from_millis(0) };
    let different_response = touch_device(different_device, challenge);
    assert_ne!(different_response, enrollment_response);

    let result = Vault::open_v2(&path, "alice", "correcthorsebatterystaple", Some(&different_response));
    assert!(matches!(result, Err(VaultError::BadCredentials)));
}

#[test]
fn cancelling_before_the_device_responds_fires_the_callback_exactly_once() {
    let client = TokenClient::new(FakeDevice { secret: [3u8; 32], touch_delay: Duration::from_millis(500) });
    let executor = Arc::new(QueueExecutor::new());

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let slot = Arc::new(Mutex::new(None));
    let slot2 = slot.clone();

    client.challenge_response_async([0u8; TOKEN_CHALLENGE_LEN], TokenAlgorithm::HmacSha1, false, 5000, SecureBuf::new(), executor.clone(), move |res| {
        calls2.fetch_add(1, Ordering::SeqCst);
        *slot2.lock().unwrap() = Some(res);
    });

    thread::sleep(Duration::from_millis(20));
    client.cancel();

    let result = await_result(&executor, &slot);
    assert_eq!(result, Err(TokenError::Cancelled));

    // Drain a few more times; the callback must never fire a second time.
    for _ in 0..10 {
        executor.drain();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
