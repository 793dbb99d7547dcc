//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use stagepipe_rs::pipeline::{RunResult, Supervisor};
use std::time::{Duration, Instant};

/// Upper bound for any single pipeline run in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Run a supervisor to completion on a helper thread, failing the test
/// instead of hanging if it does not finish in time.
pub fn run_with_deadline(mut supervisor: Supervisor) -> RunResult {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(supervisor.run());
    });
    match rx.recv_timeout(test_timeout()) {
        Ok(result) => result.expect("pipeline run returned an error"),
        Err(_) => panic!("pipeline did not finish within {:?}", test_timeout()),
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
