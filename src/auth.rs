use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Check an emergency-exit password attempt against the configured value.
///
/// Both sides are hashed and every digest byte is compared, so the check
/// does not leak where the candidate diverges.
pub fn verify_password(candidate: &str, configured: &str) -> bool {
    let a = Sha256::digest(candidate.as_bytes());
    let b = Sha256::digest(configured.as_bytes());

    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Sliding-window limiter for emergency-exit attempts.
///
/// Retries are unlimited unless the host installs one of these via
/// `ForcedRunEngine::with_exit_attempt_limit`.
#[derive(Debug)]
pub struct ExitAttemptLimiter {
    attempts: VecDeque<Instant>,
    max_attempts: usize,
    window: Duration,
}

impl ExitAttemptLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: VecDeque::new(),
            max_attempts,
            window,
        }
    }

    /// Record an attempt; false when the window is already saturated.
    pub fn try_attempt(&mut self) -> bool {
        let now = Instant::now();

        while let Some(oldest) = self.attempts.front() {
            if now.duration_since(*oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }

        if self.attempts.len() < self.max_attempts {
            self.attempts.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.attempts.clear();
    }
}
