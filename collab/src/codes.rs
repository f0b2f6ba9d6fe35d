use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Mutex;
use storage::repo::RepoError;
use thiserror::Error;
use tracing::debug;

/// Uppercase letters and digits without the easily confused `I`, `O`, `0`, `1`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("no unused code found after {0} attempts")]
    Exhausted(usize),
    #[error("repository error: {0}")]
    Repository(#[from] RepoError),
}

/// Random source for share codes, referral codes and cursor colours.
pub struct CodeGenerator {
    rng: Mutex<StdRng>,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl CodeGenerator {
    /// Deterministic generator, for tests and reproducible fixtures.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *rng)
    }

    pub fn generate(&self, length: usize) -> String {
        self.with_rng(|rng| {
            (0..length)
                .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
                .collect()
        })
    }

    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        self.with_rng(|rng| items.get(rng.random_range(0..items.len())))
    }
}

/// Generates codes and hands each to `claim` until one is accepted. A
/// `RepoError::Conflict` means the code is taken and another is tried; any
/// other error aborts.
pub async fn claim_unique_code<T, F, Fut>(
    generator: &CodeGenerator,
    length: usize,
    max_attempts: usize,
    mut claim: F,
) -> Result<T, ClaimError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, RepoError>>,
{
    for attempt in 1..=max_attempts {
        let code = generator.generate(length);
        match claim(code).await {
            Ok(claimed) => return Ok(claimed),
            Err(RepoError::Conflict(reason)) => {
                debug!(attempt, reason = %reason, "code collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ClaimError::Exhausted(max_attempts))
}
