//! Lobby-code allocation.
//!
//! Codes are a reversible permutation of a monotonic counter, not rejection
//! sampling: the counter is mixed through one affine step mod the code space
//! and encoded as six digits of a 33-character alphabet (A-Z without the
//! confusable I and O, plus 1-9). Successive codes look unrelated but cannot
//! collide until the counter wraps the full space.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

pub const CODE_LEN: usize = 6;
pub const ALPHABET: &[u8; 33] = b"ABCDEFGHJKLMNPQRSTUVWXYZ123456789";

const BASE: u64 = ALPHABET.len() as u64;
/// 33^6 = 1_291_467_969 distinct codes.
const CODE_SPACE: u64 = BASE.pow(CODE_LEN as u32);
/// Coprime to the code space (3^6 * 11^6), so the mix is a bijection.
const MIX_MULTIPLIER: u64 = 950_706_376;
const MIX_INCREMENT: u64 = 12_345;

const COUNTER_FILE: &str = "code-counter";

/// Allocator of unique lobby codes.
///
/// The counter survives process restarts through a small file under the data
/// directory; the seed is configuration-scoped, and changing it breaks
/// decode compatibility of previously issued codes.
pub struct LobbyCodes {
    seed: u64,
    counter: Mutex<u64>,
    counter_path: Option<PathBuf>,
}

impl LobbyCodes {
    /// Open the allocator, restoring the counter persisted under `data_dir`.
    pub async fn open(data_dir: &str, seed: u64) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = Path::new(data_dir).join(COUNTER_FILE);
        let counter = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => value % CODE_SPACE,
                Err(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        "unreadable code counter, starting from zero"
                    );
                    0
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err),
        };
        tracing::info!(counter, "lobby code generator ready");
        Ok(Self {
            seed,
            counter: Mutex::new(counter),
            counter_path: Some(path),
        })
    }

    /// An allocator whose counter lives only in memory.
    pub fn in_memory(seed: u64) -> Self {
        Self {
            seed,
            counter: Mutex::new(0),
            counter_path: None,
        }
    }

    /// Allocate the next code. Awaits the counter persist when one is
    /// configured; a failed persist is logged and does not fail allocation.
    pub async fn next(&self) -> String {
        let mut counter = self.counter.lock().await;
        let code = encode(self.mix(*counter));
        *counter += 1;
        if *counter >= CODE_SPACE {
            tracing::warn!("lobby code counter wrapped, reissued codes may collide");
            *counter = 0;
        }
        if let Some(path) = &self.counter_path {
            if let Err(err) = tokio::fs::write(path, counter.to_string()).await {
                tracing::warn!(error = %err, "failed to persist code counter");
            }
        }
        code
    }

    fn mix(&self, k: u64) -> u64 {
        ((k % CODE_SPACE) * MIX_MULTIPLIER % CODE_SPACE + MIX_INCREMENT + self.seed % CODE_SPACE)
            % CODE_SPACE
    }
}

/// Encode a value as six alphabet digits, most significant first.
pub fn encode(value: u64) -> String {
    let mut n = value % CODE_SPACE;
    let mut digits = [ALPHABET[0]; CODE_LEN];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(n % BASE) as usize];
        n /= BASE;
    }
    digits.iter().map(|&b| b as char).collect()
}

/// Inverse of [`encode`]. Returns `None` for malformed codes.
pub fn decode(code: &str) -> Option<u64> {
    if code.len() != CODE_LEN {
        return None;
    }
    let mut value = 0u64;
    for byte in code.bytes() {
        let digit = ALPHABET.iter().position(|&c| c == byte)? as u64;
        value = value * BASE + digit;
    }
    Some(value)
}

/// Length and alphabet membership check.
pub fn valid(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| ALPHABET.contains(&b))
}
