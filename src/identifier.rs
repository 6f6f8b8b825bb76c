//! Barcode generation for points sent to the lab
//!
//! Every newly selected point gets an externally visible identifier. A batch
//! is checked for duplicates once; a duplicate is reported, never regenerated.

use std::collections::HashSet;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of barcodes.
pub trait BarcodeGenerator {
    /// Produce the next barcode.
    fn generate(&mut self) -> String;
}

/// Six characters drawn from the Unix-time digits followed by six random
/// uppercase letters or digits, e.g. `776171K3QZ0B`.
#[derive(Debug, Clone)]
pub struct TimestampBarcode {
    rng: ChaCha8Rng,
    clock: Option<i64>,
}

impl TimestampBarcode {
    /// Generator seeded from OS entropy, reading the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            clock: None,
        }
    }

    /// Reproducible generator with a fixed seed and a frozen clock.
    #[must_use]
    pub fn with_seed(seed: u64, unix_time: i64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock: Some(unix_time),
        }
    }
}

impl Default for TimestampBarcode {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeGenerator for TimestampBarcode {
    fn generate(&mut self) -> String {
        let digits: Vec<char> = self
            .clock
            .unwrap_or_else(|| Utc::now().timestamp())
            .to_string()
            .chars()
            .collect();
        let mut barcode = String::with_capacity(12);
        for _ in 0..6 {
            if let Some(&c) = digits.choose(&mut self.rng) {
                barcode.push(c);
            }
        }
        for _ in 0..6 {
            barcode.push(char::from(ALPHANUMERIC[self.rng.gen_range(0..ALPHANUMERIC.len())]));
        }
        barcode
    }
}

/// Last group (12 hex characters) of a random UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidBarcode;

impl BarcodeGenerator for UuidBarcode {
    fn generate(&mut self) -> String {
        let text = Uuid::new_v4().to_string();
        text.rsplit('-').next().unwrap_or(&text).to_string()
    }
}

/// Configured barcode scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierMode {
    /// [`TimestampBarcode`]
    #[default]
    #[serde(alias = "custom")]
    Timestamp,
    /// [`UuidBarcode`]
    #[serde(alias = "uuid_c")]
    Uuid,
}

impl IdentifierMode {
    /// Fresh generator for this scheme.
    #[must_use]
    pub fn generator(self) -> Box<dyn BarcodeGenerator> {
        match self {
            Self::Timestamp => Box::new(TimestampBarcode::new()),
            Self::Uuid => Box::new(UuidBarcode),
        }
    }
}

/// Draw `n` barcodes and verify they are pairwise distinct.
///
/// # Errors
/// Returns `IdentifierCollision` naming the first repeated barcode
pub fn assign_barcodes(generator: &mut dyn BarcodeGenerator, n: usize) -> Result<Vec<String>> {
    let barcodes: Vec<String> = (0..n).map(|_| generator.generate()).collect();
    let mut seen = HashSet::with_capacity(n);
    for barcode in &barcodes {
        if !seen.insert(barcode.as_str()) {
            return Err(Error::IdentifierCollision(barcode.clone()));
        }
    }
    debug!(count = n, "assigned barcodes");
    Ok(barcodes)
}
