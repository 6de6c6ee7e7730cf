//! Sampling-based comparison of `pattern` constraints
//!
//! Deciding whether one regular expression accepts a subset of another is not
//! something sampling can prove. We generate strings from the old pattern's
//! syntax tree with a fixed-seed RNG, keep the ones the old regex accepts, and
//! measure how many the new regex still accepts. Below the acceptance
//! threshold the new pattern is stricter. The same test in the other direction
//! separates a relaxed pattern from an equivalent one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use regex_syntax::hir::{Class, Hir, HirKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tuning for pattern strictness sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSamplingConfig {
    /// Strings generated per pattern
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Fewer accepted samples than this and the old pattern is treated as
    /// unsampleable, which classifies the change as stricter
    #[serde(default = "default_min_accepted")]
    pub min_accepted: usize,
    /// Fraction of old samples the new pattern must accept
    #[serde(default = "default_threshold")]
    pub acceptance_threshold: f64,
    /// Upper bound on extra iterations for unbounded repetitions
    #[serde(default = "default_max_repeat")]
    pub max_repeat: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_samples() -> usize {
    256
}

fn default_min_accepted() -> usize {
    16
}

fn default_threshold() -> f64 {
    0.95
}

fn default_max_repeat() -> u32 {
    8
}

fn default_seed() -> u64 {
    0x5eed
}

impl Default for PatternSamplingConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            min_accepted: default_min_accepted(),
            acceptance_threshold: default_threshold(),
            max_repeat: default_max_repeat(),
            seed: default_seed(),
        }
    }
}

/// Outcome of comparing an old pattern with its replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternVerdict {
    /// Some values the old pattern accepted are now rejected
    Stricter,
    /// Everything sampled from the old pattern still matches, and the new
    /// pattern accepts values the old one did not
    Relaxed,
    /// No difference observed in either direction
    Equivalent,
}

/// Compares regex patterns by generate-and-test sampling
#[derive(Debug, Clone, Default)]
pub struct PatternSampler {
    config: PatternSamplingConfig,
}

impl PatternSampler {
    pub fn new(config: PatternSamplingConfig) -> Self {
        Self { config }
    }

    pub fn compare(&self, old: &str, new: &str) -> PatternVerdict {
        let (old_re, new_re) = match (Regex::new(old), Regex::new(new)) {
            (Ok(o), Ok(n)) => (o, n),
            _ => return PatternVerdict::Stricter,
        };

        let old_samples = self.generate(old, &old_re);
        if old_samples.len() < self.config.min_accepted {
            debug!(pattern = old, accepted = old_samples.len(), "pattern could not be sampled");
            return PatternVerdict::Stricter;
        }
        let forward = acceptance(&old_samples, &new_re);
        debug!(old, new, forward, "sampled old pattern against new");
        if forward < self.config.acceptance_threshold {
            return PatternVerdict::Stricter;
        }

        let new_samples = self.generate(new, &new_re);
        if new_samples.len() < self.config.min_accepted {
            return PatternVerdict::Relaxed;
        }
        let backward = acceptance(&new_samples, &old_re);
        if backward < self.config.acceptance_threshold {
            PatternVerdict::Relaxed
        } else {
            PatternVerdict::Equivalent
        }
    }

    /// Generate strings from the pattern's syntax tree that its regex accepts
    fn generate(&self, pattern: &str, re: &Regex) -> Vec<String> {
        let hir = match regex_syntax::parse(pattern) {
            Ok(hir) => hir,
            Err(_) => return Vec::new(),
        };
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        (0..self.config.samples)
            .map(|_| {
                let mut out = String::new();
                emit(&hir, &mut rng, self.config.max_repeat, &mut out);
                out
            })
            .filter(|s| re.is_match(s))
            .collect()
    }
}

fn acceptance(samples: &[String], re: &Regex) -> f64 {
    let accepted = samples.iter().filter(|s| re.is_match(s)).count();
    accepted as f64 / samples.len() as f64
}

fn emit(hir: &Hir, rng: &mut StdRng, max_repeat: u32, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(lit) => out.push_str(&String::from_utf8_lossy(&lit.0)),
        HirKind::Class(Class::Unicode(class)) => {
            let ranges: Vec<(u32, u32)> = class
                .ranges()
                .iter()
                .map(|r| (r.start() as u32, r.end() as u32))
                .collect();
            if let Some(c) = pick(&ranges, rng).and_then(char::from_u32) {
                out.push(c);
            }
        }
        HirKind::Class(Class::Bytes(class)) => {
            let ranges: Vec<(u32, u32)> = class
                .ranges()
                .iter()
                .map(|r| (r.start() as u32, r.end() as u32))
                .collect();
            if let Some(c) = pick(&ranges, rng).and_then(char::from_u32) {
                out.push(c);
            }
        }
        HirKind::Repetition(rep) => {
            let ceiling = rep.min.saturating_add(max_repeat);
            let max = rep.max.unwrap_or(ceiling).min(ceiling);
            let count = rng.gen_range(rep.min..=max.max(rep.min));
            for _ in 0..count {
                emit(&rep.sub, rng, max_repeat, out);
            }
        }
        HirKind::Capture(cap) => emit(&cap.sub, rng, max_repeat, out),
        HirKind::Concat(subs) => {
            for sub in subs {
                emit(sub, rng, max_repeat, out);
            }
        }
        HirKind::Alternation(subs) => {
            if !subs.is_empty() {
                let i = rng.gen_range(0..subs.len());
                emit(&subs[i], rng, max_repeat, out);
            }
        }
    }
}

/// Pick a code point from a class, preferring its printable ASCII part
fn pick(ranges: &[(u32, u32)], rng: &mut StdRng) -> Option<u32> {
    if ranges.is_empty() {
        return None;
    }
    let ascii: Vec<(u32, u32)> = ranges
        .iter()
        .filter(|(start, end)| *start <= 0x7e && *end >= 0x20)
        .map(|(start, end)| ((*start).max(0x20), (*end).min(0x7e)))
        .collect();
    let pool: &[(u32, u32)] = if !ascii.is_empty() && rng.gen_bool(0.75) {
        &ascii
    } else {
        ranges
    };
    let (start, end) = pool[rng.gen_range(0..pool.len())];
    let cp = rng.gen_range(start..=end);
    // Surrogates are not chars; fall back to the range start
    Some(if char::from_u32(cp).is_some() { cp } else { start })
}
