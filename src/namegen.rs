//! Random resource name generation
//!
//! Every generated cluster, pool, credential and machine config gets a name of
//! the form `tfp-xxxxx`, where the suffix is five lowercase alphanumerics.

use std::collections::HashSet;

use rand::Rng;

/// Prefix for every generated name
pub const NAME_PREFIX: &str = "tfp";

const SUFFIX_LEN: usize = 5;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Append a random lowercase alphanumeric suffix to `prefix`
pub fn append_random_string(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}

/// Generates names that are unique for the lifetime of the generator
///
/// Collisions with previously issued names are regenerated, so one generator
/// shared across a run never hands out the same name twice.
#[derive(Debug, Default)]
pub struct NameGenerator {
    issued: HashSet<String>,
}

impl NameGenerator {
    /// Create an empty generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh `tfp-xxxxx` name not handed out before
    pub fn next_name(&mut self) -> String {
        loop {
            let candidate = append_random_string(NAME_PREFIX);
            if self.issued.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Number of names issued so far
    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_have_prefix_and_five_char_suffix() {
        let name = append_random_string(NAME_PREFIX);
        let suffix = name.strip_prefix("tfp-").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn generator_never_repeats_a_name() {
        let mut gen = NameGenerator::new();
        let names: HashSet<String> = (0..500).map(|_| gen.next_name()).collect();
        assert_eq!(names.len(), 500);
        assert_eq!(gen.issued(), 500);
    }
}
