//! Small string helpers

use rand::Rng;

const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random lowercase alphanumeric suffix
///
/// Used to rename objects for the dry-run recreation workaround; the charset
/// is restricted to characters valid in Kubernetes object names.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SUFFIX_CHARS[rng.gen_range(0..SUFFIX_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_length_and_charset() {
        let s = random_suffix(8);
        assert_eq!(s.len(), 8);
        assert!(s.bytes().all(|b| SUFFIX_CHARS.contains(&b)));
    }

    #[test]
    fn test_suffixes_differ() {
        // Not a strict guarantee, but 36^16 collisions are not a flake risk.
        assert_ne!(random_suffix(16), random_suffix(16));
    }
}
