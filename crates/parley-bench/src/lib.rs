//! Shared fixtures for parley benchmarks.

/// Generate a message body of the given size.
#[must_use]
pub fn body_of(size: usize) -> String {
    "x".repeat(size)
}

/// Generate `n` distinct usernames.
#[must_use]
pub fn usernames(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user-{i}")).collect()
}
