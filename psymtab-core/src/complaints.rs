use std::collections::HashMap;

/// Collects parser complaints about corrupt or surprising input.
///
/// Complaints never stop a build; they are counted per kind, and logged
/// once per distinct kind per build so that a file with ten thousand bad
/// records produces one warning, not ten thousand.
#[derive(Debug, Default)]
pub struct ComplaintSink {
    counts: HashMap<&'static str, u64>,
}

impl ComplaintSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a complaint of `kind`.
    ///
    /// The message is only rendered for the first complaint of each kind.
    pub fn complain(&mut self, kind: &'static str, message: impl FnOnce() -> String) {
        let count = self.counts.entry(kind).or_insert(0);
        *count += 1;
        if *count == 1 {
            tracing::warn!(kind, "{}", message());
        }
    }

    /// How many complaints of `kind` were registered.
    pub fn count(&self, kind: &'static str) -> u64 {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    /// Total complaints across all kinds.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct complaint kinds seen.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let mut sink = ComplaintSink::new();
        for _ in 0..3 {
            sink.complain("bad-record", || "bad record".to_owned());
        }
        sink.complain("unknown-type", || "unknown type 0x99".to_owned());

        assert_eq!(sink.count("bad-record"), 3);
        assert_eq!(sink.count("unknown-type"), 1);
        assert_eq!(sink.count("never-seen"), 0);
        assert_eq!(sink.total(), 4);
        assert_eq!(sink.distinct(), 2);
    }
}
