//! Monotonic usage accumulation for streaming invocations

use crate::normalized::UsageInfo;

/// Running usage snapshot for one stream.
///
/// Vendors report usage piecemeal: prompt counts up front, completion counts at
/// the end, sometimes a cumulative total in between. The tracker merges every
/// report field-wise by maximum, so no emitted counter ever decreases, and only
/// reports snapshots that actually changed.
#[derive(Debug, Default, Clone)]
pub struct UsageTracker {
    current: UsageInfo,
    emitted: bool,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a vendor report; returns the new snapshot when it differs from the last one emitted
    pub fn observe(&mut self, update: UsageInfo) -> Option<UsageInfo> {
        let prompt = self.current.prompt_tokens.max(update.prompt_tokens);
        let completion = self.current.completion_tokens.max(update.completion_tokens);

        let next = UsageInfo {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: self
                .current
                .total_tokens
                .max(update.total_tokens)
                .max(prompt.saturating_add(completion)),
            cache_read_tokens: self.current.cache_read_tokens.max(update.cache_read_tokens),
            cache_creation_tokens: self
                .current
                .cache_creation_tokens
                .max(update.cache_creation_tokens),
        };

        if self.emitted && next == self.current {
            return None;
        }
        if !self.emitted && next == UsageInfo::default() {
            return None;
        }

        self.current = next;
        self.emitted = true;
        Some(next)
    }

    pub fn current(&self) -> UsageInfo {
        self.current
    }
}
