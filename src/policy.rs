use crate::error::JudgeResult;
use crate::types::{AttemptState, Category, DisclosureTier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Externally persisted per-(student, problem) attempt state, accessed
/// through a narrow read-modify-write interface.
///
/// Implementations must serialize `record` per key: two concurrent
/// submissions for the same pair never both observe the same pre-increment
/// count. No global lock across unrelated keys.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Apply one submission's category to the key's state and return the
    /// state after the update. Called exactly once per submission.
    async fn record(
        &self,
        student_id: &str,
        problem_id: &str,
        category: Category,
    ) -> JudgeResult<AttemptState>;

    /// Current state without modifying it.
    async fn peek(&self, student_id: &str, problem_id: &str) -> JudgeResult<AttemptState>;
}

type Key = (String, String);

/// In-memory store: a sharded map of per-key mutexes. The outer lock is
/// held only to find or insert the entry; the read-modify-write itself runs
/// under the per-key mutex.
#[derive(Default)]
pub struct MemoryAttemptStore {
    entries: RwLock<HashMap<Key, Arc<Mutex<AttemptState>>>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, student_id: &str, problem_id: &str) -> Arc<Mutex<AttemptState>> {
        let key = (student_id.to_string(), problem_id.to_string());
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                return Arc::clone(entry);
            }
        }
        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(key).or_default())
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn record(
        &self,
        student_id: &str,
        problem_id: &str,
        category: Category,
    ) -> JudgeResult<AttemptState> {
        let entry = self.entry(student_id, problem_id).await;
        let mut state = entry.lock().await;
        if category == Category::Pass {
            // A successful submission clears escalation history.
            state.attempt_count = 0;
            state.history.clear();
        } else {
            state.attempt_count += 1;
            state.history.push(category);
        }
        Ok(state.clone())
    }

    async fn peek(&self, student_id: &str, problem_id: &str) -> JudgeResult<AttemptState> {
        let entry = self.entry(student_id, problem_id).await;
        let state = entry.lock().await;
        Ok(state.clone())
    }
}

/// Decides what tier of assistance a submission's attempt unlocks.
///
/// Deliberate pedagogy: mechanical fixes are withheld until struggle is
/// evidenced by repetition. Attempt 1 gets the category and a vague hint,
/// attempt 2 adds a grounded citation, attempt 3 and later unlock a patch.
pub struct EscalationPolicy {
    store: Arc<dyn AttemptStore>,
}

impl EscalationPolicy {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self { store }
    }

    pub fn tier_for(attempt_count: u32, category: Category) -> DisclosureTier {
        if category == Category::Pass {
            return DisclosureTier::VerdictOnly;
        }
        match attempt_count {
            0 | 1 => DisclosureTier::Hint,
            2 => DisclosureTier::HintWithCitation,
            _ => DisclosureTier::HintWithPatch,
        }
    }

    /// Attempt number the next submission will carry if it fails.
    pub async fn upcoming_attempt(
        &self,
        student_id: &str,
        problem_id: &str,
    ) -> JudgeResult<u32> {
        Ok(self.store.peek(student_id, problem_id).await?.attempt_count + 1)
    }

    /// Record one submission and return the updated state plus the tier it
    /// unlocks. Increments or resets the persisted state exactly once.
    pub async fn record(
        &self,
        student_id: &str,
        problem_id: &str,
        category: Category,
    ) -> JudgeResult<(AttemptState, DisclosureTier)> {
        let state = self.store.record(student_id, problem_id, category).await?;
        let tier = Self::tier_for(state.attempt_count, category);
        info!(
            student_id,
            problem_id,
            category = category.as_str(),
            attempt = state.attempt_count,
            tier = ?tier,
            "attempt recorded"
        );
        Ok((state, tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EscalationPolicy {
        EscalationPolicy::new(Arc::new(MemoryAttemptStore::new()))
    }

    #[tokio::test]
    async fn tiers_escalate_with_repeated_failure() {
        let policy = policy();
        let (state, tier) = policy.record("s1", "p1", Category::Syntax).await.unwrap();
        assert_eq!(state.attempt_count, 1);
        assert_eq!(tier, DisclosureTier::Hint);

        let (state, tier) = policy.record("s1", "p1", Category::Logic).await.unwrap();
        assert_eq!(state.attempt_count, 2);
        assert_eq!(tier, DisclosureTier::HintWithCitation);

        let (state, tier) = policy.record("s1", "p1", Category::Logic).await.unwrap();
        assert_eq!(state.attempt_count, 3);
        assert_eq!(tier, DisclosureTier::HintWithPatch);

        let (state, tier) = policy.record("s1", "p1", Category::Runtime).await.unwrap();
        assert_eq!(state.attempt_count, 4);
        assert_eq!(tier, DisclosureTier::HintWithPatch);
        assert_eq!(
            state.history,
            vec![Category::Syntax, Category::Logic, Category::Logic, Category::Runtime]
        );
    }

    #[tokio::test]
    async fn pass_resets_attempt_state() {
        let policy = policy();
        policy.record("s1", "p1", Category::Logic).await.unwrap();
        policy.record("s1", "p1", Category::Logic).await.unwrap();

        let (state, tier) = policy.record("s1", "p1", Category::Pass).await.unwrap();
        assert_eq!(state.attempt_count, 0);
        assert!(state.history.is_empty());
        assert_eq!(tier, DisclosureTier::VerdictOnly);

        // Escalation starts over after the reset.
        let (state, tier) = policy.record("s1", "p1", Category::Logic).await.unwrap();
        assert_eq!(state.attempt_count, 1);
        assert_eq!(tier, DisclosureTier::Hint);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let policy = policy();
        policy.record("s1", "p1", Category::Logic).await.unwrap();
        policy.record("s1", "p1", Category::Logic).await.unwrap();

        let (state, _) = policy.record("s1", "p2", Category::Logic).await.unwrap();
        assert_eq!(state.attempt_count, 1);
        let (state, _) = policy.record("s2", "p1", Category::Logic).await.unwrap();
        assert_eq!(state.attempt_count, 1);
    }

    #[tokio::test]
    async fn concurrent_records_never_lose_an_update() {
        let store = Arc::new(MemoryAttemptStore::new());
        let policy = Arc::new(EscalationPolicy::new(store));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let policy = Arc::clone(&policy);
            handles.push(tokio::spawn(async move {
                let (state, _) = policy.record("s1", "p1", Category::Logic).await.unwrap();
                state.attempt_count
            }));
        }

        let mut observed = Vec::new();
        for handle in handles {
            observed.push(handle.await.unwrap());
        }
        observed.sort_unstable();
        // Every submission observed a distinct post-increment count.
        assert_eq!(observed, (1..=16).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn monotonic_tier_across_non_pass_attempts() {
        let policy = policy();
        let mut last = DisclosureTier::VerdictOnly;
        for _ in 0..5 {
            let (_, tier) = policy.record("s1", "p1", Category::Runtime).await.unwrap();
            assert!(tier >= last);
            last = tier;
        }
    }
}
