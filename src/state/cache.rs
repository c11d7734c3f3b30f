//! Conversation-scoped ephemeral cache.
//!
//! Working data that does not need durability — flow scratch, partially
//! collected user input — lives here instead of the versioned store, which
//! keeps it clear of the optimistic-concurrency protocol entirely. The cache
//! is last-write-wins and lost on restart; everything in it must be
//! re-askable from the user.
//!
//! Unlike the module-level map it replaces, the cache is an explicit,
//! injectable value with a bounded LRU capacity, so long-running processes
//! shed idle conversations instead of growing forever.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde_json::Value;

/// Per-conversation key/value bags, bounded by LRU over conversations.
#[derive(Debug)]
pub struct ConversationCache {
    bags: Mutex<LruCache<String, HashMap<String, Value>>>,
}

impl ConversationCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            bags: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Stored value for a key, or `None`. Never fails.
    pub fn get(&self, conversation_id: &str, key: &str) -> Option<Value> {
        let mut bags = self.bags.lock().unwrap_or_else(|e| e.into_inner());
        bags.get(conversation_id).and_then(|bag| bag.get(key).cloned())
    }

    /// Insert or overwrite a key, creating the conversation's bag if absent.
    pub fn set(&self, conversation_id: &str, key: &str, value: Value) {
        let mut bags = self.bags.lock().unwrap_or_else(|e| e.into_inner());
        match bags.get_mut(conversation_id) {
            Some(bag) => {
                bag.insert(key.to_string(), value);
            }
            None => {
                let mut bag = HashMap::new();
                bag.insert(key.to_string(), value);
                bags.put(conversation_id.to_string(), bag);
            }
        }
    }

    /// Drop the whole bag for a conversation. Used by reset and by conflict
    /// recovery to discard potentially inconsistent working data.
    pub fn clear(&self, conversation_id: &str) {
        let mut bags = self.bags.lock().unwrap_or_else(|e| e.into_inner());
        bags.pop(conversation_id);
    }

    /// Number of conversations currently holding a bag.
    pub fn len(&self) -> usize {
        let bags = self.bags.lock().unwrap_or_else(|e| e.into_inner());
        bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(capacity: usize) -> ConversationCache {
        ConversationCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn set_then_get_returns_value() {
        let cache = cache(8);
        cache.set("conv1", "flowState", json!("waiting"));
        assert_eq!(cache.get("conv1", "flowState"), Some(json!("waiting")));
    }

    #[test]
    fn get_absent_returns_none() {
        let cache = cache(8);
        assert_eq!(cache.get("conv1", "anything"), None);
        cache.set("conv1", "a", json!(1));
        assert_eq!(cache.get("conv1", "b"), None);
    }

    #[test]
    fn set_overwrites_existing_key() {
        let cache = cache(8);
        cache.set("conv1", "step", json!(1));
        cache.set("conv1", "step", json!(2));
        assert_eq!(cache.get("conv1", "step"), Some(json!(2)));
    }

    #[test]
    fn clear_then_get_returns_none() {
        let cache = cache(8);
        cache.set("conv1", "flowState", json!("waiting"));
        cache.clear("conv1");
        assert_eq!(cache.get("conv1", "flowState"), None);
    }

    #[test]
    fn conversations_do_not_interfere() {
        let cache = cache(8);
        cache.set("conv1", "k", json!("one"));
        cache.set("conv2", "k", json!("two"));
        cache.clear("conv1");
        assert_eq!(cache.get("conv1", "k"), None);
        assert_eq!(cache.get("conv2", "k"), Some(json!("two")));
    }

    #[test]
    fn capacity_evicts_least_recently_used_bag() {
        let cache = cache(2);
        cache.set("conv1", "k", json!(1));
        cache.set("conv2", "k", json!(2));
        // Touch conv1 so conv2 becomes the LRU entry.
        let _ = cache.get("conv1", "k");
        cache.set("conv3", "k", json!(3));

        assert_eq!(cache.get("conv2", "k"), None);
        assert_eq!(cache.get("conv1", "k"), Some(json!(1)));
        assert_eq!(cache.get("conv3", "k"), Some(json!(3)));
        assert_eq!(cache.len(), 2);
    }
}
