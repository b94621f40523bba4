use crate::{
    capabilities::{CapabilityError, Storage},
    domain::{SubredditId, Username},
};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_SUBSCRIPTIONS_KEY: &str = "subscribed_users";

/// The set of users who want to hear about new posts, one set per
/// subreddit. Membership changes are idempotent.
#[derive(Debug, Clone)]
pub struct SubscriptionStore {
    storage: Arc<dyn Storage>,
    key_prefix: String,
}

impl SubscriptionStore {
    pub fn new(storage: Arc<dyn Storage>, key_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, subreddit: &SubredditId) -> String {
        format!("{}:{}", self.key_prefix, subreddit.0)
    }

    pub async fn subscribe(&self, subreddit: &SubredditId, user: &Username) -> Result<()> {
        let key = self.key(subreddit);
        self.storage
            .add_field(&key, user.as_str())
            .await
            .context(UnableToAddSubscriberSnafu { key })
    }

    pub async fn unsubscribe(&self, subreddit: &SubredditId, user: &Username) -> Result<()> {
        let key = self.key(subreddit);
        self.storage
            .remove_field(&key, user.as_str())
            .await
            .context(UnableToRemoveSubscriberSnafu { key })
    }

    /// Every subscriber of the subreddit, in no particular order.
    pub async fn subscribers(&self, subreddit: &SubredditId) -> Result<Vec<Username>> {
        let key = self.key(subreddit);
        let fields = self
            .storage
            .fields(&key)
            .await
            .context(UnableToListSubscribersSnafu { key: &key })?;

        Ok(fields
            .into_iter()
            .filter_map(|field| match Username::new(&field) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("Skipping stored subscriber {:?} of {}: {}", field, key, e);
                    None
                }
            })
            .collect())
    }

    #[cfg(test)]
    pub async fn is_subscribed(&self, subreddit: &SubredditId, user: &Username) -> Result<bool> {
        Ok(self.subscribers(subreddit).await?.contains(user))
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to add subscriber to {}", key))]
    UnableToAddSubscriber {
        source: CapabilityError,
        key: String,
    },

    #[snafu(display("Unable to remove subscriber from {}", key))]
    UnableToRemoveSubscriber {
        source: CapabilityError,
        key: String,
    },

    #[snafu(display("Unable to list subscribers of {}", key))]
    UnableToListSubscribers {
        source: CapabilityError,
        key: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryStorage, test_support::BrokenStorage};

    fn store() -> SubscriptionStore {
        SubscriptionStore::new(Arc::new(MemoryStorage::default()), "subs")
    }

    fn sub(id: &str) -> SubredditId {
        SubredditId(id.into())
    }

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    #[tokio::test]
    async fn subscribing_twice_keeps_one_entry() {
        let store = store();
        let testsub = sub("t5_testsub");

        store.subscribe(&testsub, &user("alice")).await.unwrap();
        store.subscribe(&testsub, &user("alice")).await.unwrap();

        assert_eq!(store.subscribers(&testsub).await.unwrap(), [user("alice")]);
    }

    #[tokio::test]
    async fn unsubscribing_an_absent_user_changes_nothing() {
        let store = store();
        let testsub = sub("t5_testsub");
        store.subscribe(&testsub, &user("alice")).await.unwrap();

        store.unsubscribe(&testsub, &user("bob")).await.unwrap();

        assert_eq!(store.subscribers(&testsub).await.unwrap(), [user("alice")]);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe() {
        let store = store();
        let testsub = sub("t5_testsub");

        store.subscribe(&testsub, &user("carol")).await.unwrap();
        assert!(store.is_subscribed(&testsub, &user("carol")).await.unwrap());

        store.unsubscribe(&testsub, &user("carol")).await.unwrap();
        assert!(!store.is_subscribed(&testsub, &user("carol")).await.unwrap());
    }

    #[tokio::test]
    async fn membership_ignores_case() {
        let store = store();
        let testsub = sub("t5_testsub");

        store.subscribe(&testsub, &user("Alice")).await.unwrap();

        assert!(store.is_subscribed(&testsub, &user("alice")).await.unwrap());
        store.unsubscribe(&testsub, &user("ALICE")).await.unwrap();
        assert!(store.subscribers(&testsub).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subreddits_are_independent() {
        let store = store();

        store.subscribe(&sub("t5_one"), &user("alice")).await.unwrap();

        assert!(store.subscribers(&sub("t5_two")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failures_are_reported() {
        let store = SubscriptionStore::new(Arc::new(BrokenStorage), "subs");

        let e = store
            .subscribe(&sub("t5_testsub"), &user("alice"))
            .await
            .unwrap_err();

        assert!(matches!(e, Error::UnableToAddSubscriber { ref key, .. } if key == "subs:t5_testsub"));
        assert!(store.subscribers(&sub("t5_testsub")).await.is_err());
    }
}
