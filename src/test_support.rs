use crate::{
    capabilities::{Capabilities, CapabilityError, Directory, Messenger, Storage},
    domain::{Message, SubredditId, SubredditName, UserId, Username},
    memory::MemoryStorage,
    store::SubscriptionStore,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Storage that is never reachable.
#[derive(Debug)]
pub struct BrokenStorage;

#[async_trait]
impl Storage for BrokenStorage {
    async fn add_field(&self, _: &str, _: &str) -> Result<(), CapabilityError> {
        Err("storage is unavailable".into())
    }

    async fn remove_field(&self, _: &str, _: &str) -> Result<(), CapabilityError> {
        Err("storage is unavailable".into())
    }

    async fn fields(&self, _: &str) -> Result<Vec<String>, CapabilityError> {
        Err("storage is unavailable".into())
    }
}

/// Counts every call before delegating to memory.
#[derive(Debug, Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Storage for CountingStorage {
    async fn add_field(&self, key: &str, field: &str) -> Result<(), CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_field(key, field).await
    }

    async fn remove_field(&self, key: &str, field: &str) -> Result<(), CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_field(key, field).await
    }

    async fn fields(&self, key: &str) -> Result<Vec<String>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fields(key).await
    }
}

#[derive(Debug, Default)]
pub struct FakeDirectory {
    pub users: HashMap<UserId, String>,
    pub subreddits: HashMap<SubredditId, String>,
}

impl FakeDirectory {
    pub fn with_user(mut self, id: &str, name: &str) -> Self {
        self.users.insert(UserId(id.into()), name.into());
        self
    }

    pub fn with_subreddit(mut self, id: &str, name: &str) -> Self {
        self.subreddits.insert(SubredditId(id.into()), name.into());
        self
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn user_by_id(&self, id: &UserId) -> Result<Username, CapabilityError> {
        let name = self.users.get(id).ok_or("no such user")?;
        Ok(Username::new(name)?)
    }

    async fn subreddit_by_id(&self, id: &SubredditId) -> Result<SubredditName, CapabilityError> {
        let name = self.subreddits.get(id).ok_or("no such subreddit")?;
        Ok(SubredditName(name.clone()))
    }
}

/// Records every attempted send. Sends to `failing` users are refused.
/// Each send yields once, so overlapping sends show up in `peak_in_flight`.
#[derive(Debug, Default)]
pub struct FakeMessenger {
    pub failing: HashSet<String>,
    pub attempts: Mutex<Vec<(Username, Message)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeMessenger {
    pub fn failing_for(name: &str) -> Self {
        Self {
            failing: [name.to_owned()].into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .attempts
            .lock()
            .iter()
            .map(|(to, _)| to.as_str().to_owned())
            .collect();
        names.sort();
        names
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_private_message(
        &self,
        to: &Username,
        message: &Message,
    ) -> Result<(), CapabilityError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.attempts.lock().push((to.clone(), message.clone()));
        if self.failing.contains(to.as_str()) {
            return Err(format!("unable to message {}", to).into());
        }
        Ok(())
    }
}

pub struct Fakes {
    pub storage: Arc<CountingStorage>,
    pub directory: Arc<FakeDirectory>,
    pub messenger: Arc<FakeMessenger>,
}

impl Fakes {
    pub fn new(directory: FakeDirectory, messenger: FakeMessenger) -> Self {
        Self {
            storage: Default::default(),
            directory: Arc::new(directory),
            messenger: Arc::new(messenger),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            store: SubscriptionStore::new(self.storage.clone(), "subscribed_users"),
            directory: self.directory.clone(),
            messenger: self.messenger.clone(),
        }
    }

    pub fn storage_calls(&self) -> usize {
        self.storage.calls.load(Ordering::SeqCst)
    }
}
