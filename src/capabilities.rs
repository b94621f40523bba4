//! The external capabilities the relay calls into. Each handler receives
//! them explicitly through [`Capabilities`]; nothing here is global.

use crate::{
    domain::{Message, SubredditId, SubredditName, UserId, Username},
    store::SubscriptionStore,
};
use async_trait::async_trait;
use std::{fmt, sync::Arc};

pub type CapabilityError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A key/field store: every key holds a set of fields with empty values.
#[async_trait]
pub trait Storage: fmt::Debug + Send + Sync {
    async fn add_field(&self, key: &str, field: &str) -> Result<(), CapabilityError>;

    async fn remove_field(&self, key: &str, field: &str) -> Result<(), CapabilityError>;

    async fn fields(&self, key: &str) -> Result<Vec<String>, CapabilityError>;
}

#[async_trait]
pub trait Directory: fmt::Debug + Send + Sync {
    async fn user_by_id(&self, id: &UserId) -> Result<Username, CapabilityError>;

    async fn subreddit_by_id(&self, id: &SubredditId) -> Result<SubredditName, CapabilityError>;
}

#[async_trait]
pub trait Messenger: fmt::Debug + Send + Sync {
    async fn send_private_message(
        &self,
        to: &Username,
        message: &Message,
    ) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone)]
pub struct Capabilities {
    pub store: SubscriptionStore,
    pub directory: Arc<dyn Directory>,
    pub messenger: Arc<dyn Messenger>,
}
