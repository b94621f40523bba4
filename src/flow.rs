use crate::{
    capabilities::{Capabilities, CapabilityError},
    domain::{
        DispatchReport, MenuAction, Message, Post, PostCreate, SubredditId, SubredditName,
        UserId, Username,
    },
};
use futures::{future, stream, StreamExt};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{info, trace, trace_span, warn, Instrument};
use url::Url;

/// Who is acting and where. Built fresh for every UI request.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub user_id: Option<UserId>,
    pub subreddit_id: SubredditId,
}

#[derive(Debug, Clone)]
pub struct SubscriptionFlow {
    caps: Capabilities,
}

impl SubscriptionFlow {
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    /// Adds or removes the acting user. Returns the normalized name that
    /// was stored.
    pub async fn run(&self, action: MenuAction, context: &ActionContext) -> Result<Username> {
        let Self { caps } = self;
        let ActionContext {
            user_id,
            subreddit_id,
        } = context;

        let user_id = user_id.as_ref().context(NotLoggedInSnafu)?;
        let user = caps
            .directory
            .user_by_id(user_id)
            .await
            .context(UnableToLookUpActorSnafu {
                user_id: user_id.clone(),
            })?;

        let updated = match action {
            MenuAction::Subscribe => caps.store.subscribe(subreddit_id, &user).await,
            MenuAction::Unsubscribe => caps.store.unsubscribe(subreddit_id, &user).await,
        };
        updated.context(UnableToUpdateSubscriptionSnafu { action })?;

        trace!(%user, subreddit = %subreddit_id.0, ?action, "Updated subscription");
        Ok(user)
    }
}

#[derive(Debug, Clone)]
pub struct NotifyFlow {
    caps: Capabilities,
    link_base: Url,
    concurrency: usize,
}

impl NotifyFlow {
    pub fn new(caps: Capabilities, link_base: Url, concurrency: usize) -> Self {
        Self {
            caps,
            link_base,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn notify(&self, event: PostCreate) -> Result<DispatchReport> {
        let post = match event.post {
            Some(post) => post,
            None => {
                warn!("PostCreate event received without post data.");
                return Ok(DispatchReport::default());
            }
        };

        let s = trace_span!("notify", post = %post.id.0);
        self.notify_post(post).instrument(s).await
    }

    async fn notify_post(&self, post: Post) -> Result<DispatchReport> {
        let Self {
            caps,
            link_base,
            concurrency,
        } = self;

        trace!(permalink = %post.permalink, "Handling new post");

        let subscribers = caps
            .store
            .subscribers(&post.subreddit_id)
            .await
            .context(UnableToListSubscribersSnafu)?;

        if subscribers.is_empty() {
            trace!("No one to notify");
            return Ok(DispatchReport::default());
        }

        let (author, subreddit) = future::try_join(
            async {
                caps.directory
                    .user_by_id(&post.author_id)
                    .await
                    .context(UnableToLookUpAuthorSnafu {
                        user_id: post.author_id.clone(),
                    })
            },
            async {
                caps.directory
                    .subreddit_by_id(&post.subreddit_id)
                    .await
                    .context(UnableToLookUpSubredditSnafu {
                        subreddit_id: post.subreddit_id.clone(),
                    })
            },
        )
        .await?;

        let message = compose(link_base, &post, &author, &subreddit)?;
        let message = &message;
        let messenger = &*caps.messenger;

        let outcomes: Vec<_> = stream::iter(subscribers)
            .map(|to| async move {
                let r = messenger.send_private_message(&to, message).await;
                (to, r)
            })
            .buffer_unordered(*concurrency)
            .collect()
            .await;

        let mut report = DispatchReport::default();
        for (to, outcome) in outcomes {
            match outcome {
                Ok(()) => report.notified += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Unable to notify {} about post {}: {}", to, post.id.0, e);
                }
            }
        }

        info!(
            "Notified {} users about post {} ({} failed).",
            report.notified, post.id.0, report.failed,
        );

        Ok(report)
    }
}

/// Appends to the base's path, so a base such as `https://host/reddit`
/// keeps its `reddit` segment.
pub fn post_link(link_base: &Url, subreddit: &SubredditName, post: &Post) -> Result<Url> {
    let mut link = link_base.clone();
    link.path_segments_mut()
        .ok()
        .context(UnableToBuildPostLinkSnafu {
            link_base: link_base.clone(),
        })?
        .pop_if_empty()
        .extend(&["r", subreddit.0.as_str(), "comments", post.id.bare(), "_", ""]);
    Ok(link)
}

pub fn compose(
    link_base: &Url,
    post: &Post,
    author: &Username,
    subreddit: &SubredditName,
) -> Result<Message> {
    let link = post_link(link_base, subreddit, post)?;

    Ok(Message {
        subject: format!("New Post in r/{}", subreddit.0),
        text: format!("u/{} posted: \"{}\"\n\n{}", author, post.title, link),
    })
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("You must be logged in"))]
    NotLoggedIn,

    #[snafu(display("Unable to look up acting user {}", user_id.0))]
    UnableToLookUpActor {
        source: CapabilityError,
        user_id: UserId,
    },

    #[snafu(display("Unable to {:?}", action))]
    UnableToUpdateSubscription {
        source: crate::store::Error,
        action: MenuAction,
    },

    UnableToListSubscribers {
        source: crate::store::Error,
    },

    #[snafu(display("Unable to look up post author {}", user_id.0))]
    UnableToLookUpAuthor {
        source: CapabilityError,
        user_id: UserId,
    },

    #[snafu(display("Unable to look up subreddit {}", subreddit_id.0))]
    UnableToLookUpSubreddit {
        source: CapabilityError,
        subreddit_id: SubredditId,
    },

    #[snafu(display("Unable to build post links under {}", link_base))]
    UnableToBuildPostLink { link_base: Url },
}

type Result<T, E = Error> = std::result::Result<T, E>;
