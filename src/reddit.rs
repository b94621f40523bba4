use crate::{
    capabilities::{CapabilityError, Directory, Messenger},
    domain::{Message, SubredditId, SubredditName, UserId, Username},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use std::{
    collections::HashMap,
    env,
    time::{Duration, Instant},
};
use tracing::{trace, trace_span, Instrument};
use url::Url;

const ACCESS_TOKEN_URI: &str = "https://www.reddit.com/api/v1/access_token";
const API_URI: &str = "https://oauth.reddit.com/";

/// Tokens are refreshed this long before Reddit says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    expires_at: Instant,
}

impl CachedToken {
    fn new(token: AccessToken, expires_in: u64, now: Instant) -> Self {
        let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        Self {
            token,
            expires_at: now + lifetime,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

impl<T> Listing<T> {
    fn into_singleton(mut self) -> Option<T> {
        let children = &mut self.data.children;
        let v = children.pop();
        v.filter(|_| children.is_empty()).map(|t| t.data)
    }
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct UserData {
    name: String,
}

/// `api/user_data_by_account_ids` answers with an object keyed by the
/// requested ids and silently leaves out the ones it does not know.
fn user_name(mut users: HashMap<String, UserData>, id: &UserId) -> Result<String> {
    let user = users.remove(&id.0).context(UnknownUserSnafu { id: &id.0 })?;
    Ok(user.name)
}

#[derive(Debug, Deserialize)]
struct SubredditData {
    display_name: String,
}

#[derive(Debug, Snafu, Deserialize)]
#[snafu(display("Reddit rejected the request: {:?}", errors))]
pub struct ApiError {
    #[serde(default)]
    errors: Vec<Vec<Option<String>>>,
}

/// `api_type=json` responses wrap everything in a `json` object.
#[derive(Debug, Deserialize)]
struct JsonWrapper {
    json: ApiError,
}

//--

#[derive(Debug, Clone)]
pub struct Config {
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    user_agent: String,
    access_token: Url,
    api: Url,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|name| env::var(name))
    }

    fn from_lookup(var: impl Fn(&str) -> Result<String, env::VarError>) -> Result<Self> {
        let client_id = var("REDDIT_CLIENT_ID").context(UnknownClientIdSnafu)?;
        let client_secret = var("REDDIT_CLIENT_SECRET").context(UnknownClientSecretSnafu)?;
        let username = var("REDDIT_USERNAME").context(UnknownUsernameSnafu)?;
        let password = var("REDDIT_PASSWORD").context(UnknownPasswordSnafu)?;
        let user_agent = var("REDDIT_USER_AGENT")
            .unwrap_or_else(|_| format!("new-post-relay/{}", crate::VERSION));

        Self::new(client_id, client_secret, username, password, user_agent)
    }

    fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Result<Self> {
        let access_token = Url::parse(ACCESS_TOKEN_URI).context(UnableToConfigureTokenUrlSnafu)?;
        let api = Url::parse(API_URI).context(UnableToConfigureApiUrlSnafu)?;

        Ok(Config {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            username: username.into(),
            password: password.into(),
            user_agent: user_agent.into(),
            access_token,
            api,
        })
    }

    pub fn into_client(self) -> Result<Client> {
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .build()
            .context(UnableToBuildClientSnafu)?;

        Ok(Client {
            client,
            config: self,
            token: Default::default(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api.join(path).context(UnableToBuildEndpointSnafu { path })
    }
}

/// A script-app client acting as the relay's own Reddit account.
#[derive(Debug)]
pub struct Client {
    client: reqwest::Client,
    config: Config,
    token: Mutex<Option<CachedToken>>,
}

impl Client {
    async fn access_token(&self) -> Result<AccessToken> {
        let Self {
            client,
            config,
            token,
        } = self;

        let cached = token.lock().clone();
        if let Some(cached) = cached {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.token);
            }
        }

        #[derive(Debug, Serialize)]
        struct AccessTokenParams<'a> {
            grant_type: &'a str,
            username: &'a str,
            password: &'a str,
        }

        #[derive(Debug, Deserialize)]
        struct AccessTokenResponse {
            access_token: AccessToken,
            expires_in: u64,
        }

        let params = AccessTokenParams {
            grant_type: "password",
            username: &config.username,
            password: &config.password,
        };

        trace!("Requesting a new access token");
        let res = client
            .post(config.access_token.clone())
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&params)
            .send()
            .await
            .context(UnableToExecuteAccessTokenRequestSnafu)?
            .error_for_status()
            .context(AccessTokenRequestFailedSnafu)?
            .json::<AccessTokenResponse>()
            .await
            .context(UnableToDeserializeAccessTokenRequestSnafu)?;

        *token.lock() = Some(CachedToken::new(
            res.access_token.clone(),
            res.expires_in,
            Instant::now(),
        ));

        Ok(res.access_token)
    }

    pub async fn user(&self, id: &UserId) -> Result<String> {
        let s = trace_span!("user", id = %id.0);
        async {
            let access_token = self.access_token().await?;
            let url = self.config.endpoint("api/user_data_by_account_ids")?;

            let users = self
                .client
                .get(url)
                .bearer_auth(&access_token.0)
                .query(&[("ids", &*id.0)])
                .send()
                .await
                .context(UnableToExecuteUserRequestSnafu)?
                .error_for_status()
                .context(UserRequestFailedSnafu)?
                .json::<HashMap<String, UserData>>()
                .await
                .context(UnableToDeserializeUserRequestSnafu)?;

            user_name(users, id)
        }
        .instrument(s)
        .await
    }

    pub async fn subreddit(&self, id: &SubredditId) -> Result<String> {
        let s = trace_span!("subreddit", id = %id.0);
        async {
            let access_token = self.access_token().await?;
            let url = self.config.endpoint("api/info")?;

            let subreddit = self
                .client
                .get(url)
                .bearer_auth(&access_token.0)
                .query(&[("id", &*id.0)])
                .send()
                .await
                .context(UnableToExecuteSubredditRequestSnafu)?
                .error_for_status()
                .context(SubredditRequestFailedSnafu)?
                .json::<Listing<SubredditData>>()
                .await
                .context(UnableToDeserializeSubredditRequestSnafu)?
                .into_singleton()
                .context(SubredditRequestDidNotHaveOneResultSnafu { id: &id.0 })?;

            Ok(subreddit.display_name)
        }
        .instrument(s)
        .await
    }

    pub async fn compose(&self, to: &str, subject: &str, text: &str) -> Result<()> {
        let s = trace_span!("compose", to);
        async {
            #[derive(Debug, Serialize)]
            struct ComposeParams<'a> {
                api_type: &'a str,
                to: &'a str,
                subject: &'a str,
                text: &'a str,
            }

            let access_token = self.access_token().await?;
            let url = self.config.endpoint("api/compose")?;

            let params = ComposeParams {
                api_type: "json",
                to,
                subject,
                text,
            };

            let res = self
                .client
                .post(url)
                .bearer_auth(&access_token.0)
                .form(&params)
                .send()
                .await
                .context(UnableToExecuteComposeRequestSnafu)?
                .error_for_status()
                .context(ComposeRequestFailedSnafu)?
                .json::<JsonWrapper>()
                .await
                .context(UnableToDeserializeComposeRequestSnafu)?;

            if !res.json.errors.is_empty() {
                return Err(res.json).context(ComposeRejectedSnafu { to });
            }

            trace!("Message sent");
            Ok(())
        }
        .instrument(s)
        .await
    }
}

#[async_trait]
impl Directory for Client {
    async fn user_by_id(&self, id: &UserId) -> Result<Username, CapabilityError> {
        let name = self.user(id).await?;
        Ok(Username::new(&name)?)
    }

    async fn subreddit_by_id(&self, id: &SubredditId) -> Result<SubredditName, CapabilityError> {
        Ok(SubredditName(self.subreddit(id).await?))
    }
}

#[async_trait]
impl Messenger for Client {
    async fn send_private_message(
        &self,
        to: &Username,
        message: &Message,
    ) -> Result<(), CapabilityError> {
        self.compose(to.as_str(), &message.subject, &message.text)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("REDDIT_CLIENT_ID must be set"))]
    UnknownClientId {
        source: env::VarError,
    },

    #[snafu(display("REDDIT_CLIENT_SECRET must be set"))]
    UnknownClientSecret {
        source: env::VarError,
    },

    #[snafu(display("REDDIT_USERNAME must be set"))]
    UnknownUsername {
        source: env::VarError,
    },

    #[snafu(display("REDDIT_PASSWORD must be set"))]
    UnknownPassword {
        source: env::VarError,
    },

    UnableToConfigureTokenUrl {
        source: url::ParseError,
    },

    UnableToConfigureApiUrl {
        source: url::ParseError,
    },

    #[snafu(display("Unable to build the endpoint {}", path))]
    UnableToBuildEndpoint {
        source: url::ParseError,
        path: String,
    },

    UnableToBuildClient {
        source: reqwest::Error,
    },

    UnableToExecuteAccessTokenRequest {
        source: reqwest::Error,
    },

    AccessTokenRequestFailed {
        source: reqwest::Error,
    },

    UnableToDeserializeAccessTokenRequest {
        source: reqwest::Error,
    },

    UnableToExecuteUserRequest {
        source: reqwest::Error,
    },

    UserRequestFailed {
        source: reqwest::Error,
    },

    UnableToDeserializeUserRequest {
        source: reqwest::Error,
    },

    #[snafu(display("Reddit does not know the user {}", id))]
    UnknownUser {
        id: String,
    },

    UnableToExecuteSubredditRequest {
        source: reqwest::Error,
    },

    SubredditRequestFailed {
        source: reqwest::Error,
    },

    UnableToDeserializeSubredditRequest {
        source: reqwest::Error,
    },

    #[snafu(display("Reddit did not return exactly one subreddit for {}", id))]
    SubredditRequestDidNotHaveOneResult {
        id: String,
    },

    UnableToExecuteComposeRequest {
        source: reqwest::Error,
    },

    ComposeRequestFailed {
        source: reqwest::Error,
    },

    UnableToDeserializeComposeRequest {
        source: reqwest::Error,
    },

    #[snafu(display("Unable to message {}", to))]
    ComposeRejected {
        to: String,
        source: ApiError,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<_, _> = vars.iter().copied().collect();
        Config::from_lookup(|name| {
            vars.get(name)
                .map(|v| v.to_string())
                .ok_or(env::VarError::NotPresent)
        })
    }

    const CREDENTIALS: [(&str, &str); 4] = [
        ("REDDIT_CLIENT_ID", "id"),
        ("REDDIT_CLIENT_SECRET", "secret"),
        ("REDDIT_USERNAME", "relay"),
        ("REDDIT_PASSWORD", "hunter2"),
    ];

    #[test]
    fn the_user_agent_names_the_relay_by_default() {
        let defaulted = config(&CREDENTIALS).unwrap();

        assert_eq!(defaulted.client_id, "id");
        assert_eq!(defaulted.username, "relay");
        assert_eq!(defaulted.user_agent, format!("new-post-relay/{}", crate::VERSION));

        let mut vars = CREDENTIALS.to_vec();
        vars.push(("REDDIT_USER_AGENT", "custom/1.0"));
        assert_eq!(config(&vars).unwrap().user_agent, "custom/1.0");
    }

    fn without(name: &str) -> Vec<(&'static str, &'static str)> {
        CREDENTIALS.iter().copied().filter(|&(n, _)| n != name).collect()
    }

    #[test]
    fn missing_credentials_are_named() {
        let e = config(&without("REDDIT_CLIENT_ID")).unwrap_err();
        assert!(matches!(e, Error::UnknownClientId { .. }));

        let e = config(&without("REDDIT_CLIENT_SECRET")).unwrap_err();
        assert!(matches!(e, Error::UnknownClientSecret { .. }));

        let e = config(&without("REDDIT_USERNAME")).unwrap_err();
        assert!(matches!(e, Error::UnknownUsername { .. }));

        let e = config(&without("REDDIT_PASSWORD")).unwrap_err();
        assert!(matches!(e, Error::UnknownPassword { .. }));
    }

    #[test]
    fn tokens_are_refreshed_a_minute_early() {
        let now = Instant::now();
        let cached = CachedToken::new(AccessToken("abc".into()), 3600, now);

        assert!(cached.is_fresh(now));
        assert!(cached.is_fresh(now + Duration::from_secs(3539)));
        assert!(!cached.is_fresh(now + Duration::from_secs(3540)));
        assert!(!cached.is_fresh(now + Duration::from_secs(3600)));
    }

    #[test]
    fn short_lived_tokens_are_never_reused() {
        let now = Instant::now();

        for expires_in in [0, 30, 60] {
            let cached = CachedToken::new(AccessToken("abc".into()), expires_in, now);
            assert!(!cached.is_fresh(now));
        }
    }

    #[test]
    fn user_data_is_keyed_by_account_id() {
        let users: HashMap<String, UserData> = serde_json::from_value(serde_json::json!({
            "t2_alice": { "name": "Alice", "link_karma": 1, "comment_karma": 2 },
        }))
        .unwrap();

        let name = user_name(users, &UserId("t2_alice".into())).unwrap();
        assert_eq!(name, "Alice");

        let users: HashMap<String, UserData> =
            serde_json::from_value(serde_json::json!({})).unwrap();
        let e = user_name(users, &UserId("t2_ghost".into())).unwrap_err();
        assert!(matches!(e, Error::UnknownUser { ref id } if id == "t2_ghost"));
    }

    #[test]
    fn endpoints_are_relative_to_the_api() {
        let config = Config::new("id", "secret", "relay", "hunter2", "test/0").unwrap();

        assert_eq!(
            config.endpoint("api/compose").unwrap().as_str(),
            "https://oauth.reddit.com/api/compose",
        );
    }

    #[test]
    fn subreddit_listings_must_have_one_child() {
        let one: Listing<SubredditData> = serde_json::from_value(serde_json::json!({
            "kind": "Listing",
            "data": {
                "children": [{ "kind": "t5", "data": { "display_name": "testsub" } }],
            },
        }))
        .unwrap();
        assert_eq!(one.into_singleton().unwrap().display_name, "testsub");

        let none: Listing<SubredditData> = serde_json::from_value(serde_json::json!({
            "kind": "Listing",
            "data": { "children": [] },
        }))
        .unwrap();
        assert!(none.into_singleton().is_none());
    }

    #[test]
    fn compose_responses_carry_errors() {
        let ok: JsonWrapper = serde_json::from_value(serde_json::json!({
            "json": { "errors": [] },
        }))
        .unwrap();
        assert!(ok.json.errors.is_empty());

        let rejected: JsonWrapper = serde_json::from_value(serde_json::json!({
            "json": {
                "errors": [["USER_DOESNT_EXIST", "that user doesn't exist", "to"]],
            },
        }))
        .unwrap();
        assert_eq!(rejected.json.errors.len(), 1);
    }
}
