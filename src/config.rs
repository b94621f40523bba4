use crate::store::DEFAULT_SUBSCRIPTIONS_KEY;
use snafu::{ensure, ResultExt, Snafu};
use std::{
    env,
    net::{IpAddr, SocketAddr},
};
use url::Url;

const DEFAULT_REDDIT_WEB_URL: &str = "https://www.reddit.com";
const DEFAULT_DISPATCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub listen_address: SocketAddr,
    pub shared_secret: Option<String>,
    pub subscriptions_key: String,
    pub reddit_web_url: Url,
    pub dispatch_concurrency: usize,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|name| env::var(name))
    }

    fn from_lookup(var: impl Fn(&str) -> Result<String, env::VarError>) -> Result<Self> {
        let database_url = var("DATABASE_URL").ok();
        let address = var("WEB_LISTEN_ADDRESS").context(UnknownWebListenAddressSnafu)?;
        let port = var("WEB_LISTEN_PORT").or_else(|_| var("PORT"));
        let port = port.context(UnknownWebListenPortSnafu)?;
        let shared_secret = var("RELAY_SHARED_SECRET").ok();
        let subscriptions_key =
            var("SUBSCRIPTIONS_KEY").unwrap_or_else(|_| DEFAULT_SUBSCRIPTIONS_KEY.into());
        let uri = var("REDDIT_WEB_URL").unwrap_or_else(|_| DEFAULT_REDDIT_WEB_URL.into());

        let address: IpAddr = address
            .parse()
            .context(InvalidWebListenAddressSnafu { address })?;
        let port = port.parse().context(InvalidWebListenPortSnafu { port })?;
        let listen_address = (address, port).into();

        let reddit_web_url = Url::parse(&uri).context(InvalidRedditWebUrlSnafu { uri: &uri })?;
        ensure!(
            !reddit_web_url.cannot_be_a_base(),
            RedditWebUrlCannotBeABaseSnafu { uri }
        );

        let dispatch_concurrency = match var("DISPATCH_CONCURRENCY") {
            Ok(concurrency) => concurrency
                .parse::<usize>()
                .context(InvalidDispatchConcurrencySnafu { concurrency })?
                .max(1),
            Err(_) => DEFAULT_DISPATCH_CONCURRENCY,
        };

        Ok(Self {
            database_url,
            listen_address,
            shared_secret,
            subscriptions_key,
            reddit_web_url,
            dispatch_concurrency,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("WEB_LISTEN_ADDRESS must be set"))]
    UnknownWebListenAddress { source: env::VarError },

    #[snafu(display("WEB_LISTEN_ADDRESS is invalid"))]
    InvalidWebListenAddress {
        source: std::net::AddrParseError,
        address: String,
    },

    #[snafu(display("WEB_LISTEN_PORT must be set"))]
    UnknownWebListenPort { source: env::VarError },

    #[snafu(display("WEB_LISTEN_PORT is invalid"))]
    InvalidWebListenPort {
        source: std::num::ParseIntError,
        port: String,
    },

    #[snafu(display("REDDIT_WEB_URL is invalid"))]
    InvalidRedditWebUrl {
        source: url::ParseError,
        uri: String,
    },

    #[snafu(display("REDDIT_WEB_URL {} cannot hold post links", uri))]
    RedditWebUrlCannotBeABase { uri: String },

    #[snafu(display("DISPATCH_CONCURRENCY is invalid"))]
    InvalidDispatchConcurrency {
        source: std::num::ParseIntError,
        concurrency: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;
