#![deny(rust_2018_idioms)]

use diesel::{pg::PgConnection, prelude::*};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::{info, warn};

pub use config::Config;

mod capabilities;
mod config;
mod database;
mod domain;
mod flow;
mod memory;
mod reddit;
mod store;
mod web_ui;

#[cfg(test)]
mod test_support;

type GlobalConfig = &'static Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

fn main() {
    if let Err(e) = core() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn core() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("new-post-relay {} ({})", VERSION, GIT_SHA);

    let config = Config::from_environment().context(UnableToConfigureSnafu)?;
    let config = &*Box::leak(Box::new(config));

    let reddit_config = reddit::Config::from_environment().context(UnableToConfigureRedditSnafu)?;
    let reddit = Arc::new(
        reddit_config
            .into_client()
            .context(UnableToConfigureRedditSnafu)?,
    );

    let (storage, db_task) = match &config.database_url {
        Some(database_url) => {
            let conn = PgConnection::establish(database_url)
                .context(UnableToConnectSnafu { database_url })?;
            let mut db = database::Db::new(conn);
            db.ensure_schema().context(UnableToPrepareDatabaseSnafu)?;

            let (db, db_task) = database::spawn(db);
            let storage: Arc<dyn capabilities::Storage> = Arc::new(db);
            (storage, db_task)
        }
        None => {
            warn!("DATABASE_URL is not set; subscriptions are kept in memory and lost on restart");
            let storage: Arc<dyn capabilities::Storage> =
                Arc::new(memory::MemoryStorage::default());
            let idle = tokio::spawn(futures::future::pending::<()>());
            (storage, idle)
        }
    };

    if config.shared_secret.is_none() {
        warn!("RELAY_SHARED_SECRET is not set; anyone can trigger notifications");
    }

    let caps = capabilities::Capabilities {
        store: store::SubscriptionStore::new(storage, &config.subscriptions_key),
        directory: reddit.clone(),
        messenger: reddit,
    };

    let subscription_flow = flow::SubscriptionFlow::new(caps.clone());
    let notify_flow = flow::NotifyFlow::new(
        caps,
        config.reddit_web_url.clone(),
        config.dispatch_concurrency,
    );

    let web_ui = tokio::spawn(web_ui::serve(config, subscription_flow, notify_flow));

    tokio::select! {
        web_ui = web_ui => {
            web_ui.context(WebUiFailedSnafu)
        }
        db_task = db_task => {
            db_task.context(DatabaseFailedSnafu)?;
            DatabaseExitedSnafu.fail()
        }
    }
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Unable to configure application"))]
    UnableToConfigure { source: config::Error },

    #[snafu(display("Unable to configure Reddit integration"))]
    UnableToConfigureReddit { source: reddit::Error },

    #[snafu(display("Error connecting to {}", database_url))]
    UnableToConnect {
        source: diesel::ConnectionError,
        database_url: String,
    },

    #[snafu(display("Unable to prepare the database"))]
    UnableToPrepareDatabase { source: database::Error },

    #[snafu(display("The web UI failed"))]
    WebUiFailed { source: tokio::task::JoinError },

    #[snafu(display("The database exited and never should"))]
    DatabaseExited,

    #[snafu(display("The database failed and never should"))]
    DatabaseFailed { source: tokio::task::JoinError },
}

type Result<T, E = Error> = std::result::Result<T, E>;
