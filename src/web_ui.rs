use crate::{
    flow::{self, NotifyFlow, SubscriptionFlow},
    GlobalConfig,
};
use snafu::{ensure, Snafu};
use std::convert::Infallible;
use tracing::{error, info};
use warp::{filters::BoxedFilter, http::StatusCode, Filter, Rejection, Reply};

const SECRET_HEADER: &str = "x-relay-secret";

pub(crate) async fn serve(
    config: GlobalConfig,
    subscription_flow: SubscriptionFlow,
    notify_flow: NotifyFlow,
) {
    let routes = routes(config, subscription_flow, notify_flow);

    info!("Starting web server at {}", &config.listen_address);
    warp::serve(routes).run(config.listen_address).await
}

pub(crate) fn routes(
    config: GlobalConfig,
    subscription_flow: SubscriptionFlow,
    notify_flow: NotifyFlow,
) -> BoxedFilter<(impl Reply,)> {
    let actions = actions::routes(config, subscription_flow);
    let triggers = triggers::routes(config, notify_flow);

    let root = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(html::root().into_string()));

    let routes = actions.or(triggers).or(root);
    routes.recover(report_invalid).boxed()
}

/// Requests from the host must carry the shared secret, when one is
/// configured.
fn authorized(config: GlobalConfig) -> BoxedFilter<()> {
    warp::header::optional::<String>(SECRET_HEADER)
        .and_then(move |given: Option<String>| async move {
            check_secret(config, given.as_deref()).map_err(Rejection::from)
        })
        .untuple_one()
        .boxed()
}

fn check_secret(config: GlobalConfig, given: Option<&str>) -> Result<()> {
    if let Some(expected) = &config.shared_secret {
        let given = given.unwrap_or_default();
        ensure!(secrets_match(expected, given), UnauthorizedSnafu);
    }
    Ok(())
}

/// Compares every byte regardless of where the first difference is.
fn secrets_match(expected: &str, given: &str) -> bool {
    let (expected, given) = (expected.as_bytes(), given.as_bytes());
    if expected.len() != given.len() {
        return false;
    }

    expected
        .iter()
        .zip(given)
        .fold(0, |acc, (a, b)| acc | (a ^ b))
        == 0
}

async fn report_invalid(r: Rejection) -> Result<impl Reply, Infallible> {
    let internal = || {
        Ok(warp::reply::with_status(
            String::from("An internal error occurred"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ))
    };

    if let Some(e) = r.find::<Error>() {
        use Error::*;
        match e {
            Unauthorized => Ok(warp::reply::with_status(
                e.to_string(),
                StatusCode::UNAUTHORIZED,
            )),
            UnableToHandlePostCreate { .. } => {
                error!("Unhandled web UI error: {}", e);
                internal()
            }
        }
    } else if r.is_not_found() {
        Ok(warp::reply::with_status(
            String::from("Not found"),
            StatusCode::NOT_FOUND,
        ))
    } else if let Some(e) = r.find::<warp::filters::body::BodyDeserializeError>() {
        Ok(warp::reply::with_status(
            e.to_string(),
            StatusCode::BAD_REQUEST,
        ))
    } else if r.find::<warp::reject::MethodNotAllowed>().is_some() {
        Ok(warp::reply::with_status(
            String::from("Method not allowed"),
            StatusCode::METHOD_NOT_ALLOWED,
        ))
    } else {
        error!("Unhandled web UI error: {:?}", r);
        internal()
    }
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("The shared secret is missing or wrong"))]
    Unauthorized,

    UnableToHandlePostCreate { source: flow::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl warp::reject::Reject for Error {}

mod actions {
    use super::authorized;
    use crate::{
        domain::{MenuAction, SubredditId, Toast, UserId},
        flow::{self, ActionContext, SubscriptionFlow},
        GlobalConfig,
    };
    use serde::{Deserialize, Serialize};
    use tracing::error;
    use warp::{filters::BoxedFilter, reply, Filter, Rejection, Reply};

    #[derive(Debug, Serialize)]
    struct MenuItem {
        id: MenuAction,
        label: &'static str,
        description: &'static str,
        location: &'static str,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ActionParams {
        #[serde(default)]
        user_id: Option<UserId>,
        subreddit_id: SubredditId,
    }

    pub(crate) fn routes(
        config: GlobalConfig,
        flow: SubscriptionFlow,
    ) -> BoxedFilter<(impl Reply,)> {
        let list = warp::path::end().and(warp::get()).map(|| {
            let items: Vec<_> = MenuAction::ALL
                .iter()
                .map(|&action| MenuItem {
                    id: action,
                    label: action.label(),
                    description: action.description(),
                    location: "subreddit",
                })
                .collect();
            reply::json(&items)
        });

        let subscribe = run(config, flow.clone(), MenuAction::Subscribe);
        let unsubscribe = run(config, flow, MenuAction::Unsubscribe);

        warp::path("actions")
            .and(list.or(subscribe).or(unsubscribe))
            .boxed()
    }

    fn run(
        config: GlobalConfig,
        flow: SubscriptionFlow,
        action: MenuAction,
    ) -> BoxedFilter<(impl Reply,)> {
        warp::path(action.path())
            .and(warp::path::end())
            .and(warp::post())
            .and(authorized(config))
            .and(warp::body::json())
            .and_then(move |params: ActionParams| {
                let flow = flow.clone();
                async move {
                    let context = ActionContext {
                        user_id: params.user_id,
                        subreddit_id: params.subreddit_id,
                    };
                    let toast = toast_for(action, flow.run(action, &context).await);
                    Ok::<_, Rejection>(reply::json(&toast))
                }
            })
            .boxed()
    }

    /// Every outcome is reported to the acting user; only unexpected
    /// failures are logged.
    fn toast_for<T>(action: MenuAction, outcome: Result<T, flow::Error>) -> Toast {
        match outcome {
            Ok(_) => Toast::success(action.success_text()),
            Err(flow::Error::NotLoggedIn) => Toast::neutral("You must be logged in to subscribe."),
            Err(e) => {
                error!("Subscription handler failed: {}", e);
                Toast::neutral("An error occurred. Please try again.")
            }
        }
    }
}

mod triggers {
    use super::{authorized, UnableToHandlePostCreateSnafu};
    use crate::{domain::PostCreate, flow::NotifyFlow, GlobalConfig};
    use snafu::ResultExt;
    use warp::{filters::BoxedFilter, reply, Filter, Rejection, Reply};

    pub(crate) fn routes(config: GlobalConfig, flow: NotifyFlow) -> BoxedFilter<(impl Reply,)> {
        warp::path!("triggers" / "post-create")
            .and(warp::post())
            .and(authorized(config))
            .and(warp::body::json())
            .and_then(move |event: PostCreate| {
                let flow = flow.clone();
                async move {
                    let report = flow
                        .notify(event)
                        .await
                        .context(UnableToHandlePostCreateSnafu)?;

                    Ok::<_, Rejection>(reply::json(&report))
                }
            })
            .boxed()
    }
}

mod html {
    use crate::domain::MenuAction;
    use maud::{html, Markup};

    pub fn root() -> Markup {
        page(|| {
            html! {
                p { "Sends a private message to subscribers whenever a new post is made in their subreddit." }
                ul {
                    @for action in MenuAction::ALL {
                        li {
                            strong { (action.label()) }
                            ": "
                            (action.description())
                        }
                    }
                }
                footer { "Build " (crate::GIT_SHA) }
            }
        })
    }

    fn page(body: impl FnOnce() -> Markup) -> Markup {
        html! {
            (maud::DOCTYPE)
                html {
                    head {
                        title { "New Post Relay" }
                    }
                    body {
                        (body())
                    }
                }
        }
    }
}
