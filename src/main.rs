use std::{process, sync::Arc, time::Duration};

use piazza::{
    application::{
        accounts::AccountService,
        authoring::AuthoringService,
        error::AppError,
        feed::FeedService,
        follows::FollowService,
        repos::{
            CommentsRepo, CreateGroupParams, FollowsRepo, GroupsRepo, PostsRepo, PostsWriteRepo,
            RepoError, SessionsRepo, UsersRepo,
        },
    },
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        media::MediaStorage,
        telemetry,
    },
};
use slug::slugify;
use time::OffsetDateTime;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SESSION_REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Group(args) => match args.command {
            config::GroupCommand::Add(add) => run_group_add(settings, add).await,
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let http_state = build_http_state(repositories.clone(), &settings)?;

    let reaper_handle = spawn_session_reaper(repositories);

    let result = serve_http(&settings, http_state).await;

    reaper_handle.abort();
    let _ = reaper_handle.await;

    result
}

async fn run_group_add(
    settings: config::Settings,
    args: config::GroupAddArgs,
) -> Result<(), AppError> {
    let title = args.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::validation("group title must not be empty"));
    }

    let slug = slugify(&args.slug);
    if slug.is_empty() {
        return Err(AppError::validation(
            "group slug must contain at least one alphanumeric character",
        ));
    }

    let repositories = init_repositories(&settings).await?;
    let groups: Arc<dyn GroupsRepo> = repositories;

    let group = groups
        .create_group(CreateGroupParams {
            title,
            slug,
            description: args.description.trim().to_string(),
        })
        .await
        .map_err(|err| match err {
            RepoError::Duplicate { .. } => {
                AppError::validation("a group with that slug already exists")
            }
            other => AppError::from(other),
        })?;

    info!(
        target = "piazza::groups",
        id = group.id,
        slug = %group.slug,
        "group created"
    );
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let repositories = Arc::new(PostgresRepositories::new(pool));
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(repositories)
}

fn build_http_state(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<HttpState, AppError> {
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let groups_repo: Arc<dyn GroupsRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let comments_repo: Arc<dyn CommentsRepo> = repositories.clone();
    let follows_repo: Arc<dyn FollowsRepo> = repositories.clone();
    let sessions_repo: Arc<dyn SessionsRepo> = repositories.clone();

    let media = Arc::new(
        MediaStorage::new(settings.media.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let feed = Arc::new(FeedService::new(
        posts_repo.clone(),
        groups_repo.clone(),
        users_repo.clone(),
        comments_repo.clone(),
    ));
    let authoring = Arc::new(AuthoringService::new(
        posts_repo,
        posts_write_repo,
        groups_repo.clone(),
        comments_repo,
        media.clone(),
    ));
    let follows = Arc::new(FollowService::new(follows_repo));
    let accounts = Arc::new(AccountService::new(
        users_repo.clone(),
        sessions_repo,
        settings.sessions.ttl_hours.get(),
    ));

    Ok(HttpState {
        feed,
        authoring,
        follows,
        accounts,
        users: users_repo,
        groups: groups_repo,
        media,
        body_limit_bytes: settings.media.max_request_bytes.get() as usize,
    })
}

/// Hourly sweep of expired session rows.
fn spawn_session_reaper(repositories: Arc<PostgresRepositories>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let sessions: Arc<dyn SessionsRepo> = repositories;
        let mut interval = tokio::time::interval(SESSION_REAPER_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            match sessions.delete_expired(OffsetDateTime::now_utc()).await {
                Ok(removed) if removed > 0 => {
                    debug!(target = "piazza::sessions", removed, "expired sessions removed");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target = "piazza::sessions", error = %err, "session sweep failed");
                }
            }
        }
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "piazza::server",
        addr = %settings.server.addr,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }

    info!(
        target = "piazza::server",
        grace_seconds = grace.as_secs(),
        "shutdown signal received; draining connections"
    );

    // Hard stop if connections refuse to drain within the window.
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(
            target = "piazza::server",
            "graceful shutdown window elapsed; exiting"
        );
        process::exit(0);
    });
}
