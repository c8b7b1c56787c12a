use anyhow::Result;
use chrono::{Local, Utc};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tuned::catalog::{CatalogClient, TvMazeClient};
use tuned::config::Configuration;
use tuned::http::HttpClient;
use tuned::identity::{FirebaseAuth, IdentityProvider, LocalIdentity};
use tuned::models::Identity;
use tuned::recommend::{featured_shows, GeminiClient, RecommendationEngine};
use tuned::store::{FirestoreStore, MemoryStore, RemoteStore};
use tuned::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

struct Services {
    catalog: Arc<dyn CatalogClient>,
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    engine: Option<Arc<RecommendationEngine>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    info!("Starting Tuned v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Configuration::from_file(&cli.config)?);
    info!("Configuration loaded from: {}", cli.config);

    let http_client = HttpClient::new()?;
    let services = Arc::new(build_services(&config, http_client));
    let session = Arc::new(Mutex::new(Session::new(Arc::clone(&services.store))));

    let mut identity_events = services.identity.subscribe();
    services.identity.sign_in().await?;

    let tasks = vec![
        tokio::spawn(episode_refresh(Arc::clone(&config), Arc::clone(&services), Arc::clone(&session))),
        tokio::spawn(featured_refresh(Arc::clone(&config), Arc::clone(&services), Arc::clone(&session))),
    ];

    // Identity changes are applied in arrival order
    loop {
        tokio::select! {
            changed = identity_events.changed() => {
                if changed.is_err() {
                    warn!("Identity provider went away");
                    break;
                }
                let identity = identity_events.borrow_and_update().clone();
                apply_identity(&services, &session, identity).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.lock().await.wait_synced().await;
    for task in tasks {
        task.abort();
    }
    Ok(())
}

fn build_services(config: &Configuration, http_client: HttpClient) -> Services {
    let catalog: Arc<dyn CatalogClient> = Arc::new(TvMazeClient::new(http_client.clone(), config.catalog_url()));

    let engine = config.gemini.as_ref().map(|gemini| {
        let generator = Arc::new(GeminiClient::new(http_client.clone(), gemini.api_key.clone()));
        Arc::new(RecommendationEngine::from_config(generator, gemini, config.retry_policy()))
    });
    if engine.is_none() {
        warn!("No Gemini configuration found, AI recommendations disabled");
    }

    let (store, identity): (Arc<dyn RemoteStore>, Arc<dyn IdentityProvider>) = match config.firebase {
        Some(ref firebase) => {
            let auth = Arc::new(FirebaseAuth::new(http_client.clone(), firebase.clone()));
            let store = FirestoreStore::new(http_client, firebase, auth.clone());
            let identity: Arc<dyn IdentityProvider> = auth;
            (Arc::new(store), identity)
        }
        None => {
            warn!("No Firebase configuration found, watchlist is kept in memory only");
            let local = Identity::new("local", Some("Local user".to_string()), None, None);
            (Arc::new(MemoryStore::new()), Arc::new(LocalIdentity::new(local)))
        }
    };

    Services {
        catalog,
        store,
        identity,
        engine,
    }
}

async fn apply_identity(services: &Services, session: &Mutex<Session>, identity: Option<Identity>) {
    let Some(identity) = identity else {
        session.lock().await.sign_out();
        return;
    };

    let ticket = session.lock().await.begin_sign_in(identity);
    let data = ticket.fetch(services.store.as_ref()).await;
    session.lock().await.complete_hydration(&ticket, data);
}

async fn episode_refresh(config: Arc<Configuration>, services: Arc<Services>, session: Arc<Mutex<Session>>) {
    let mut interval = interval(config.refresh_interval());

    loop {
        interval.tick().await;

        // Retry a failed hydration before anything else
        let retry = session.lock().await.hydration_ticket();
        if let Some(ticket) = retry {
            let data = ticket.fetch(services.store.as_ref()).await;
            if !session.lock().await.complete_hydration(&ticket, data) {
                continue;
            }
        }

        let plan = session.lock().await.plan_refresh();
        if let Some(plan) = plan {
            info!("Refreshing episodes for {} shows", plan.show_ids().len());
            let outcome = plan
                .fetch(services.catalog.as_ref(), config.batch_size(), config.batch_pause())
                .await;
            session.lock().await.apply_refresh(outcome);
        }

        let mut session = session.lock().await;
        session.generate_notifications_at(Local::now().date_naive(), Utc::now());
        for notification in session.notifications().iter().filter(|n| !n.is_read) {
            info!(
                "New episode: {} S{:02}E{:02} \"{}\"",
                notification.show_name, notification.season, notification.number, notification.episode_name
            );
        }
        debug!("{} unread notifications", session.unread_count());
    }
}

async fn featured_refresh(config: Arc<Configuration>, services: Arc<Services>, session: Arc<Mutex<Session>>) {
    let mut interval = interval(Duration::from_secs(6 * 60 * 60).max(config.refresh_interval()));

    loop {
        interval.tick().await;

        let tracked = session.lock().await.tracked_shows();
        match featured_shows(services.catalog.as_ref(), services.engine.as_deref(), &tracked).await {
            Ok(featured) => {
                let names: Vec<&str> = featured.shows.iter().map(|s| s.name.as_str()).collect();
                info!(
                    "Featured ({}): {}",
                    if featured.personalized { "for you" } else { "top rated" },
                    names.join(", ")
                );
            }
            Err(e) => error!("Featured shows unavailable: {}", e),
        }
    }
}
