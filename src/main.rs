//! Rewards relay - bearer-token capture and deduplicated stats reporting

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rewards_relay::{
    config::{Args, BackendConfig, Command},
    history::StatsHistory,
    identity::Accounts,
    relay::Relay,
    server::{self, AppState},
    state::StateStore,
    stats::ApiClient,
    store::FirestoreConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rewards_relay={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let state = Arc::new(StateStore::open(&args.state_file).await?);

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(args, state).await,
        Command::SignIn { email, password } => {
            let user = Accounts::from_args(&args, state).sign_in(&email, &password).await?;
            info!("Signed in as {} ({})", user.email.as_deref().unwrap_or("-"), user.uid);
            Ok(())
        }
        Command::SignUp {
            email,
            password,
            access_code,
        } => {
            let user = Accounts::from_args(&args, state)
                .sign_up(&email, &password, access_code.as_deref())
                .await?;
            info!("Account created for {} ({})", user.email.as_deref().unwrap_or("-"), user.uid);
            Ok(())
        }
        Command::SignOut => {
            Accounts::from_args(&args, state).sign_out().await?;
            Ok(())
        }
        Command::History { user_id, count } => history(&args, state, user_id, count).await,
    }
}

async fn serve(args: Args, state: Arc<StateStore>) -> anyhow::Result<()> {
    info!("======================================");
    info!("  Rewards relay v{}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("State file: {}", args.state_file.display());
    info!("API host: {}", args.api.api_host);
    info!("Document store: {}", args.backend.firestore_base);
    info!("Collection: {}", args.backend.firebase_collection);
    info!("Cooldown: {}s, queue: {}", args.cooldown_secs, args.queue_size);
    info!("======================================");

    // Command-line webhook settings win over persisted ones
    state.update(|s| {
        if let Some(url) = args.webhook_url.clone() {
            s.webhook_url = Some(url);
        }
        if args.auto_send {
            s.auto_send = true;
        }
    });
    if state.read(|s| s.signed_in_user().is_none()) {
        warn!("No signed-in user; captured tokens will be stored but not reported until a FIREBASE_SIGN_IN message arrives");
    }
    if BackendConfig::resolve(&args.backend_defaults(), state.read(|s| s.firebase_config.clone()).as_ref()).is_none() {
        warn!("FIREBASE_API_KEY not configured; log dispatch will fail");
    }
    state.spawn_flush_task();

    let source = Arc::new(ApiClient::new(&args.api, args.request_timeout(), &args.user_agent));
    let connector = Arc::new(FirestoreConnector::new(
        &args.backend.firestore_base,
        args.request_timeout(),
        &args.user_agent,
    ));
    let (relay, _worker) = Relay::start(&args, Arc::clone(&state), source, connector);
    let accounts = Accounts::from_args(&args, state);

    let app = Arc::new(AppState::new(args, relay, accounts));
    server::run(app).await?;
    Ok(())
}

async fn history(
    args: &Args,
    state: Arc<StateStore>,
    user_id: Option<String>,
    count: usize,
) -> anyhow::Result<()> {
    let accounts = Accounts::from_args(args, state);
    if !accounts.is_admin().await? {
        anyhow::bail!("Stats history is available to admins only");
    }

    let history = StatsHistory::new(accounts.user_store()?, accounts.backend()?.collection);
    let entries = match user_id {
        Some(uid) => history.for_user(&uid).await,
        None => history.overview().await,
    };
    if entries.is_empty() {
        println!("No entries");
        return Ok(());
    }

    for entry in entries.iter().take(count) {
        println!(
            "{}  {:<28} {:>6.1}%  {:<12} {:>8} pts  {} quests",
            entry.captured_at.format("%Y-%m-%d %H:%M"),
            entry.user_email.as_deref().unwrap_or("-"),
            entry.summary.progress_percentage,
            entry.summary.tier_name,
            entry.weekly_points,
            entry.summary.total_completed_quests,
        );
    }
    Ok(())
}
