use knowledge_bot::config::Config;
use knowledge_bot::{app, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Read in configuration from OS env.
    let config = Config::from_env().expect("Invalid KNOWLEDGE_* environment variables");

    // Setup tracing. Logs also go to a daily file when a log dir is given.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "knowledge-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().compact().with_env_filter(filter).init();
            None
        }
    };

    // Init the service
    let state = AppState::from_config(&config).expect("Failed to initialize the service");
    let service = app(state);

    tracing::info!("Listening on {}..", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind the listen address");
    axum::serve(listener, service).await.expect("Server error");
}
