use passwdd::config::Config;
use passwdd::server::{Server, ServerContext};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::load();

    // Set up tracing with the configured log level
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    if let Err(e) = config.validate() {
        eprintln!("passwdd: invalid configuration: {e}");
        std::process::exit(1);
    }

    let context = match ServerContext::from_config(&config) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("passwdd: {e}");
            std::process::exit(1);
        }
    };

    let server = match Server::bind(&config, context).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("passwdd: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        eprintln!("fatal: {e}");
        std::process::exit(2);
    }
}
