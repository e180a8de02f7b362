use clap::Parser;
use modgate::app::App;
use modgate::cli::Args;
use modgate::logging::setup_logging;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let early_config = {
        use figment::providers::Env;
        figment::Figment::new()
            .merge(Env::raw())
            .extract::<modgate::config::Config>()
            .expect("failed to load config for logging setup")
    };
    setup_logging(&early_config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting modgate"
    );

    let app = App::new().await.expect("failed to initialize application");
    app.run().await
}
