use devcamper::config::Config;
use devcamper::errors::BootError;
use devcamper::Application;
use dotenvy::dotenv;

#[actix_web::main]
async fn main() {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let result = match Config::from_env() {
        Ok(config) => match Application::build(config).await {
            Ok(app) => app.run().await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        // Faults were already logged by the supervisor.
        if !matches!(e, BootError::Fault(_)) {
            log::error!("Error: {}", e);
        }
        std::process::exit(1);
    }
}
