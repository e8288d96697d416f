use env_logger::Env;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = rave_remote::run().await {
        log::error!("Fatal: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
