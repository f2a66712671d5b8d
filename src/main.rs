use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = callgate::cli::Cli::parse();
    let settings = callgate::services::settings::Settings::from_env();
    if let Err(err) = callgate::cli::run(cli, settings).await {
        eprintln!("callgate: {}", err.public_message());
        if let Some(hint) = err.hint.as_deref() {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(1);
    }
}
