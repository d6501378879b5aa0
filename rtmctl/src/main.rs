use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = rtmctl::Cli::parse();
    if let Err(err) = rtmctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
