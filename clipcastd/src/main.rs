use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = clipcastd::Cli::parse();
    if let Err(err) = clipcastd::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
