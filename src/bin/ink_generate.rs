use ink_sketch::config::SketchConfig;
use ink_sketch::generation::{GenerationClient, GenerationOptions, HttpTransport, image_from_file};
use std::env;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run().await {
        eprintln!("[generate] error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let image_path = args
        .next()
        .ok_or("usage: ink-generate <image.b64> [config.json]")?;
    let config = match args.next() {
        Some(path) => SketchConfig::load(path)?,
        None => {
            let mut config = SketchConfig::default();
            config.apply_env();
            config
        }
    };

    let image = image_from_file(&image_path)?;
    let client = GenerationClient::new(HttpTransport::new(&config.generation)?, config.generation.clone());
    let options = GenerationOptions::from(&config.generation);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[generate] interrupted; cancelling");
            ctrl_c.cancel();
        }
    });

    let url = client.generate(&image, &options, &cancel).await?;
    println!("{url}");
    Ok(())
}
