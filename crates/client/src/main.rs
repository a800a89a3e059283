use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dsd_core::job::{GenerationParams, DEFAULT_GUIDANCE, DEFAULT_IMAGE_GUIDANCE, DEFAULT_TEXT_GUIDANCE};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsd_client::{BackoffConfig, GenerationClient, SubmitRequest, Submitted};

/// Submit an image and prompt to the generation server and save the result.
#[derive(Debug, Parser)]
#[command(name = "dsd-client", version)]
struct Args {
    /// Conditioning image.
    #[arg(long)]
    image: PathBuf,
    /// Text prompt.
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,
    /// Where to write the generated PNG.
    #[arg(long, default_value = "output.png")]
    output: PathBuf,
    #[arg(long, default_value_t = DEFAULT_GUIDANCE)]
    guidance: f32,
    #[arg(long, default_value_t = DEFAULT_IMAGE_GUIDANCE)]
    i_guidance: f32,
    #[arg(long, default_value_t = DEFAULT_TEXT_GUIDANCE)]
    t_guidance: f32,
    /// Skip prompt enhancement.
    #[arg(long)]
    no_gemini: bool,
    /// Give up waiting for a deferred result after this many seconds.
    #[arg(long, default_value_t = 1800)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dsd_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if !args.image.is_file() {
        anyhow::bail!("Input image not found: {}", args.image.display());
    }
    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read {}", args.image.display()))?;
    let file_name = args
        .image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input.png".to_string());

    let mut params = GenerationParams::new(args.prompt);
    params.enhance_prompt = !args.no_gemini;
    params.guidance = args.guidance;
    params.image_guidance = args.i_guidance;
    params.text_guidance = args.t_guidance;
    params.validate()?;

    let client = GenerationClient::new(args.server);
    tracing::info!(image = %args.image.display(), "Submitting job");

    let png = match client
        .submit(SubmitRequest {
            image,
            file_name,
            params,
        })
        .await?
    {
        Submitted::Immediate(bytes) => {
            tracing::info!("Result returned inline");
            bytes
        }
        Submitted::Deferred(id) => {
            tracing::info!(request_id = %id, "Waiting for result (Ctrl-C to stop)");

            let cancel = CancellationToken::new();
            let cancel_on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel_on_signal.cancel();
                }
            });

            let backoff =
                BackoffConfig::default().with_max_total(Duration::from_secs(args.timeout_secs));
            client
                .wait_for_result(id, &backoff, &cancel)
                .await
                .with_context(|| format!("Request {id} did not complete"))?
        }
    };

    tokio::fs::write(&args.output, &png)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    tracing::info!(output = %args.output.display(), bytes = png.len(), "Result saved");

    Ok(())
}
