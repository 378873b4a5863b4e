use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "glide",
    about = "Glidepath: progressive delivery for Rollout workloads",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check Rollout manifests the way glided would on submit
    Validate {
        /// Manifest file (multi-document YAML)
        path: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Show the traffic split after each step of a rollout.
    ///
    /// Canary steps accumulate: a pause keeps the weight set before it.
    /// Blue-green shows the preview and promotion stages.
    Plan {
        path: String,
    },
    /// Render a vault agent template against a Kubernetes Secret
    Render {
        /// Template file using `{{ with secret "path" }}` blocks
        #[arg(short, long)]
        template: String,
        /// Secret manifest whose decoded data answers every path
        #[arg(short, long)]
        secret: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("glide=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path, format } => commands::validate::validate(&path, &format),
        Commands::Plan { path } => commands::plan::plan(&path),
        Commands::Render { template, secret } => commands::render::render(&template, &secret),
    }
}
