use anyhow::{Context, Result};
use camapk::config::Compression;
use camapk::{ApkBuilder, BuildConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};
    tracing_log::LogTracer::init().ok();
    let env = std::env::var("CAMAPK_LOG").unwrap_or_else(|_| "error".into());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_panics::init();
    let args = Args::parse();
    args.command.run()
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Build configuration
    #[clap(long, default_value = "camapk.yaml")]
    config: PathBuf,
    /// Overrides the package from the configuration
    #[clap(long)]
    package: Option<String>,
    /// Overrides the compression of every entry (stored or deflated)
    #[clap(long)]
    compression: Option<Compression>,
}

impl BuildArgs {
    fn config(&self) -> Result<BuildConfig> {
        let mut config = BuildConfig::parse(&self.config)?;
        if let Some(package) = &self.package {
            config.manifest.package = package.clone();
        }
        if let Some(compression) = self.compression {
            config.compression = compression;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build an apk
    Build {
        #[clap(flatten)]
        args: BuildArgs,
        /// Output path
        #[clap(long, short, default_value = "build/app.apk")]
        output: PathBuf,
        /// Install the apk after building it
        #[clap(long)]
        install: bool,
    },
    /// Check the layout, dex header and digests of an apk
    Verify {
        /// Path to the apk
        apk: PathBuf,
    },
    /// Install an apk with the configured installer
    Install {
        /// Build configuration
        #[clap(long, default_value = "camapk.yaml")]
        config: PathBuf,
        /// Path to the apk
        apk: PathBuf,
    },
}

impl Commands {
    pub fn run(self) -> Result<()> {
        match self {
            Self::Build {
                args,
                output,
                install: run_installer,
            } => {
                let config = args.config()?;
                let installer = config.installer.clone();
                let apk = ApkBuilder::new(config).build(&output)?;
                println!("built {} ({} bytes)", apk.path.display(), apk.size);
                if run_installer {
                    install(&installer, &apk.path)?;
                }
            }
            Self::Verify { apk } => {
                let verified = camapk::verify(&apk)?;
                for entry in &verified.entries {
                    println!("{}", entry);
                }
                println!(
                    "ok: dex {} bytes, {} packages",
                    verified.dex.file_size, verified.package_count
                );
            }
            Self::Install { config, apk } => {
                let config = BuildConfig::parse(&config)?;
                install(&config.installer, &apk)?;
            }
        }
        Ok(())
    }
}

/// Runs the external installer with the apk path as last argument.
fn install(installer: &[String], apk: &Path) -> Result<()> {
    anyhow::ensure!(apk.is_file(), "{} does not exist", apk.display());
    let (program, args) = installer
        .split_first()
        .context("installer command is empty")?;
    let program = which::which(program).with_context(|| format!("{} not found", program))?;
    tracing::info!("installing {} with {}", apk.display(), program.display());
    let status = Command::new(&program).args(args).arg(apk).status()?;
    if !status.success() {
        anyhow::bail!("{} failed with {}", program.display(), status);
    }
    println!("installed {}", apk.display());
    Ok(())
}
