use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};

use repospawn::build::{BuildLane, BuilderCli, BuilderConfig};
use repospawn::git::{self, GitCli};
use repospawn::image;
use repospawn::profiles::{LaunchStrategy, Profile, ProfileRegistry};
use repospawn::runtime::launcher::{
    ContainerLauncher, LaunchContext, OwnerIdentity, SessionLauncher,
};
use repospawn::runtime::{ContainerRuntime, ImageStore, RuntimeType};
use repospawn::spawner::{Spawner, StartRequest};

const APP_NAME: &str = "repospawn";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_start(ctx: RuntimeContext, cmd: StartCommand) -> Result<()> {
    handle_start(&ctx, cmd).await
}

#[tokio::main]
async fn async_resolve(ctx: RuntimeContext, cmd: ResolveCommand) -> Result<()> {
    handle_resolve(&ctx, cmd).await
}

#[tokio::main]
async fn async_probe(ctx: RuntimeContext, cmd: ProbeCommand) -> Result<()> {
    handle_probe(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.paths.config_file.display());

    match cli.command {
        Command::Start(cmd) => async_start(ctx, cmd),
        Command::Resolve(cmd) => async_resolve(ctx, cmd),
        Command::Tag(cmd) => handle_tag(&ctx, cmd),
        Command::Probe(cmd) => async_probe(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Repospawn - repository-to-container build-and-launch service.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk or in the container runtime
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve, build if needed, and start a container session
    Start(StartCommand),
    /// Resolve a branch or tag to a commit hash
    Resolve(ResolveCommand),
    /// Print the deterministic image tag for a repository state
    Tag(TagCommand),
    /// Check whether an image exists in the local store
    Probe(ProbeCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct StartCommand {
    /// Repository URL (overrides profile and config)
    #[arg(long)]
    repo: Option<String>,
    /// Branch or tag to resolve
    #[arg(long = "ref", value_name = "REF")]
    reference: Option<String>,
    /// Launch profile key
    #[arg(long)]
    profile: Option<String>,
    /// Container name for the session
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ResolveCommand {
    /// Repository URL (falls back to config)
    #[arg(value_name = "REPO")]
    repo: Option<String>,
    /// Branch or tag to resolve
    #[arg(long = "ref", value_name = "REF")]
    reference: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct TagCommand {
    /// Resolved commit hash
    #[arg(value_name = "COMMIT")]
    commit: String,
    /// Repository URL (falls back to config)
    #[arg(long)]
    repo: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ProbeCommand {
    /// Image tag to look up
    #[arg(value_name = "TAG")]
    tag: String,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths, &common)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => match self.config.logging.level.as_str() {
                    "off" => LevelFilter::Off,
                    "error" => LevelFilter::Error,
                    "warn" => LevelFilter::Warn,
                    "debug" => LevelFilter::Debug,
                    "trace" => LevelFilter::Trace,
                    _ => LevelFilter::Info,
                },
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    /// Repository to build from. Required for repository-backed starts;
    /// there is deliberately no default.
    repo: Option<String>,
    /// Ref to resolve when none is given on the command line.
    #[serde(rename = "ref")]
    reference: String,
    /// Identity sessions run under and the builder bakes into images.
    owner: OwnerIdentity,
    /// Replaces the image's default command when non-empty.
    command: Vec<String>,
    container: ContainerRuntimeConfig,
    builder: BuilderConfig,
    logging: LoggingConfig,
    /// Selectable launch profiles; the first entry is the default.
    profiles: Vec<Profile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            repo: None,
            reference: "main".to_string(),
            owner: OwnerIdentity::default(),
            command: Vec::new(),
            container: ContainerRuntimeConfig::default(),
            builder: BuilderConfig::default(),
            logging: LoggingConfig::default(),
            profiles: ProfileRegistry::default().profiles().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct ContainerRuntimeConfig {
    /// Force "docker" or "podman" instead of autodetection.
    runtime: Option<RuntimeType>,
    /// Override the runtime binary path.
    binary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn container_runtime(cfg: &ContainerRuntimeConfig) -> ContainerRuntime {
    match (cfg.runtime, cfg.binary.as_ref()) {
        (Some(rt), Some(bin)) => ContainerRuntime::with_binary(rt, bin),
        (Some(rt), None) => ContainerRuntime::with_type(rt),
        (None, Some(bin)) => ContainerRuntime::with_binary(RuntimeType::Docker, bin),
        (None, None) => ContainerRuntime::new(),
    }
}

async fn handle_start(ctx: &RuntimeContext, cmd: StartCommand) -> Result<()> {
    let registry = ProfileRegistry::new(ctx.config.profiles.clone())
        .context("invalid profiles configuration")?;
    let profile = registry.select(cmd.profile.as_deref().unwrap_or_default());
    debug!("selected profile {}", profile.key);

    let runtime = container_runtime(&ctx.config.container);
    let launcher: Arc<dyn SessionLauncher> = Arc::new(ContainerLauncher::new(runtime.clone()));

    let session = match &profile.strategy {
        LaunchStrategy::Image { image } => {
            if ctx.common.dry_run {
                info!("dry-run: would launch image {image}");
                return Ok(());
            }
            let launch = LaunchContext {
                image_tag: image.clone(),
                owner: ctx.config.owner.clone(),
                command: ctx.config.command.clone(),
                name: cmd.name.clone(),
            };
            launcher
                .launch(launch)
                .await
                .with_context(|| format!("launching profile image {image}"))?
        }
        LaunchStrategy::RepoBuild { repo } => {
            let repo_url = cmd
                .repo
                .clone()
                .or_else(|| repo.clone())
                .or_else(|| ctx.config.repo.clone())
                .unwrap_or_default();
            let reference = cmd
                .reference
                .clone()
                .unwrap_or_else(|| ctx.config.reference.clone());

            if ctx.common.dry_run {
                info!("dry-run: would resolve {repo_url} at {reference} and start a session");
                return Ok(());
            }

            let builder = Arc::new(BuilderCli::new(ctx.config.builder.clone()));
            let lane = BuildLane::new(builder);
            let spawner = Spawner::new(
                Arc::new(GitCli::new()),
                Arc::new(runtime),
                lane,
                launcher,
            );

            let request = StartRequest {
                repo_url,
                reference,
                owner: ctx.config.owner.clone(),
                command: ctx.config.command.clone(),
                container_name: cmd.name.clone(),
            };
            spawner.start(&request).await?
        }
    };

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!(
            "launched {} from {}",
            session.container_id, session.image_tag
        );
    }
    Ok(())
}

async fn handle_resolve(ctx: &RuntimeContext, cmd: ResolveCommand) -> Result<()> {
    let repo_url = cmd
        .repo
        .or_else(|| ctx.config.repo.clone())
        .context("repository URL required (pass REPO or set `repo` in config)")?;
    let reference = cmd
        .reference
        .unwrap_or_else(|| ctx.config.reference.clone());

    let remote = GitCli::new();
    let commit = git::resolve_ref(&remote, &repo_url, &reference).await?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::json!({ "repo": repo_url, "ref": reference, "commit": commit })
        );
    } else {
        println!("{commit}");
    }
    Ok(())
}

fn handle_tag(ctx: &RuntimeContext, cmd: TagCommand) -> Result<()> {
    let repo_url = cmd
        .repo
        .or_else(|| ctx.config.repo.clone())
        .context("repository URL required (pass --repo or set `repo` in config)")?;

    println!("{}", image::derive_tag(&repo_url, &cmd.commit));
    Ok(())
}

async fn handle_probe(ctx: &RuntimeContext, cmd: ProbeCommand) -> Result<()> {
    let runtime = container_runtime(&ctx.config.container);
    let info = runtime.inspect_image(&cmd.tag).await?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::json!({ "tag": cmd.tag, "present": info.is_some(), "id": info.map(|i| i.id) })
        );
    } else {
        match info {
            Some(info) => println!("present: {}", info.id),
            None => println!("absent"),
        }
    }
    Ok(())
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn load_or_init_config(paths: &AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("ref", "main")?
        .set_default("logging.level", "info")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let config: AppConfig = built.try_deserialize()?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        let expanded = shellexpand::full(text).context("expanding path")?;
        Ok(PathBuf::from(expanded.to_string()))
    } else {
        Ok(path)
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
