//! uploadgate command-line front end.
//!
//! Runs uploaded archives through the validation pipeline, drives conflict
//! resolution on local repositories, and shows the resolution history.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use uploadgate_core::config::AppConfig;
use uploadgate_core::db::Database;
use uploadgate_core::git::Identity;
use uploadgate_core::{ConflictService, Pipeline, RepoLocks, Strategy, UploadedArchive};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Validate uploaded projects and resolve merge conflicts.
#[derive(Parser, Debug)]
#[command(name = "uploadgate", version, about = "Gate uploaded project archives into a Git repository")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./uploadgate.toml")]
    config: PathBuf,

    /// Log at debug level regardless of RUST_LOG and the config file.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an archive through the pipeline and integrate it.
    Validate {
        /// The uploaded zip archive.
        archive: PathBuf,

        /// Branch declared by the uploader.
        #[arg(short, long)]
        branch: String,

        /// Stop after routing; do not clone or push.
        #[arg(long)]
        no_integrate: bool,

        /// Write dependency-report.json and dependency-report.html here.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Detect, resolve, or abort merge conflicts in a local repository.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Browse recorded conflict resolutions.
    Resolutions {
        #[command(subcommand)]
        action: ResolutionsAction,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./uploadgate.toml")]
        output: PathBuf,
    },

    /// Check a configuration file.
    CheckConfig,
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// List conflicting files and their diffs.
    Detect {
        #[arg(long)]
        repo: PathBuf,
    },
    /// Resolve every conflict and commit the merge.
    Resolve {
        #[arg(long)]
        repo: PathBuf,

        /// keep-mine, keep-theirs, or merge.
        #[arg(long, default_value = "merge")]
        strategy: String,

        /// Run the configured test command on the merged tree.
        #[arg(long)]
        test: bool,
    },
    /// Abort the merge, or undo the last automatic resolution.
    Abort {
        #[arg(long)]
        repo: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ResolutionsAction {
    /// Show the most recent resolutions.
    List {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Show one resolution in full.
    Show { id: i64 },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    tracing::debug!(config = %cli.config.display(), "uploadgate starting");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins, then the config file's level; `--verbose` forces debug.
fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = std::fs::read_to_string(&cli.config)
                .ok()
                .and_then(|text| toml::from_str::<AppConfig>(&text).ok())
                .map(|config| config.logging.level)
                .unwrap_or_else(|| "info".to_string());
            EnvFilter::new(level)
        })
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output).map(|()| ExitCode::SUCCESS),
        Commands::CheckConfig => cmd_check_config(&cli.config).map(|()| ExitCode::SUCCESS),
        Commands::Validate {
            archive,
            branch,
            no_integrate,
            report_dir,
        } => {
            let config = load_config(&cli.config, !no_integrate)?;
            cmd_validate(config, &archive, &branch, no_integrate, report_dir.as_deref()).await
        }
        Commands::Conflicts { action } => {
            let config = load_config(&cli.config, false)?;
            cmd_conflicts(&config, action).await.map(|()| ExitCode::SUCCESS)
        }
        Commands::Resolutions { action } => {
            let config = load_config(&cli.config, false)?;
            cmd_resolutions(&config, action).map(|()| ExitCode::SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load and resolve the config. The full validation (remote URL included)
/// only runs for commands that push.
fn load_config(path: &Path, strict: bool) -> Result<AppConfig> {
    let mut config = AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    if strict {
        config.validate().context("invalid configuration")?;
    }
    Ok(config)
}

fn open_database(config: &AppConfig) -> Result<Database> {
    Database::open_initialized(&config.database.path).context("failed to open database")
}

fn conflict_service(config: &AppConfig) -> Result<ConflictService> {
    let db = open_database(config)?;
    Ok(ConflictService::new(
        Arc::new(db),
        RepoLocks::new(),
        Identity::from_config(&config.repository),
    ))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_validate(
    config: AppConfig,
    archive: &Path,
    branch: &str,
    no_integrate: bool,
    report_dir: Option<&Path>,
) -> Result<ExitCode> {
    let bytes = std::fs::read(archive)
        .with_context(|| format!("failed to read archive {}", archive.display()))?;
    let pipeline = if no_integrate {
        Pipeline::validate_only(config)
    } else {
        Pipeline::new(config, RepoLocks::new())
    };

    let outcome = pipeline
        .run(UploadedArchive::new(bytes, branch))
        .await
        .context("pipeline run failed")?;

    if let (Some(dir), Some(report)) = (report_dir, &outcome.dependencies) {
        report
            .write_to(dir)
            .with_context(|| format!("failed to write dependency report to {}", dir.display()))?;
        eprintln!(
            "dependency report: {} vulnerable dependency(ies), written to {}",
            report.vulnerable.len(),
            dir.display()
        );
    }
    if let Some(integration) = &outcome.integration {
        eprintln!(
            "pushed to {} ({})",
            integration.branch,
            &integration.commit_sha[..integration.commit_sha.len().min(7)]
        );
    }
    if outcome.is_passed() {
        println!("success");
        return Ok(ExitCode::SUCCESS);
    }
    for error in outcome.report.errors() {
        println!("{error}");
    }
    Ok(ExitCode::FAILURE)
}

async fn cmd_conflicts(config: &AppConfig, action: ConflictsAction) -> Result<()> {
    let service = conflict_service(config)?;
    match action {
        ConflictsAction::Detect { repo } => {
            let outcome = service
                .detect(&repo)
                .await
                .context("conflict detection failed")?;
            println!("{outcome}");
        }
        ConflictsAction::Resolve {
            repo,
            strategy,
            test,
        } => {
            let tests = test.then_some(&config.scanners.tests);
            let outcome = service
                .resolve_with_tests(&repo, Strategy::parse(&strategy), tests)
                .await
                .context("conflict resolution failed")?;
            println!("{outcome}");
        }
        ConflictsAction::Abort { repo } => {
            let outcome = service.abort(&repo).await.context("abort failed")?;
            println!("{outcome}");
        }
    }
    Ok(())
}

fn cmd_resolutions(config: &AppConfig, action: ResolutionsAction) -> Result<()> {
    let service = conflict_service(config)?;
    match action {
        ResolutionsAction::List { limit } => {
            let records = service
                .list_resolutions(limit)
                .context("failed to list resolutions")?;
            if records.is_empty() {
                println!("No resolutions recorded.");
                return Ok(());
            }
            println!("{:<6} {:<12} {:<26} FILE", "ID", "STRATEGY", "RESOLVED AT");
            println!("{}", "-".repeat(70));
            for r in &records {
                println!(
                    "{:<6} {:<12} {:<26} {}",
                    r.id,
                    r.strategy,
                    r.resolved_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    r.file_path
                );
            }
            println!();
            println!("Showing {} resolution(s)", records.len());
        }
        ResolutionsAction::Show { id } => {
            let r = service
                .get_resolution(id)
                .with_context(|| format!("resolution {id} not found"))?;
            println!("Resolution #{}", r.id);
            println!("  File       : {}", r.file_path);
            println!("  Strategy   : {}", r.strategy);
            println!("  Resolved at: {}", r.resolved_at.to_rfc3339());
            println!();
            println!("--- diff before ---");
            println!("{}", r.diff_before);
            println!("--- resolved content ---");
            println!("{}", r.resolved_content);
        }
    }
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# uploadgate configuration

[logging]
level = "info"

[repository]
remote_url = "https://git.example.com/team/app.git"
remote_name = "origin"
username_env = "GIT_USERNAME"
password_env = "GIT_PASSWORD"
author_name = "uploadgate"
author_email = "uploadgate@localhost"

[validation]
max_archive_bytes = 10485760
root_markers = ["README.md", "requirements.txt"]
required = ["README.md", "src/"]
source_dir = "src"
source_extensions = [".py", ".js", ".ts", ".java", ".kt", ".html", ".css", ".rs"]
metadata_extensions = [".json", ".xml", ".toml", ".yml", ".yaml"]

[integrity]
enforce = false

[integrity.expected_hashes]
# "proj/README.md" = "<sha256 hex>"

[scanners.vulnerable_ceilings]
"org.springframework:spring-core" = "5.3.10"
"com.fasterxml.jackson.core:jackson-databind" = "2.12.3"
"org.apache.commons:commons-lang3" = "3.10"

[scanners.vulnerable_releases]
"org.apache.logging.log4j:log4j-core" = ["2.14.0", "2.15.0"]
"express" = ["4.17.1"]

[scanners.tests]
enabled = true
manifest = "pom.xml"
command = ["mvn", "clean", "test", "jacoco:report"]
coverage_report = "target/site/jacoco/index.html"
coverage_format = "jacoco"
coverage_threshold = 80.0
timeout_secs = 600

[database]
path = "uploadgate.db"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set repository.remote_url to the managed repository");
    println!("  2. Export GIT_USERNAME and GIT_PASSWORD");
    println!("  3. Check with: uploadgate check-config --config {}", output.display());
    Ok(())
}

fn cmd_check_config(config_path: &Path) -> Result<()> {
    println!("Checking configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    let repo = &config.repository;
    let tests = &config.scanners.tests;
    println!();
    println!("Configuration summary:");
    println!("  Remote URL    : {}", repo.remote_url);
    println!(
        "  Credentials   : {}",
        if repo.username.is_some() && repo.password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Root markers  : {}", config.validation.root_markers.join(", "));
    println!(
        "  Test gate     : {}",
        if tests.enabled {
            format!("{} (threshold {:.1}%)", tests.command.join(" "), tests.coverage_threshold)
        } else {
            "disabled".to_string()
        }
    );
    println!("  Database      : {}", config.database.path.display());
    println!();
    println!("Configuration is valid.");
    Ok(())
}
