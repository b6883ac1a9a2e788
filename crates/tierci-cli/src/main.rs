//! tierci - tiered test-and-build orchestration
//!
//! The `tierci` command builds, checks and tests one target unit.
//!
//! ## Commands
//!
//! - `build`, `crosscompile`, `check`, `fmt`, `simplify`, `clean`, `test-binary`
//! - `unit`, `unit-tests`, `integration-tests`, `integration-tests-environment`,
//!   `system-tests`, `benchmark-tests`
//! - `testsuite`, `ci`, `coverage-report`
//! - `start-environment`, `stop-environment`, `write-environment`,
//!   `build-image`, `env-logs`
//!
//! Every option can also be set through the environment variable shown in
//! `tierci --help`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use compose_env_manager::{ComposeProject, EnvConfig, EnvironmentManager};
use serde::Serialize;
use tierci_ci::{
    BridgeConfig, ComposeBackend, Composer, PipelineGate, PipelineResult, RemoteBridge, Stage,
    TierRunner,
};
use tierci_core::{
    default_targets, BuildError, BuildOrchestrator, CommandRunner, CoverageAggregator,
    PipelineConfig, PipelineSwitches, ProcessRunner, DEFAULT_TIMEOUT_SECS,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "tierci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tiered test-and-build orchestration for a single target unit")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Commands,
}

/// Run configuration, read once at startup.
#[derive(Args, Debug, Clone)]
struct Options {
    /// Target unit name
    #[arg(long = "name", env = "BEAT_NAME", default_value = "beat", global = true)]
    unit_name: String,

    /// Repository import path (default: github.com/elastic/beats/<name>)
    #[arg(long, env = "BEAT_DIR", global = true)]
    import_path: Option<String>,

    /// Package patterns, space separated (default: ./...)
    #[arg(long, env = "GOPACKAGES", value_delimiter = ' ', global = true)]
    packages: Vec<String>,

    /// Source tree of the target unit
    #[arg(long, default_value = ".", global = true)]
    source_dir: PathBuf,

    /// Build output directory
    #[arg(long, env = "BUILD_DIR", default_value = "build", global = true)]
    build_dir: PathBuf,

    /// Coverage directory (default: <build>/coverage)
    #[arg(long, env = "COVERAGE_DIR", global = true)]
    coverage_dir: Option<PathBuf>,

    /// Per-tier timeout in seconds
    #[arg(long, env = "TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    timeout: u64,

    /// Run integration tests inside the containerized environment
    #[arg(long, env = "TEST_ENVIRONMENT", action = ArgAction::SetTrue,
          value_parser = FalseyValueParser::new(), global = true)]
    test_environment: bool,

    /// Include the system tier
    #[arg(long, env = "SYSTEM_TESTS", action = ArgAction::SetTrue,
          value_parser = FalseyValueParser::new(), global = true)]
    system_tests: bool,

    /// Race detector for the quick `unit` run
    #[arg(long, env = "RACE_DETECTOR", action = ArgAction::SetTrue,
          value_parser = FalseyValueParser::new(), global = true)]
    race_detector: bool,

    /// Cross-compile operating systems, space separated
    #[arg(long, env = "GOX_OS", value_delimiter = ' ', global = true)]
    gox_os: Vec<String>,

    /// Cross-compile architectures, space separated
    #[arg(long, env = "GOX_ARCH", value_delimiter = ' ', global = true)]
    gox_arch: Vec<String>,

    /// Compose project name (default: the unit name)
    #[arg(long, env = "DOCKER_COMPOSE_PROJECT_NAME", global = true)]
    compose_project: Option<String>,

    /// Testing environment variant
    #[arg(long, env = "TESTING_ENVIRONMENT", default_value = "latest", global = true)]
    testing_environment: String,

    /// Build images without cache
    #[arg(long, env = "DOCKER_NOCACHE", action = ArgAction::SetTrue,
          value_parser = FalseyValueParser::new(), global = true)]
    docker_nocache: bool,

    /// Isolated Python environment (default: <build>/python-env)
    #[arg(long, env = "PYTHON_ENV", global = true)]
    python_env: Option<PathBuf>,

    /// Compose service the containerized integration tier runs in
    #[arg(long, default_value = "beat", global = true)]
    remote_service: String,

    /// Source root inside the container (default: /go/src/<import path>)
    #[arg(long, global = true)]
    remote_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the target unit for the host platform
    Build,

    /// Build binaries for every configured OS/arch pair
    Crosscompile,

    /// Check formatting and run static analysis
    Check,

    /// Rewrite source formatting in place
    Fmt,

    /// Rewrite formatting in place with simplifications
    Simplify,

    /// Remove build outputs
    Clean,

    /// build, check, then the full test suite
    Ci,

    /// Quick unit test run without coverage
    Unit,

    /// Unit tier with coverage
    UnitTests,

    /// Integration tier on the host
    IntegrationTests,

    /// Integration tier inside the containerized environment
    IntegrationTestsEnvironment,

    /// System tier
    SystemTests,

    /// Benchmark tier
    BenchmarkTests,

    /// All test tiers, then the coverage report
    Testsuite,

    /// Merge tier profiles and render the coverage report
    CoverageReport,

    /// Stop, then start the service environment
    StartEnvironment {
        /// Services to start (default: all)
        services: Vec<String>,
    },

    /// Stop the service environment and remove leftover containers
    StopEnvironment,

    /// Write the environment parameters file
    WriteEnvironment,

    /// Build the service images
    BuildImage,

    /// Show service logs
    EnvLogs,

    /// Build the coverage-instrumented test binary
    TestBinary,
}

/// Components shared by every command.
struct Context {
    runner: Arc<dyn CommandRunner>,
    config: PipelineConfig,
    env_config: EnvConfig,
    bridge_config: BridgeConfig,
    json: bool,
}

impl Context {
    fn new(options: &Options, json: bool) -> Result<Self> {
        let config = pipeline_config(options);
        config.validate().context("Invalid configuration")?;

        let project = ComposeProject::new(
            options
                .compose_project
                .clone()
                .unwrap_or_else(|| config.unit_name.clone()),
            &options.testing_environment,
            &config.source_dir,
        );
        let mut env_config = EnvConfig::new(config.unit_name.clone(), project, config.build_path());
        env_config.no_cache = options.docker_nocache;

        let remote_root = options
            .remote_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/go/src").join(&config.import_path));
        let bridge_config = BridgeConfig::integration(
            options.remote_service.clone(),
            &remote_root,
            &config.coverage_dir,
            config.coverage_path(),
        );

        Ok(Self {
            runner: Arc::new(ProcessRunner::new()),
            config,
            env_config,
            bridge_config,
            json,
        })
    }

    fn build(&self) -> BuildOrchestrator {
        BuildOrchestrator::new(self.runner.clone(), self.config.clone())
    }

    fn tiers(&self) -> TierRunner {
        TierRunner::new(self.runner.clone(), self.config.clone())
    }

    fn environment(&self) -> EnvironmentManager {
        EnvironmentManager::new(self.runner.clone(), self.env_config.clone())
    }

    fn composer(&self) -> Composer {
        let backend = ComposeBackend::new(self.runner.clone(), self.env_config.project.clone());
        let bridge = RemoteBridge::new(Arc::new(backend), self.bridge_config.clone());
        Composer::new(
            self.runner.clone(),
            self.config.clone(),
            Arc::new(self.environment()),
            bridge,
        )
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Assemble the run configuration from parsed options.
fn pipeline_config(options: &Options) -> PipelineConfig {
    let mut config = PipelineConfig::new(options.unit_name.clone(), options.source_dir.clone());
    if let Some(import_path) = &options.import_path {
        config.import_path = import_path.clone();
    }
    let packages: Vec<String> = options
        .packages
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect();
    if !packages.is_empty() {
        config.packages = packages;
    }
    config.build_dir = options.build_dir.clone();
    config.coverage_dir = options
        .coverage_dir
        .clone()
        .unwrap_or_else(|| options.build_dir.join("coverage"));
    config.system.python_env = options
        .python_env
        .clone()
        .unwrap_or_else(|| options.build_dir.join("python-env"));
    config.system.run_dir = options.build_dir.join("system-tests").join("run");
    config.timeout_secs = options.timeout;
    config.race_detector = options.race_detector;
    if !options.gox_os.is_empty() {
        config.cross_os = options.gox_os.clone();
    }
    if !options.gox_arch.is_empty() {
        config.cross_arch = options.gox_arch.clone();
    }
    config.switches = PipelineSwitches {
        use_environment: options.test_environment,
        run_system_tests: options.system_tests,
    };
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tierci_core::init_tracing(cli.json, level);

    let ctx = Context::new(&cli.options, cli.json)?;
    let switches = ctx.config.switches;

    let code = match cli.command {
        Commands::Build => cmd_build(&ctx).await?,
        Commands::Crosscompile => cmd_crosscompile(&ctx).await?,
        Commands::Check => cmd_check(&ctx).await?,
        Commands::Fmt => cmd_fmt(&ctx, false).await?,
        Commands::Simplify => cmd_fmt(&ctx, true).await?,
        Commands::Clean => cmd_clean(&ctx)?,
        Commands::TestBinary => cmd_test_binary(&ctx).await?,
        Commands::Unit => cmd_unit(&ctx).await?,
        Commands::UnitTests => cmd_stages(&ctx, &[Stage::Unit]).await?,
        Commands::IntegrationTests => cmd_stages(&ctx, &[Stage::Integration]).await?,
        Commands::IntegrationTestsEnvironment => {
            cmd_stages(&ctx, &[Stage::IntegrationEnvironment]).await?
        }
        Commands::SystemTests => cmd_stages(&ctx, &[Stage::System]).await?,
        Commands::BenchmarkTests => cmd_stages(&ctx, &[Stage::Benchmark]).await?,
        Commands::Testsuite => cmd_stages(&ctx, &Stage::testsuite_plan(switches)).await?,
        Commands::Ci => cmd_stages(&ctx, &Stage::ci_plan(switches)).await?,
        Commands::CoverageReport => cmd_coverage_report(&ctx).await?,
        Commands::StartEnvironment { services } => cmd_start_environment(&ctx, &services).await?,
        Commands::StopEnvironment => cmd_stop_environment(&ctx).await?,
        Commands::WriteEnvironment => cmd_write_environment(&ctx)?,
        Commands::BuildImage => cmd_build_image(&ctx).await?,
        Commands::EnvLogs => cmd_env_logs(&ctx).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Report a build failure; its exit code becomes ours.
fn build_failure(err: BuildError) -> i32 {
    eprintln!("✗ {err}");
    err.exit_code()
}

async fn cmd_build(ctx: &Context) -> Result<i32> {
    match ctx.build().build().await {
        Ok(artifact) => {
            println!("✓ Built {}", artifact.display());
            Ok(0)
        }
        Err(e) => Ok(build_failure(e)),
    }
}

async fn cmd_crosscompile(ctx: &Context) -> Result<i32> {
    let targets = default_targets(&ctx.config.cross_os, &ctx.config.cross_arch);
    let report = ctx
        .build()
        .crosscompile(&targets)
        .await
        .context("Cross-compile could not run")?;

    if ctx.json {
        ctx.print_json(&report)?;
    } else {
        for outcome in &report.outcomes {
            let status = if outcome.is_built() { "✓" } else { "✗" };
            println!("  {} {}", status, outcome.artifact.display());
        }
        println!(
            "Summary: {}/{} targets built",
            report.built().len(),
            report.outcomes.len()
        );
    }

    Ok(report.failed().first().map(|o| o.exit_code()).unwrap_or(0))
}

async fn cmd_check(ctx: &Context) -> Result<i32> {
    match ctx.build().check().await {
        Ok(()) => {
            println!("✓ Check passed");
            Ok(0)
        }
        Err(e) => Ok(build_failure(e)),
    }
}

async fn cmd_fmt(ctx: &Context, simplify: bool) -> Result<i32> {
    let build = ctx.build();
    let result = if simplify {
        build.simplify().await
    } else {
        build.fmt().await
    };
    match result {
        Ok(files) => {
            for file in &files {
                println!("  {file}");
            }
            println!("✓ {} file(s) reformatted", files.len());
            Ok(0)
        }
        Err(e) => Ok(build_failure(e)),
    }
}

fn cmd_clean(ctx: &Context) -> Result<i32> {
    let removed = ctx
        .build()
        .clean()
        .context("Failed to clean build outputs")?;
    for path in &removed {
        println!("  removed {}", path.display());
    }
    Ok(0)
}

async fn cmd_test_binary(ctx: &Context) -> Result<i32> {
    match ctx.build().build_test_binary().await {
        Ok(artifact) => {
            println!("✓ Built {}", artifact.display());
            Ok(0)
        }
        Err(e) => Ok(build_failure(e)),
    }
}

async fn cmd_unit(ctx: &Context) -> Result<i32> {
    let outcome = ctx
        .tiers()
        .run_unit_quick()
        .await
        .context("Unit tests could not run")?;
    Ok(outcome.exit_code)
}

async fn cmd_stages(ctx: &Context, plan: &[Stage]) -> Result<i32> {
    let result = ctx.composer().run_plan(plan).await;
    print_pipeline_result(ctx, &result)?;
    Ok(result.exit_code)
}

fn status_label(passed: bool) -> &'static str {
    if passed {
        "✓ PASSED"
    } else {
        "✗ FAILED"
    }
}

fn print_pipeline_result(ctx: &Context, result: &PipelineResult) -> Result<()> {
    if ctx.json {
        return ctx.print_json(result);
    }

    println!("Run ID: {}", result.run_id);
    println!("Status: {}", status_label(result.success));
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for stage_result in &result.stages {
        let status = if stage_result.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status, stage_result.stage, stage_result.duration_ms, stage_result.exit_code
        );
    }

    println!();
    println!(
        "Summary: {}/{} stages passed",
        result.passed_count(),
        result.plan.len()
    );

    let verdict = PipelineGate::evaluate(result);
    if !verdict.passed {
        println!("{}", verdict.message);
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }
    Ok(())
}

async fn cmd_coverage_report(ctx: &Context) -> Result<i32> {
    let aggregator = CoverageAggregator::new(
        ctx.runner.clone(),
        ctx.config.coverage_path(),
        ctx.config.source_dir.clone(),
    );
    let report = aggregator.report().await.context("Coverage report failed")?;

    if ctx.json {
        ctx.print_json(&report)?;
    } else {
        for (file, coverage) in &report.summary.files {
            println!("  {:>6.1}%  {}", coverage.percent(), file);
        }
        println!("Total: {:.1}%", report.summary.percent());
        println!("Report: {}", report.html_path.display());
    }
    Ok(0)
}

async fn cmd_start_environment(ctx: &Context, services: &[String]) -> Result<i32> {
    match ctx.environment().start(services).await {
        Ok(()) => {
            println!("✓ Environment running");
            Ok(0)
        }
        Err(e) => {
            eprintln!("✗ {e}");
            Ok(e.exit_code())
        }
    }
}

async fn cmd_stop_environment(ctx: &Context) -> Result<i32> {
    let report = ctx.environment().stop().await;
    if ctx.json {
        ctx.print_json(&report)?;
    } else {
        for step in &report.steps {
            println!("  {}: {:?}", step.step, step.outcome);
        }
    }
    // teardown failures are logged, never the exit status
    Ok(0)
}

fn cmd_write_environment(ctx: &Context) -> Result<i32> {
    let path = ctx
        .environment()
        .write_environment()
        .context("Failed to write environment parameters")?;
    info!(path = %path.display(), "environment parameters written");
    println!("✓ Wrote {}", path.display());
    Ok(0)
}

async fn cmd_build_image(ctx: &Context) -> Result<i32> {
    match ctx.environment().build_image().await {
        Ok(()) => Ok(0),
        Err(e) => {
            eprintln!("✗ {e}");
            Ok(e.exit_code())
        }
    }
}

async fn cmd_env_logs(ctx: &Context) -> Result<i32> {
    let logs = ctx
        .environment()
        .logs()
        .await
        .context("Failed to read environment logs")?;
    print!("{logs}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tierci").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_every_subcommand_parses() {
        for name in [
            "build",
            "crosscompile",
            "check",
            "fmt",
            "simplify",
            "clean",
            "ci",
            "unit",
            "unit-tests",
            "integration-tests",
            "integration-tests-environment",
            "system-tests",
            "benchmark-tests",
            "testsuite",
            "coverage-report",
            "start-environment",
            "stop-environment",
            "write-environment",
            "build-image",
            "env-logs",
            "test-binary",
        ] {
            assert!(
                Cli::try_parse_from(["tierci", name]).is_ok(),
                "subcommand {name} should parse"
            );
        }
    }

    #[test]
    fn test_start_environment_services() {
        let cli = parse(&["start-environment", "redis", "logstash"]);
        match cli.command {
            Commands::StartEnvironment { services } => {
                assert_eq!(services, vec!["redis", "logstash"])
            }
            _ => panic!("expected start-environment"),
        }
    }

    #[test]
    fn test_pipeline_config_from_flags() {
        let cli = parse(&[
            "--name",
            "packetbeat",
            "--build-dir",
            "out",
            "--timeout",
            "30",
            "--packages",
            "./a/... ./b/...",
            "--gox-os",
            "linux windows",
            "--test-environment",
            "testsuite",
        ]);
        let config = pipeline_config(&cli.options);
        assert_eq!(config.unit_name, "packetbeat");
        assert_eq!(config.import_path, "github.com/elastic/beats/packetbeat");
        assert_eq!(config.coverage_dir, PathBuf::from("out/coverage"));
        assert_eq!(config.system.python_env, PathBuf::from("out/python-env"));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.packages, vec!["./a/...", "./b/..."]);
        assert_eq!(config.cross_os, vec!["linux", "windows"]);
        assert_eq!(config.cross_arch, vec!["amd64", "386"]);
        assert!(config.switches.use_environment);
        assert!(!config.switches.run_system_tests);
    }

    #[test]
    fn test_context_defaults() {
        let cli = parse(&["ci"]);
        let ctx = Context::new(&cli.options, false).unwrap();
        assert_eq!(ctx.env_config.project.name, "beat");
        assert_eq!(
            ctx.env_config.params_path,
            PathBuf::from("./build/test.env")
        );
        let artifact = "/go/src/github.com/elastic/beats/beat/build/coverage/integration.cov";
        assert_eq!(ctx.bridge_config.remote_artifact, PathBuf::from(artifact));
    }
}
