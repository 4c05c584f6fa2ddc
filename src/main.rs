//! Cirrus CLI entrypoint.
//!
//! This is the main entrypoint for the cirrus command-line tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use cirrus::changeset::console_url;
use cirrus::cli::{
    ChangeSetCommands, Cli, Commands, ConsoleReporter, DeployArgs, OutputFormat, OutputFormatter,
    PromptApprover,
};
use cirrus::cloud::{AwsCloudFormation, CallContext, GuardedCloud, SharedCloud};
use cirrus::config::{CirrusConfig, ConfigParser, ConfigValidator};
use cirrus::deploy::{DeployReport, Orchestrator};
use cirrus::error::{CirrusError, ConfigError, DeployError, Result};
use cirrus::events::{EventCorrelator, durations};
use cirrus::stack::canonical_stack_name;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code after an interrupt.
const EXIT_INTERRUPTED: u8 = 130;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e)
            if e.is_cancellation()
                || matches!(e, CirrusError::Deploy(DeployError::CancelledAfterExecute { .. })) =>
        {
            eprintln!("Interrupted: {e}");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "cirrus=debug,info" } else { "warn,cirrus=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(&cli)?;

    // Commands that never talk to AWS
    match &cli.command {
        Commands::Validate {
            deployment_file,
            warnings,
        } => return cmd_validate(&config, deployment_file.as_deref(), *warnings, &formatter),
        Commands::Changeset {
            command:
                ChangeSetCommands::Url {
                    stack_id,
                    changeset_id,
                },
        } => {
            let region = config.aws.region.as_deref().ok_or_else(|| {
                ConfigError::validation("A region is required for console links", "region")
            })?;
            println!("{}", console_url(region, stack_id, changeset_id));
            return Ok(true);
        }
        _ => {}
    }

    let ctx = CallContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let aws = AwsCloudFormation::new(config.aws.region.as_deref(), config.aws.profile.as_deref())
        .await;
    let region = config
        .aws
        .region
        .clone()
        .or_else(|| aws.region().map(ToString::to_string));
    let cloud: SharedCloud = Arc::new(GuardedCloud::new(aws, config.retry.policy()));

    let mut settings = config.orchestrator_settings();
    settings.region.clone_from(&region);
    let orchestrator = Orchestrator::new(Arc::clone(&cloud), settings).with_reporter(Arc::new(
        ConsoleReporter::new(cli.output, region.clone()),
    ));

    match cli.command {
        Commands::Deploy(args) => cmd_deploy(&ctx, orchestrator, &config, &args, &formatter).await,
        Commands::Status { stack } => cmd_status(&ctx, &orchestrator, &stack, &formatter).await,
        Commands::Resources { stack } => cmd_resources(&ctx, &cloud, &stack, &formatter).await,
        Commands::Report { stack, since } => {
            cmd_report(&ctx, &cloud, &stack, since, &formatter).await
        }
        Commands::Exports { stack, export } => {
            let exports = orchestrator
                .exports()
                .resolve(&ctx, stack.as_deref(), export.as_deref())
                .await?;
            println!("{}", formatter.format_exports(&exports));
            Ok(true)
        }
        Commands::Delete { stack, yes } => {
            let orchestrator = orchestrator.with_approver(Arc::new(PromptApprover::new(yes)));
            let report = orchestrator.destroy(&ctx, &stack).await?;
            Ok(print_report(&report, &formatter))
        }
        Commands::Changeset { command } => {
            cmd_changeset(&ctx, orchestrator, command, region.as_deref(), &formatter).await
        }
        Commands::Validate { .. } => Ok(true),
    }
}

/// Loads the settings file, applies flag overrides and validates the result.
fn load_config(cli: &Cli) -> Result<CirrusConfig> {
    let (mut config, path) = ConfigParser::new().load(cli.config.as_deref())?;
    match &path {
        Some(p) => debug!("Loaded settings from {}", p.display()),
        None => debug!("Using default settings"),
    }

    if cli.region.is_some() {
        config.aws.region.clone_from(&cli.region);
    }
    if cli.profile.is_some() {
        config.aws.profile.clone_from(&cli.profile);
    }

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

/// Prints a report to stdout. Returns whether it ended in success.
fn print_report(report: &DeployReport, formatter: &OutputFormatter) -> bool {
    println!("{}", formatter.format_report(report));
    report.state.is_success()
}

/// Deploy a template through a change-set.
async fn cmd_deploy(
    ctx: &CallContext,
    orchestrator: Orchestrator,
    config: &CirrusConfig,
    args: &DeployArgs,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let deployment = args.input().assemble(config, Utc::now())?;
    info!(
        "Deploying {} with change set {}",
        deployment.stack_name, deployment.changeset_name
    );

    let ctx = match args.timeout {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx.clone(),
    };
    let orchestrator = orchestrator.with_approver(Arc::new(PromptApprover::new(
        args.yes || args.dry_run,
    )));
    let report = orchestrator.deploy(&ctx, deployment).await?;
    Ok(print_report(&report, formatter))
}

/// Show stack status.
async fn cmd_status(
    ctx: &CallContext,
    orchestrator: &Orchestrator,
    stack: &str,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let probe = orchestrator
        .classifier()
        .probe(ctx, canonical_stack_name(stack), None)
        .await?;
    println!("{}", formatter.format_status(&probe));
    Ok(probe.exists)
}

/// List stack resources.
async fn cmd_resources(
    ctx: &CallContext,
    cloud: &SharedCloud,
    stack: &str,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let resources = cloud
        .describe_stack_resources(ctx, canonical_stack_name(stack))
        .await?;
    println!("{}", formatter.format_resources(&resources));
    Ok(true)
}

/// Show the event timeline of the last `since` minutes.
async fn cmd_report(
    ctx: &CallContext,
    cloud: &SharedCloud,
    stack: &str,
    since: u32,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let watermark = Utc::now() - TimeDelta::minutes(i64::from(since));
    let timeline = EventCorrelator::new(Arc::clone(cloud))
        .timeline(ctx, canonical_stack_name(stack), watermark)
        .await?;
    let report = durations(&timeline);
    println!("{}", formatter.format_timeline(&timeline, &report));
    Ok(true)
}

/// Inspect, execute or delete a change-set.
async fn cmd_changeset(
    ctx: &CallContext,
    orchestrator: Orchestrator,
    command: ChangeSetCommands,
    region: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    match command {
        ChangeSetCommands::Show(target) => {
            let (reference, link_region) = target.reference()?;
            let changeset = orchestrator.changesets().describe(ctx, &reference).await?;
            let url = link_region
                .as_deref()
                .or(region)
                .map(|r| console_url(r, &changeset.stack_id, &changeset.id));
            println!("{}", formatter.format_changeset(&changeset, url.as_deref()));
            Ok(true)
        }
        ChangeSetCommands::Execute { target, yes } => {
            let (reference, _) = target.reference()?;
            let orchestrator = orchestrator.with_approver(Arc::new(PromptApprover::new(yes)));
            let report = orchestrator.execute_existing(ctx, &reference).await?;
            Ok(print_report(&report, formatter))
        }
        ChangeSetCommands::Delete(target) => {
            let (reference, _) = target.reference()?;
            if orchestrator.changesets().delete(ctx, &reference).await {
                formatter.success(&format!("Deleted change set {}", reference.change_set));
                Ok(true)
            } else {
                formatter.error(&format!("Could not delete change set {}", reference.change_set));
                Ok(false)
            }
        }
        ChangeSetCommands::Url { .. } => Err(CirrusError::internal(
            "console links are printed before connecting to AWS",
        )),
    }
}

/// Validate settings and, optionally, a deployment file.
fn cmd_validate(
    config: &CirrusConfig,
    deployment_file: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let validator = ConfigValidator::new();
    let mut warnings = validator.validate(config)?.warnings;

    if let Some(path) = deployment_file {
        let file = ConfigParser::new().load_deployment(path)?;
        warnings.extend(validator.validate_deployment(&file)?.warnings);
        if formatter.format() == OutputFormat::Text {
            eprintln!("Deployment file {} is valid.", path.display());
        }
    }

    formatter.success("Configuration is valid!");
    if show_warnings {
        for warning in &warnings {
            formatter.warning(warning);
        }
    }

    if formatter.format() == OutputFormat::Text {
        eprintln!("\nConfiguration summary:");
        eprintln!("  Region: {}", config.aws.region.as_deref().unwrap_or("(SDK default)"));
        eprintln!("  Templates: {}", config.templates.directory.display());
        eprintln!("  Change set names: {}", config.changeset.name_format);
        eprintln!("  Change set timeout: {}s", config.changeset.timeout_secs);
        eprintln!("  Default tags: {}", config.tags.default.len());
        eprintln!("  Prechecks: {}", config.prechecks.commands.len());
    }
    Ok(true)
}
