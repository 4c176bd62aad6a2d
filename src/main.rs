mod cli;

use castforge::{jobfile, Transcoder};
use cf_av::{Outcome, UnitEvent};
use cf_core::config::Config;
use cf_core::EventSink;
use cf_pipeline::WorkflowEvent;
use cf_scheduler::SchedulerEvent;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "castforge=trace,cf_av=trace,cf_pipeline=debug,cf_scheduler=debug".to_string()
        } else {
            "castforge=info,cf_av=info,cf_pipeline=info,cf_scheduler=info".to_string()
        }
    });

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { file } => block_on(run_operation(&file, cli.config.as_deref())),
        Commands::Probe { file } => block_on(probe_file(&file, cli.config.as_deref())),
        Commands::Workflow { file } => block_on(run_workflow(&file, cli.config.as_deref())),
        Commands::Batch {
            file,
            concurrency,
            retries,
            backoff_ms,
        } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(n) = concurrency {
                config.scheduler.concurrency = n;
            }
            if let Some(n) = retries {
                config.scheduler.max_retries = n;
            }
            if let Some(ms) = backoff_ms {
                config.scheduler.backoff_ms = ms;
            }
            block_on(run_batch(&file, config))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("castforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

async fn run_operation(file: &Path, config_path: Option<&Path>) -> Result<()> {
    let spec = jobfile::load_operation(file)?;
    let transcoder = Transcoder::new(Config::load_or_default(config_path));

    tracing::info!(kind = %spec.kind(), input = %spec.input.display(), "Running operation");

    let (events, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                UnitEvent::Started { command_line, .. } => {
                    tracing::debug!("Command: {}", command_line);
                }
                UnitEvent::Progress { sample, .. } => {
                    eprintln!("  {:5.1}%  {}", sample.percent, sample.timecode);
                }
                UnitEvent::Finished { .. } => {}
            }
        }
    });

    let outcome = transcoder.run(spec, events).await;
    let _ = printer.await;
    report_outcome(outcome?)
}

async fn probe_file(file: &Path, config_path: Option<&Path>) -> Result<()> {
    let transcoder = Transcoder::new(Config::load_or_default(config_path));
    match transcoder.probe(file).await? {
        Outcome::Done {
            metadata: Some(metadata),
            ..
        } => {
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
        outcome => report_outcome(outcome),
    }
}

fn report_outcome(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Done { output, .. } => {
            match output {
                Some(path) => println!("✓ {}", path.display()),
                None => println!("✓ Done"),
            }
            Ok(())
        }
        Outcome::Failed(e) => anyhow::bail!("Operation failed: {e}"),
        Outcome::Cancelled { reason } => anyhow::bail!("Operation cancelled: {reason}"),
    }
}

async fn run_workflow(file: &Path, config_path: Option<&Path>) -> Result<()> {
    let workflow_file = jobfile::load_workflow(file)?;
    let workflow = workflow_file.build()?;
    let transcoder = Transcoder::new(Config::load_or_default(config_path));

    let (events, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                WorkflowEvent::Started { total_steps, .. } => {
                    println!("Workflow: {} steps", total_steps);
                }
                WorkflowEvent::Warning(w) => println!("⚠ {}", w),
                WorkflowEvent::StepStarted {
                    step, kind, input, ..
                } => {
                    println!("  {}. {} ({})", step, kind, input.display());
                }
                WorkflowEvent::Progress(p) => {
                    let eta = p
                        .eta
                        .map(|d| format!(", eta {}s", d.as_secs()))
                        .unwrap_or_default();
                    eprintln!(
                        "     {:5.1}% step, {:5.1}% overall{}",
                        p.step_percent, p.overall_percent, eta
                    );
                }
                WorkflowEvent::StepCompleted { step, output } => {
                    if let Some(out) = output {
                        println!("  ✓ step {} → {}", step, out.display());
                    }
                }
                WorkflowEvent::Done { .. } | WorkflowEvent::Failed(_) => {}
            }
        }
    });

    let result = transcoder.sequencer().run(&workflow, events).await;
    let _ = printer.await;

    match result {
        Ok(outputs) => {
            println!("\nWorkflow complete: {} outputs", outputs.len());
            for out in outputs {
                println!("  {}", out.display());
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("Workflow failed: {e}"),
    }
}

async fn run_batch(file: &Path, config: Config) -> Result<()> {
    if config.scheduler.concurrency == 0 {
        anyhow::bail!("Concurrency must be at least 1 to run a batch");
    }
    let specs = jobfile::load_batch(file)?;
    let transcoder = Transcoder::new(config);

    // Reject the whole batch before anything starts.
    let units = specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            transcoder
                .unit(spec, EventSink::noop())
                .map_err(|e| anyhow::anyhow!("Operation {}: {e}", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    let (events, mut rx) = EventSink::channel();
    let scheduler = transcoder.scheduler(events);
    println!(
        "Batch: {} operations, concurrency {}",
        units.len(),
        scheduler.config().concurrency
    );

    let total = units.len();
    for unit in units {
        scheduler.add(unit);
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut cancelled = 0usize;
    while completed + failed + cancelled < total {
        let Some(event) = rx.recv().await else {
            break;
        };
        match event {
            SchedulerEvent::Completed { id, outcome } => {
                completed += 1;
                if let Outcome::Done {
                    output: Some(out), ..
                } = outcome
                {
                    println!("✓ {} → {}", id, out.display());
                } else {
                    println!("✓ {}", id);
                }
            }
            SchedulerEvent::Retrying {
                id,
                next_attempt,
                delay,
                error,
            } => {
                println!(
                    "↻ {} attempt {} in {}ms: {}",
                    id,
                    next_attempt,
                    delay.as_millis(),
                    error
                );
            }
            SchedulerEvent::Failed {
                id,
                attempts,
                outcome,
            } => {
                failed += 1;
                let why = match &outcome {
                    Outcome::Failed(e) => e.to_string(),
                    Outcome::Cancelled { reason } => reason.to_string(),
                    Outcome::Done { .. } => String::new(),
                };
                println!("✗ {} after {} attempts: {}", id, attempts, why);
            }
            SchedulerEvent::Cancelled { id } => {
                cancelled += 1;
                println!("✗ {} cancelled", id);
            }
            SchedulerEvent::Added { .. } | SchedulerEvent::Started { .. } | SchedulerEvent::Idle => {}
        }
    }

    scheduler.wait_idle().await;
    println!(
        "\nBatch finished: {} done, {} failed, {} cancelled",
        completed, failed, cancelled
    );
    if failed > 0 || cancelled > 0 {
        anyhow::bail!("{} of {} operations did not complete", failed + cancelled, total);
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let transcoder = Transcoder::new(config);
    let mut all_ok = true;

    for tool in transcoder.tools().check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Concurrency: {}", config.scheduler.concurrency);
    println!("  Max retries: {}", config.scheduler.max_retries);
    println!("  Backoff: {}ms", config.scheduler.backoff_ms);
    println!("  Timeout overrides: {}", config.workflow.timeouts.len());

    for warning in config.validate() {
        println!("⚠ {}", warning);
    }

    Ok(())
}
