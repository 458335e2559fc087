mod analysis;
mod compiler;
mod engine;
mod error;
mod evaluator;
mod executor;
mod feedback;
mod loader;
mod report;


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codejudge_common::config::{JudgeConfig, DEFAULT_CONFIG_PATH};
use codejudge_common::types::BatchReport;
use executor::Orchestrator;
use feedback::{DisabledFeedback, FeedbackRequester, OpenAiFeedback};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "codejudge")]
#[command(about = "Compile, run and grade C++ submissions against fixed test cases", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade every submission against every test case
    Grade {
        /// Directory of <student>_<assignment>.cpp files
        #[arg(short, long, default_value = "students_submission")]
        submissions: PathBuf,

        /// Directory of test case directories (input.txt + expected_output.txt)
        #[arg(short, long, default_value = "testcases")]
        testcases: PathBuf,

        /// Problem statement forwarded to feedback generation
        #[arg(short, long)]
        problem: Option<PathBuf>,

        /// Judge configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the JSON batch report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Override max_parallel_submissions
        #[arg(long)]
        parallel: Option<usize>,

        /// Override the per-test time limit
        #[arg(long)]
        time_limit_ms: Option<u64>,

        /// Stop at the first grader failure instead of reporting it
        #[arg(long, default_value = "false")]
        fail_fast: bool,
    },

    /// Print construct counts for one source file
    Analyze {
        file: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load configuration: explicit path, else the default path if present,
/// else built-in defaults
fn load_config(path: Option<&Path>) -> Result<JudgeConfig> {
    match path {
        Some(path) => JudgeConfig::load(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                JudgeConfig::load(default_path)
            } else {
                info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                Ok(JudgeConfig::default())
            }
        }
    }
}

fn build_feedback(config: &JudgeConfig) -> Result<Arc<dyn FeedbackRequester>> {
    match &config.feedback.api_key {
        Some(key) if !key.trim().is_empty() => {
            let client = OpenAiFeedback::new(&config.feedback, key.clone())
                .context("Failed to build feedback client")?;
            info!(model = %config.feedback.model, "Compile-failure feedback enabled");
            Ok(Arc::new(client))
        }
        _ => {
            warn!("OPENAI_API_KEY not set; compile-failure feedback will be marked unavailable");
            Ok(Arc::new(DisabledFeedback))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn grade(
    submissions_dir: &Path,
    testcases_dir: &Path,
    problem: Option<&Path>,
    config_path: Option<&Path>,
    report_path: Option<&Path>,
    parallel: Option<usize>,
    time_limit_ms: Option<u64>,
    fail_fast: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;

    // The only place the environment is consulted
    if config.feedback.api_key.is_none() {
        config.feedback.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    if let Some(parallel) = parallel {
        config.max_parallel_submissions = parallel;
    }
    if let Some(limit) = time_limit_ms {
        config.run.time_limit_ms = limit;
    }
    config.validate()?;

    let submissions = loader::load_submissions(submissions_dir, &config.default_assignment)?;
    let test_cases = loader::load_test_cases(testcases_dir)?;

    info!(
        submissions = submissions.len(),
        test_cases = test_cases.len(),
        compiler = %config.compiler.program,
        time_limit_ms = config.run.time_limit_ms,
        "Loaded grading inputs"
    );

    if test_cases.is_empty() {
        warn!(dir = %testcases_dir.display(), "No test cases found");
    }

    let feedback = build_feedback(&config)?;
    let mut orchestrator = Orchestrator::new(config, feedback);
    if let Some(path) = problem {
        let statement = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read problem statement {}", path.display()))?;
        orchestrator = orchestrator.with_problem(statement);
    }

    let started_at = chrono::Utc::now();
    let reports = if fail_fast {
        let mut reports = Vec::with_capacity(submissions.len());
        for submission in &submissions {
            let report = orchestrator
                .evaluate(submission, &test_cases)
                .await
                .with_context(|| format!("Grader failed on {}", submission.file_name))?;
            reports.push(report);
        }
        reports
    } else {
        orchestrator.evaluate_batch(&submissions, &test_cases).await
    };
    let finished_at = chrono::Utc::now();

    for report in &reports {
        println!("{}", report::render_report(report));
    }
    println!("{}", report::render_summary(&reports));

    let infrastructure_failures = reports
        .iter()
        .filter(|r| r.infrastructure_error.is_some())
        .count();
    if infrastructure_failures > 0 {
        error!(count = infrastructure_failures, "Some submissions could not be graded");
    }

    if let Some(path) = report_path {
        let batch = BatchReport {
            started_at,
            finished_at,
            reports,
        };
        let json = serde_json::to_string_pretty(&batch).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Grade {
            submissions,
            testcases,
            problem,
            config,
            report,
            parallel,
            time_limit_ms,
            fail_fast,
        } => {
            grade(
                &submissions,
                &testcases,
                problem.as_deref(),
                config.as_deref(),
                report.as_deref(),
                parallel,
                time_limit_ms,
                fail_fast,
            )
            .await?;
        }
        Commands::Analyze { file } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            for (name, count) in analysis::analyze(&source) {
                println!("{:<24}{}", name, count);
            }
        }
    }

    Ok(())
}
