//! coursegen CLI: runs the worker pool and exposes the course operations.

mod error;
mod generator;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::{Parser, Subcommand};
use coursegen::orchestrator::SectionEditRequest;
use coursegen::pipeline::Capabilities;
use coursegen::stage::SuggestedStatus;
use coursegen::{
    init_logging, load_config, Config, Database, GenerationRequest, JobPhase,
    JobProgressBroadcaster, JobProgressEvent, Orchestrator, PipelineDriver, WorkerPool,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CliError;
use crate::generator::CommandGenerator;

#[derive(Parser)]
#[command(name = "coursegen")]
#[command(about = "Course generation worker and operations", long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, env = "COURSEGEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and pipeline driver until Ctrl-C
    Worker,

    /// Enqueue a TEST_JOB
    EnqueueTest {
        /// Make the job fail with an intentional error
        #[arg(long)]
        fail: bool,

        /// Sleep this long inside the handler
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Block until the job is terminal (needs a running worker)
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },

    /// Print a job status record
    Job { job_id: String },

    /// Print a course status report
    Status { course_id: String },

    /// Resolve a stuck course
    Recover {
        course_id: String,

        /// Apply this status even if the course is not stuck
        #[arg(long, value_name = "completed|failed")]
        force_status: Option<SuggestedStatus>,
    },

    /// Create a course and start generation
    Generate {
        course_id: Uuid,

        #[arg(long)]
        org: Uuid,

        #[arg(long)]
        user: Uuid,

        /// Source document; may be repeated
        #[arg(long = "document", value_name = "FILE")]
        documents: Vec<PathBuf>,

        /// Free-text course brief
        #[arg(long)]
        brief: Option<String>,
    },

    /// Regenerate part of a lesson from an instruction
    Edit {
        course_id: String,
        lesson_id: String,
        instruction: String,

        /// Target section, e.g. "section-2" or "Introduction"
        #[arg(long)]
        location: Option<String>,
    },

    /// Resume a course waiting at an approval gate
    Approve { course_id: String },

    /// Cancel generation for a course
    Cancel { course_id: String },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging)?;

    let db_path = config.database_path().ok_or(CliError::NoDatabasePath)?;
    let db = Database::open(&db_path)?;
    let orchestrator = Arc::new(Orchestrator::new(db, config.orchestrator_settings()));

    match cli.command {
        Command::Worker => run_worker(&config, orchestrator),
        Command::EnqueueTest {
            fail,
            delay_ms,
            wait,
        } => {
            let job_id = orchestrator.enqueue_test_job(fail, delay_ms)?;
            match wait {
                None => print_json(&serde_json::json!({ "jobId": job_id })),
                Some(secs) => {
                    let record = orchestrator
                        .statuses()
                        .wait_for_terminal(
                            &job_id,
                            Duration::from_secs(secs),
                            Duration::from_millis(config.poll_interval_ms),
                        )
                        .map_err(coursegen::OrchestratorError::from)?;
                    match record {
                        Some(record) => print_json(&record),
                        None => print_json(&orchestrator.job_status(&job_id)?),
                    }
                }
            }
        }
        Command::Job { job_id } => match orchestrator.job_status(&job_id)? {
            Some(record) => print_json(&record),
            None => Err(CliError::JobNotFound(job_id)),
        },
        Command::Status { course_id } => print_json(&orchestrator.course_status(&course_id)?),
        Command::Recover {
            course_id,
            force_status,
        } => print_json(&orchestrator.recover_course(&course_id, force_status)?),
        Command::Generate {
            course_id,
            org,
            user,
            documents,
            brief,
        } => {
            let documents = documents
                .iter()
                .map(|path| read_document(path))
                .collect::<Result<Vec<_>, _>>()?;
            let ticket = orchestrator.request_generation(GenerationRequest {
                course_id,
                organization_id: org,
                user_id: user,
                documents,
                brief,
            })?;
            print_json(&ticket)
        }
        Command::Edit {
            course_id,
            lesson_id,
            instruction,
            location,
        } => print_json(&orchestrator.request_section_edit(SectionEditRequest {
            course_id,
            lesson_id,
            instruction,
            location,
        })?),
        Command::Approve { course_id } => {
            let job_id = orchestrator.approve_stage(&course_id)?;
            print_json(&serde_json::json!({ "courseId": course_id, "jobId": job_id }))
        }
        Command::Cancel { course_id } => {
            let previous = orchestrator.cancel_course(&course_id)?;
            print_json(&serde_json::json!({
                "courseId": course_id,
                "previousStatus": previous,
                "newStatus": "cancelled",
            }))
        }
    }
}

fn run_worker(config: &Config, orchestrator: Arc<Orchestrator>) -> Result<(), CliError> {
    let generator_config = config.generator.as_ref().ok_or(CliError::NoGenerator)?;
    let capabilities =
        Capabilities::with_generator(Arc::new(CommandGenerator::new(generator_config)));

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    orchestrator.resume_pipelines()?;

    let progress = JobProgressBroadcaster::default();
    let progress_log = spawn_progress_log(progress.subscribe())?;
    let mut pool_config = config.pool_config();
    pool_config.progress = Some(progress.clone());

    let pool = WorkerPool::start(
        orchestrator.queue().clone(),
        orchestrator.statuses().clone(),
        orchestrator.registry(capabilities),
        pool_config,
    )?;
    let driver = PipelineDriver::spawn(Arc::clone(&orchestrator), pool.outcomes(), None)?;

    info!(workers = config.worker_count, "Worker running, press Ctrl-C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    pool.stop();
    driver.drain();
    drop(progress);
    let _ = progress_log.join();
    info!("Worker stopped");
    Ok(())
}

/// Logs job progress until every broadcaster handle is dropped.
fn spawn_progress_log(mut events: Receiver<JobProgressEvent>) -> Result<JoinHandle<()>, CliError> {
    thread::Builder::new()
        .name("coursegen-progress".to_string())
        .spawn(move || loop {
            match events.blocking_recv() {
                Ok(event) => log_progress(&event),
                Err(RecvError::Lagged(missed)) => debug!(missed, "Progress log fell behind"),
                Err(RecvError::Closed) => break,
            }
        })
        .map_err(|e| CliError::Spawn(e.to_string()))
}

fn log_progress(event: &JobProgressEvent) {
    match event.phase {
        JobPhase::Failed => warn!(
            job_id = %event.job_id,
            job_type = %event.job_type,
            course_id = %event.course_id,
            error = event.error.as_deref().unwrap_or_default(),
            "{}",
            event.message
        ),
        phase => info!(
            job_id = %event.job_id,
            job_type = %event.job_type,
            course_id = %event.course_id,
            %phase,
            percentage = event.percentage,
            "{}",
            event.message
        ),
    }
}

fn read_document(path: &Path) -> Result<(String, String), CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((name, content))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_progress_log_stops_with_broadcaster() {
        let progress = JobProgressBroadcaster::new(8);
        let handle = spawn_progress_log(progress.subscribe()).unwrap();
        progress.send(JobProgressEvent::failed(
            "job-1",
            coursegen::JobType::Test,
            "course-1",
            "Intentional failure",
        ));
        drop(progress);
        handle.join().unwrap();
    }

    #[test]
    fn test_parse_recover_force_status() {
        let cli = Cli::try_parse_from(["coursegen", "recover", "c1", "--force-status", "failed"])
            .unwrap();
        match cli.command {
            Command::Recover {
                course_id,
                force_status,
            } => {
                assert_eq!(course_id, "c1");
                assert_eq!(force_status, Some(SuggestedStatus::Failed));
            }
            _ => panic!("expected recover"),
        }
    }

    #[test]
    fn test_parse_generate_with_documents() {
        let course = Uuid::new_v4().to_string();
        let org = Uuid::new_v4().to_string();
        let user = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "coursegen",
            "--config",
            "cfg.json",
            "generate",
            course.as_str(),
            "--org",
            org.as_str(),
            "--user",
            user.as_str(),
            "--document",
            "a.md",
            "--document",
            "b.md",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.json")));
        match cli.command {
            Command::Generate { documents, .. } => assert_eq!(documents.len(), 2),
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let result = Cli::try_parse_from([
            "coursegen", "generate", "not-a-uuid", "--org", "x", "--user", "y",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_document_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intro.md");
        std::fs::write(&path, "# Intro").unwrap();
        let (name, content) = read_document(&path).unwrap();
        assert_eq!(name, "intro.md");
        assert_eq!(content, "# Intro");

        let missing = read_document(&dir.path().join("missing.md"));
        assert!(matches!(missing, Err(CliError::ReadDocument { .. })));
    }
}
