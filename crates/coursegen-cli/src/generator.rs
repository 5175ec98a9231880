//! Generation capability backed by an external command.
//!
//! The prompt goes to the child's stdin; its stdout is the generated text.
//! The token budget is exposed through `COURSEGEN_MAX_TOKENS` and
//! `COURSEGEN_CONTEXT_TOKENS`.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use coursegen::config::GeneratorConfig;
use coursegen::pipeline::{CapabilityError, ContentGenerator, Generated};
use coursegen::regeneration::{estimate_tokens, TokenBudget};
use tracing::debug;

pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

impl ContentGenerator for CommandGenerator {
    fn generate(&self, prompt: &str, budget: TokenBudget) -> Result<Generated, CapabilityError> {
        let start = Instant::now();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("COURSEGEN_MAX_TOKENS", budget.target.to_string())
            .env("COURSEGEN_CONTEXT_TOKENS", budget.context.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CapabilityError::Generation(format!(
                    "Failed to spawn generator '{}': {}",
                    self.command, e
                ))
            })?;

        // Written from a separate thread so a chatty child cannot fill its
        // stdout pipe while we are still blocked on stdin.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = prompt.to_string();
            std::thread::spawn(move || stdin.write_all(prompt.as_bytes()))
        });

        let output = child.wait_with_output().map_err(|e| {
            CapabilityError::Generation(format!("Generator execution failed: {}", e))
        })?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(CapabilityError::Generation(format!(
                        "Failed to write prompt: {}",
                        e
                    )))
                }
                Err(_) => {
                    return Err(CapabilityError::Generation(
                        "prompt writer panicked".to_string(),
                    ))
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = if stderr.trim().is_empty() {
                format!("process exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(CapabilityError::Generation(reason));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(CapabilityError::Generation(
                "generator produced no output".to_string(),
            ));
        }

        let tokens_used = (estimate_tokens(prompt) + estimate_tokens(&text)) as u32;
        debug!(
            command = %self.command,
            tokens_used,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generator call finished"
        );

        Ok(Generated { text, tokens_used })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn generator(command: &str, args: &[&str]) -> CommandGenerator {
        CommandGenerator::new(&GeneratorConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    #[test]
    fn test_prompt_is_piped_through() {
        let result = generator("cat", &[])
            .generate("# Lesson\n\nBody", TokenBudget::new(100, 50))
            .unwrap();
        assert_eq!(result.text, "# Lesson\n\nBody");
        assert!(result.tokens_used > 0);
    }

    #[test]
    fn test_failure_is_reported() {
        let err = generator("sh", &["-c", "echo boom >&2; exit 3"])
            .generate("prompt", TokenBudget::new(100, 50))
            .unwrap_err();
        assert_eq!(err, CapabilityError::Generation("boom".to_string()));
    }

    #[test]
    fn test_missing_command() {
        let err = generator("coursegen-no-such-generator", &[])
            .generate("prompt", TokenBudget::new(100, 50))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
