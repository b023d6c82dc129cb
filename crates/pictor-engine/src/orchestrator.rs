use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use pictor_contracts::config::{validate, Configuration, GenerationMode};
use pictor_contracts::events::{ActivityEvent, ActivityLog};
use pictor_contracts::history::{ImageHistory, ImageRecord};
use pictor_contracts::queue::PromptQueue;
use pictor_contracts::usage::UsageCounter;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::mask::MaskEditor;
use crate::request::{build, EditAssets, RequestAssets, EDIT_PRECONDITION, EXTRACT_FAILED};
use crate::response::interpret;
use crate::transport::Transport;

/// Pause between consecutive prompts of a batch.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(1000);

/// Inputs that live outside the configuration record.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationInputs<'e> {
    pub reference_image: Option<&'e [u8]>,
    pub editor: Option<&'e MaskEditor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub count: usize,
    pub records: Vec<ImageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// False when the queue was empty and the entered prompt ran on its own.
    pub from_queue: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub images: usize,
    pub queue_cleared: bool,
    pub failures: Vec<(String, GenerationError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Success,
    Error,
}

/// One user-visible status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub level: StatusLevel,
    pub message: String,
}

impl StatusLine {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Success,
            message: message.into(),
        }
    }

    pub fn generated(count: usize) -> Self {
        Self::success(format!("Successfully generated {count} image(s)!"))
    }

    /// Validation messages are shown as written; every other failure gets
    /// an `Error: ` prefix.
    pub fn error(err: &GenerationError) -> Self {
        let message = match err {
            GenerationError::Validation(_) => err.to_string(),
            _ => format!("Error: {err}"),
        };
        Self {
            level: StatusLevel::Error,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Drives single and queue-driven generation against one transport.
///
/// Everything it touches is borrowed for the duration of the session; there
/// is no ambient shared state.
pub struct Generator<'a> {
    transport: &'a dyn Transport,
    history: &'a mut ImageHistory,
    usage: &'a mut UsageCounter,
    activity: Option<&'a ActivityLog>,
    batch_delay: Duration,
}

impl<'a> Generator<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        history: &'a mut ImageHistory,
        usage: &'a mut UsageCounter,
    ) -> Self {
        Self {
            transport,
            history,
            usage,
            activity: None,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn with_activity_log(mut self, log: &'a ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// validate, build, send, interpret, then persist history and usage.
    /// Persistence failures are logged and never fail the generation.
    pub fn generate_once(
        &mut self,
        config: &Configuration,
        inputs: GenerationInputs<'_>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let result = self.try_generate(config, inputs);
        if let Err(err) = &result {
            warn!(kind = err.kind(), error = %err, "generation failed");
            self.record(&ActivityEvent::GenerationFailed {
                kind: err.kind().to_string(),
                message: err.to_string(),
            });
        }
        result
    }

    /// Runs every queued prompt in order. One prompt failing does not stop
    /// the rest; the queue is cleared only when something succeeded.
    pub fn generate_batch(
        &mut self,
        config: &Configuration,
        queue: &mut PromptQueue,
        inputs: GenerationInputs<'_>,
    ) -> BatchOutcome {
        let prompts = queue.snapshot();
        if prompts.is_empty() {
            debug!("prompt queue empty; generating entered prompt");
            let mut outcome = BatchOutcome {
                from_queue: false,
                succeeded: 0,
                failed: 0,
                images: 0,
                queue_cleared: false,
                failures: Vec::new(),
            };
            match self.generate_once(config, inputs) {
                Ok(done) => {
                    outcome.succeeded = 1;
                    outcome.images = done.count;
                }
                Err(err) => {
                    outcome.failed = 1;
                    outcome.failures.push((config.prompt.trim().to_string(), err));
                }
            }
            return outcome;
        }

        let total = prompts.len();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut images = 0;
        let mut failures = Vec::new();
        for (idx, prompt) in prompts.into_iter().enumerate() {
            if idx > 0 && !self.batch_delay.is_zero() {
                thread::sleep(self.batch_delay);
            }
            info!(position = idx + 1, total, "batch prompt");
            match self.generate_once(&config.with_prompt(&prompt), inputs) {
                Ok(done) => {
                    succeeded += 1;
                    images += done.count;
                }
                Err(err) => {
                    failed += 1;
                    failures.push((prompt, err));
                }
            }
        }

        let queue_cleared = succeeded > 0;
        if queue_cleared {
            queue.clear();
        }
        self.record(&ActivityEvent::BatchFinished {
            succeeded,
            failed,
            queue_cleared,
        });
        BatchOutcome {
            from_queue: true,
            succeeded,
            failed,
            images,
            queue_cleared,
            failures,
        }
    }

    pub fn run_once(&mut self, config: &Configuration, inputs: GenerationInputs<'_>) -> StatusLine {
        match self.generate_once(config, inputs) {
            Ok(done) => StatusLine::generated(done.count),
            Err(err) => StatusLine::error(&err),
        }
    }

    pub fn run_batch(
        &mut self,
        config: &Configuration,
        queue: &mut PromptQueue,
        inputs: GenerationInputs<'_>,
    ) -> StatusLine {
        let outcome = self.generate_batch(config, queue, inputs);
        if !outcome.from_queue {
            return match outcome.failures.first() {
                Some((_, err)) => StatusLine::error(err),
                None => StatusLine::generated(outcome.images),
            };
        }
        let message = format!(
            "Batch complete: {} succeeded, {} failed",
            outcome.succeeded, outcome.failed
        );
        if outcome.succeeded == 0 {
            StatusLine {
                level: StatusLevel::Error,
                message,
            }
        } else {
            StatusLine::success(message)
        }
    }

    fn try_generate(
        &mut self,
        config: &Configuration,
        inputs: GenerationInputs<'_>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let config = config.normalized();
        validate(&config)?;
        let assets = request_assets(&config, inputs)?;
        let request = build(&config, &assets)?;

        self.record(&ActivityEvent::GenerationStarted {
            mode: config.mode.as_str().to_string(),
            deployment: config.deployment.clone(),
            operation: request.operation.as_str().to_string(),
            n: config.n,
            prompt_chars: config.prompt.chars().count(),
        });
        debug!(request = ?request, "image request built");

        let started = Instant::now();
        let reply = self
            .transport
            .send(&request)
            .map_err(|err| GenerationError::Transport(format!("{err:#}")))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(status = reply.status, elapsed_ms, "image API replied");
        let response = interpret(&reply)?;

        let created_at_ms = Utc::now().timestamp_millis();
        let records: Vec<ImageRecord> = response
            .images
            .into_iter()
            .map(|source| ImageRecord {
                source,
                prompt: config.prompt.clone(),
                created_at_ms,
            })
            .collect();
        let count = records.len();

        if let Err(err) = self.history.append(records.clone()) {
            warn!(error = %err, "failed to persist image history");
        }
        if let Err(err) = self.usage.add(count as u64) {
            warn!(error = %err, "failed to update usage count");
        }
        self.record(&ActivityEvent::GenerationSucceeded { count, elapsed_ms });
        info!(count, elapsed_ms, "images generated");

        Ok(GenerationOutcome { count, records })
    }

    fn record(&self, event: &ActivityEvent) {
        if let Some(log) = self.activity {
            if let Err(err) = log.emit(event) {
                warn!(error = %err, "failed to write activity event");
            }
        }
    }
}

fn request_assets(
    config: &Configuration,
    inputs: GenerationInputs<'_>,
) -> Result<RequestAssets, GenerationError> {
    let mut assets = RequestAssets {
        reference_image: inputs.reference_image.map(<[u8]>::to_vec),
        edit: None,
    };
    if config.mode != GenerationMode::ImageEdit {
        return Ok(assets);
    }

    let Some(editor) = inputs.editor.filter(|editor| editor.is_ready()) else {
        return Err(GenerationError::Precondition(EDIT_PRECONDITION.to_string()));
    };
    match (editor.extract_base_image(), editor.extract_mask()) {
        (Ok(image_png), Ok(mask_png)) => {
            assets.edit = Some(EditAssets {
                image_png,
                mask_png,
            });
            Ok(assets)
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!(error = %err, "mask editor export failed");
            Err(GenerationError::Precondition(EXTRACT_FAILED.to_string()))
        }
    }
}
