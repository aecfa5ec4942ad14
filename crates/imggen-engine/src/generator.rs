use std::borrow::Cow;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use image::ImageFormat;
use imggen_contracts::metadata::{write_metadata, MetadataRecord};
use imggen_contracts::pricing::estimate_cost_per_image;
use imggen_contracts::ImggenError;

use crate::output::{OutputTarget, PlannedOutput};
use crate::providers::ImageProvider;
use crate::request::{GeneratedImage, GenerationFailure, GenerationRequest, GenerationResult};

pub const MAX_VARIATIONS: usize = 4;
pub const MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub per_image: f64,
    pub total: f64,
    /// False when the request falls outside the price table.
    pub priced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedImage {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub record: MetadataRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariationOutcome {
    pub index: usize,
    pub filename: String,
    pub image_path: PathBuf,
    pub result: Result<SavedImage, GenerationFailure>,
}

impl VariationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub model: String,
    pub variations: usize,
    pub estimate: CostEstimate,
    /// Completion order.
    pub outcomes: Vec<VariationOutcome>,
    pub dry_run: bool,
}

impl GenerationReport {
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    pub fn rate_limited(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| matches!(&outcome.result, Err(failure) if failure.rate_limited))
    }

    /// Sum of the costs recorded in the sidecars that were written.
    pub fn actual_cost_usd(&self) -> f64 {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
            .map(|saved| saved.record.cost_usd)
            .sum()
    }
}

pub struct Generator<'a> {
    provider: &'a dyn ImageProvider,
    max_workers: usize,
    dry_run: bool,
}

impl<'a> Generator<'a> {
    pub fn new(provider: &'a dyn ImageProvider) -> Self {
        Self {
            provider,
            max_workers: MAX_WORKERS,
            dry_run: false,
        }
    }

    /// Clamped to `1..=MAX_WORKERS`.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn estimate(&self, request: &GenerationRequest) -> CostEstimate {
        let per_image = estimate_cost_per_image(
            self.provider.kind(),
            request.quality,
            request.resolution,
            request.aspect_ratio,
        );
        CostEstimate {
            per_image: per_image.unwrap_or(0.0),
            total: per_image.unwrap_or(0.0) * request.variations as f64,
            priced: per_image.is_some(),
        }
    }

    /// Plan, check for collisions, then fan out one provider call per variation.
    ///
    /// `on_outcome` runs on the calling thread as each variation finishes.
    pub fn run<F>(
        &self,
        request: &GenerationRequest,
        target: &OutputTarget,
        mut on_outcome: F,
    ) -> Result<GenerationReport, ImggenError>
    where
        F: FnMut(&VariationOutcome),
    {
        if !(1..=MAX_VARIATIONS).contains(&request.variations) {
            return Err(ImggenError::invalid_argument(format!(
                "Variations must be between 1 and {MAX_VARIATIONS}, got {}",
                request.variations
            )));
        }
        let plan = target.plan(request.variations);
        target.check_collisions(&plan)?;

        let mut report = GenerationReport {
            model: self.provider.model_for(request),
            variations: request.variations,
            estimate: self.estimate(request),
            outcomes: Vec::with_capacity(plan.len()),
            dry_run: self.dry_run,
        };
        if self.dry_run {
            return Ok(report);
        }

        std::fs::create_dir_all(&target.dir)?;
        let workers = self.max_workers.min(plan.len());
        tracing::info!(
            provider = self.provider.name(),
            model = %report.model,
            variations = plan.len(),
            workers,
            "starting generation"
        );

        let (job_tx, job_rx) = mpsc::channel::<PlannedOutput>();
        for planned in plan {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(planned);
        }
        drop(job_tx);
        let job_rx = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel::<VariationOutcome>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                scope.spawn(move || loop {
                    let next = match job_rx.lock() {
                        Ok(guard) => guard.recv(),
                        Err(_) => break,
                    };
                    let Ok(planned) = next else {
                        break;
                    };
                    tracing::debug!(worker, index = planned.index, "worker picked up variation");
                    let outcome = self.run_one(request, planned);
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            for outcome in result_rx {
                on_outcome(&outcome);
                report.outcomes.push(outcome);
            }
        });

        tracing::info!(
            successful = report.successful(),
            failed = report.failed(),
            cost_usd = report.actual_cost_usd(),
            "generation finished"
        );
        Ok(report)
    }

    fn run_one(&self, request: &GenerationRequest, planned: PlannedOutput) -> VariationOutcome {
        let result = match self.provider.generate_image(request) {
            GenerationResult::Success(image) => {
                persist(request, self.provider.name(), &planned, image)
            }
            GenerationResult::Failure(failure) => Err(failure),
        };
        VariationOutcome {
            index: planned.index,
            filename: planned.filename,
            image_path: planned.image_path,
            result,
        }
    }
}

/// Image first, then its sidecar. No sidecar is written for an image that failed to land.
fn persist(
    request: &GenerationRequest,
    provider: &str,
    planned: &PlannedOutput,
    image: GeneratedImage,
) -> Result<SavedImage, GenerationFailure> {
    let bytes = png_bytes(&image)?;
    std::fs::write(&planned.image_path, &bytes).map_err(|err| {
        GenerationFailure::new(format!(
            "failed to write {}: {err}",
            planned.image_path.display()
        ))
    })?;
    let record = MetadataRecord::new(
        &request.prompt,
        provider,
        &image.model,
        image.cost_usd,
        &image.metadata,
    );
    write_metadata(&planned.metadata_path, &record).map_err(|err| {
        GenerationFailure::new(format!(
            "failed to write {}: {err:#}",
            planned.metadata_path.display()
        ))
    })?;
    Ok(SavedImage {
        image_path: planned.image_path.clone(),
        metadata_path: planned.metadata_path.clone(),
        record,
    })
}

/// Outputs are always `.png`; other payload formats are re-encoded.
fn png_bytes(generated: &GeneratedImage) -> Result<Cow<'_, [u8]>, GenerationFailure> {
    if generated.mime_type.eq_ignore_ascii_case("image/png") {
        return Ok(Cow::Borrowed(&generated.bytes));
    }
    let decoded = image::load_from_memory(&generated.bytes).map_err(|err| {
        GenerationFailure::new(format!("failed to decode {} payload: {err}", generated.mime_type))
    })?;
    let mut encoded = Cursor::new(Vec::new());
    decoded
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|err| GenerationFailure::new(format!("failed to encode PNG: {err}")))?;
    tracing::debug!(from = %generated.mime_type, "re-encoded payload as PNG");
    Ok(Cow::Owned(encoded.into_inner()))
}
