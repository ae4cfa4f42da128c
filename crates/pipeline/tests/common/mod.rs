//! Shared fakes and a single-threaded harness for pipeline integration tests.
//!
//! Work items go through a [`ChannelDispatcher`]; [`Harness::drain`] runs
//! them one at a time until the channel is empty, which makes every
//! scenario deterministic.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use fitline_core::geometry::{ImageDimensions, NormalizedBox};
use fitline_core::job_status::JobKind;
use fitline_core::quality_gate::GateFlags;
use fitline_db::models::job::Job;
use fitline_events::EventBus;
use fitline_inference::types::{DetectionResult, GenerationCandidate, SegmentationResult};
use fitline_inference::{
    DetectionWorker, GenerationEngine, ImageStore, InferenceError, MemoryImageStore, PromptWriter,
    QualityEvaluator, SegmentationWorker,
};
use fitline_pipeline::{
    ChannelDispatcher, Collaborators, MemoryJobStore, Orchestrator, PipelineConfig, WorkItem,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use tokio::sync::mpsc::UnboundedReceiver;

pub const PERSON_REF: &str = "person.png";
pub const GARMENT_REF: &str = "garment.png";
pub const PERSON_DIMS: ImageDimensions = ImageDimensions {
    width: 100,
    height: 80,
};

/// Person photo fill colour.
pub const BLUE: [u8; 4] = [0, 0, 255, 255];
/// Colour of every generated candidate.
pub const RED: [u8; 4] = [255, 0, 0, 255];

/// Box the three agreeing segmenters report: the top-left quarter.
pub const AGREED_BOX: [f64; 4] = [0.0, 0.0, 500.0, 500.0];
/// Box the two dissenting segmenters report: the bottom-right quarter.
pub const DISSENT_BOX: [f64; 4] = [500.0, 500.0, 1000.0, 1000.0];

/// Subject box every healthy detector reports.
pub const SUBJECT_BOX: [f64; 4] = [200.0, 250.0, 800.0, 750.0];

pub fn png(image: DynamicImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn jpeg(image: DynamicImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

pub fn solid_rgba(width: u32, height: u32, colour: [u8; 4]) -> Vec<u8> {
    png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba(colour),
    )))
}

fn unavailable(what: &str) -> InferenceError {
    InferenceError::Api {
        status: 503,
        body: format!("{what} unavailable"),
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Box a lone misbehaving detector reports, far from [`SUBJECT_BOX`].
pub const OUTLIER_BOX: [f64; 4] = [900.0, 900.0, 950.0, 950.0];

/// Detector replaying a per-call pattern. Call `n` answers with
/// `pattern[n % pattern.len()]`; `None` entries fail the call.
pub struct FakeDetector {
    pub pattern: Vec<Option<[f64; 4]>>,
    pub calls: AtomicUsize,
}

impl FakeDetector {
    pub fn with_pattern(pattern: Vec<Option<[f64; 4]>>) -> Self {
        Self {
            pattern,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn steady() -> Self {
        Self::with_pattern(vec![Some(SUBJECT_BOX)])
    }

    pub fn failing() -> Self {
        Self::with_pattern(vec![None])
    }

    /// Only the first of every five calls succeeds.
    pub fn flaky() -> Self {
        Self::with_pattern(vec![Some(SUBJECT_BOX), None, None, None, None])
    }

    /// Four of every five calls agree; the last reports [`OUTLIER_BOX`].
    pub fn with_outlier() -> Self {
        let mut pattern = vec![Some(SUBJECT_BOX); 4];
        pattern.push(Some(OUTLIER_BOX));
        Self::with_pattern(pattern)
    }
}

#[async_trait]
impl DetectionWorker for FakeDetector {
    async fn detect(&self, _image_ref: &str) -> Result<DetectionResult, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let bbox = self.pattern[call % self.pattern.len()].ok_or_else(|| unavailable("detector"))?;
        Ok(DetectionResult {
            normalized_box: NormalizedBox::from(bbox),
            original_dimensions: PERSON_DIMS,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterMode {
    /// Calls 0..3 of every five agree on [`AGREED_BOX`]; calls 3 and 4
    /// report [`DISSENT_BOX`].
    Split,
    /// Calls 0..3 of every five agree on [`AGREED_BOX`]; calls 3 and 4 fail.
    PartialFailure,
    Failing,
}

pub struct FakeSegmenter {
    pub mode: SegmenterMode,
    pub calls: AtomicUsize,
}

impl FakeSegmenter {
    pub fn new(mode: SegmenterMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SegmentationWorker for FakeSegmenter {
    async fn segment(&self, _image_ref: &str) -> Result<SegmentationResult, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.mode == SegmenterMode::Failing {
            return Err(unavailable("segmenter"));
        }
        let bbox = match (self.mode, call % 5 < 3) {
            (_, true) => AGREED_BOX,
            (SegmenterMode::PartialFailure, false) => return Err(unavailable("segmenter")),
            _ => DISSENT_BOX,
        };
        let mask = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([255])));
        // The second worker of every five answers in JPEG.
        let raster = if call % 5 == 1 { jpeg(mask) } else { png(mask) };
        Ok(SegmentationResult {
            box_2d: NormalizedBox::from(bbox),
            mask: base64::engine::general_purpose::STANDARD.encode(raster),
            label: Some("upper_body".to_string()),
        })
    }
}

pub struct FakePromptWriter;

#[async_trait]
impl PromptWriter for FakePromptWriter {
    async fn write_prompt(&self, context: &serde_json::Value) -> Result<String, InferenceError> {
        let garment = context["garment_ref"].as_str().unwrap_or("garment");
        Ok(format!("Dress the person in {garment}, matching fabric and fit."))
    }
}

/// Engine that stores a solid red candidate per request and records the
/// tier of every call.
pub struct FakeEngine {
    images: Arc<MemoryImageStore>,
    pub tiers: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new(images: Arc<MemoryImageStore>) -> Self {
        Self {
            images,
            tiers: Mutex::new(Vec::new()),
        }
    }

    pub fn tiers(&self) -> Vec<String> {
        self.tiers.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationEngine for FakeEngine {
    async fn generate(
        &self,
        _context: &serde_json::Value,
        count: usize,
        tier: &str,
    ) -> Result<Vec<GenerationCandidate>, InferenceError> {
        self.tiers.lock().unwrap().push(tier.to_string());
        let mut candidates = Vec::with_capacity(count);
        for index in 0..count {
            let image_ref = self
                .images
                .put(solid_rgba(40, 40, RED), "image/png")
                .await?;
            candidates.push(GenerationCandidate {
                index,
                image_ref,
                tier: tier.to_string(),
            });
        }
        Ok(candidates)
    }
}

pub const SELECT_SECOND: &str =
    r#"{"action":"select","chosen_index":1,"reasoning":"second candidate fits"}"#;
pub const RETRY: &str = r#"{"action":"retry","chosen_index":0,"reasoning":"sleeves distorted"}"#;

/// Evaluator that replays a script and then selects. `None` entries fail
/// the call.
pub struct ScriptedEvaluator {
    script: Mutex<VecDeque<Option<String>>>,
    pub flags: Mutex<Vec<GateFlags>>,
}

impl ScriptedEvaluator {
    pub fn new(script: Vec<Option<&str>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(|s| s.map(str::to_string)).collect()),
            flags: Mutex::new(Vec::new()),
        }
    }

    pub fn selecting() -> Self {
        Self::new(vec![])
    }

    pub fn flags(&self) -> Vec<GateFlags> {
        self.flags.lock().unwrap().clone()
    }
}

#[async_trait]
impl QualityEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _reference_ref: &str,
        _candidate_refs: &[String],
        flags: GateFlags,
    ) -> Result<String, InferenceError> {
        self.flags.lock().unwrap().push(flags);
        match self.script.lock().unwrap().pop_front() {
            Some(Some(raw)) => Ok(raw),
            Some(None) => Err(unavailable("evaluator")),
            None => Ok(SELECT_SECOND.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryJobStore>,
    pub images: Arc<MemoryImageStore>,
    pub detector: Arc<FakeDetector>,
    pub segmenter: Arc<FakeSegmenter>,
    pub engine: Arc<FakeEngine>,
    pub evaluator: Arc<ScriptedEvaluator>,
    pub events: Arc<EventBus>,
    pub rx: UnboundedReceiver<WorkItem>,
}

impl Harness {
    pub async fn new(
        detector: FakeDetector,
        segmenter: SegmenterMode,
        evaluator: ScriptedEvaluator,
    ) -> Self {
        Self::with_config(PipelineConfig::default(), detector, segmenter, evaluator).await
    }

    pub async fn healthy() -> Self {
        Self::new(
            FakeDetector::steady(),
            SegmenterMode::Split,
            ScriptedEvaluator::selecting(),
        )
        .await
    }

    pub async fn with_config(
        config: PipelineConfig,
        detector: FakeDetector,
        segmenter: SegmenterMode,
        evaluator: ScriptedEvaluator,
    ) -> Self {
        let images = Arc::new(MemoryImageStore::new());
        images
            .insert(PERSON_REF, solid_rgba(PERSON_DIMS.width, PERSON_DIMS.height, BLUE), "image/png")
            .await;
        images
            .insert(GARMENT_REF, solid_rgba(30, 30, RED), "image/png")
            .await;

        let store = Arc::new(MemoryJobStore::new());
        let (dispatcher, rx) = ChannelDispatcher::channel();
        let events = Arc::new(EventBus::default());
        let detector = Arc::new(detector);
        let segmenter = Arc::new(FakeSegmenter::new(segmenter));
        let engine = Arc::new(FakeEngine::new(Arc::clone(&images)));
        let evaluator = Arc::new(evaluator);

        let collaborators = Collaborators {
            detector: detector.clone(),
            segmenter: segmenter.clone(),
            prompt_writer: Arc::new(FakePromptWriter),
            engine: engine.clone(),
            evaluator: evaluator.clone(),
            images: images.clone(),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(dispatcher),
            collaborators,
            config,
            Arc::clone(&events),
        ));

        Self {
            orchestrator,
            store,
            images,
            detector,
            segmenter,
            engine,
            evaluator,
            events,
            rx,
        }
    }

    /// Run queued work items until none are left. Returns how many ran.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(item) = self.rx.try_recv() {
            self.orchestrator.handle(item).await.unwrap();
            handled += 1;
            assert!(handled < 1_000, "work queue did not settle");
        }
        handled
    }

    /// Drop queued work items without running them.
    pub fn discard_queue(&mut self) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }

    pub async fn job(&self, id: i64) -> Job {
        self.orchestrator.get_job(id).await.unwrap()
    }

    pub async fn jobs_of(&self, kind: JobKind) -> Vec<Job> {
        self.store
            .all()
            .await
            .into_iter()
            .filter(|j| j.kind == kind.as_str())
            .collect()
    }

    pub async fn image(&self, image_ref: &str) -> DynamicImage {
        let bytes = self.images.fetch(image_ref).await.unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    pub async fn create_garment_fit(&self, extra: serde_json::Value) -> Job {
        let mut payload = serde_json::json!({
            "person_ref": PERSON_REF,
            "garment_ref": GARMENT_REF,
        });
        if let (Some(target), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        self.orchestrator
            .create_job(JobKind::GarmentFit, payload)
            .await
            .unwrap()
    }
}
