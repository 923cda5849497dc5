// Engine lifecycle and generation orchestration

use std::path::Path;

use crate::error::{EngineError, Op, Result};
use crate::request::{resolve_seed, ResolvedRequest};
use crate::{GenParams, GeneratedImage, ModelBackend};

/// Longest error text kept by [`Engine::last_error`]. Longer messages are cut
/// at a char boundary and marked.
const MAX_ERROR_LEN: usize = 1024;
const TRUNCATION_MARK: &str = " [truncated]";

/// Receipt for a completed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    /// Concrete seed the output was rendered with
    pub seed: u64,

    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,
}

/// A persistent generation engine holding one loaded model session.
///
/// The session is released exactly once, when the engine is dropped. Failing
/// operations return a structured error and also record its text in the
/// engine's last-error slot; successful operations leave the slot untouched,
/// so check the returned `Result` before consulting [`Engine::last_error`].
#[derive(Debug)]
pub struct Engine<B: ModelBackend> {
    backend: B,
    last_error: String,
}

impl<B: ModelBackend> Engine<B> {
    /// Load a model from `model_dir` and wrap it in an engine.
    ///
    /// On load failure no engine exists and nothing is left allocated. The
    /// memory-mapping toggle is applied only after a successful load and its
    /// outcome is not surfaced.
    pub fn create(model_dir: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let mut backend = B::load_dir(model_dir.as_ref())
            .map_err(|err| EngineError::ModelLoad(err.to_string()))?;
        if use_mmap {
            backend.set_mmap(true);
        }
        Ok(Self::with_backend(backend))
    }

    /// Wrap an already-loaded backend session.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            last_error: String::new(),
        }
    }

    /// Text of the most recent failure, or an empty string if no operation
    /// has failed since creation. Success never clears the slot: a stale
    /// message from an earlier failure can remain after a later successful
    /// call.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Render an image from a text prompt and write it to `out_path`.
    ///
    /// An empty prompt or output path fails with [`EngineError::BadArgs`]
    /// before the backend is invoked.
    pub fn txt2img_to_file(
        &mut self,
        prompt: &str,
        params: &GenParams,
        out_path: impl AsRef<Path>,
    ) -> Result<Generation> {
        let out_path = out_path.as_ref();
        if prompt.is_empty() || out_path.as_os_str().is_empty() {
            return Err(self.record(EngineError::BadArgs));
        }

        let seed = resolve_seed(params.seed);
        let request = ResolvedRequest::new(params, seed);
        tracing::info!("Generating {}x{} image with seed {}", request.width, request.height, seed);

        let image = match self.backend.generate(prompt, &request) {
            Ok(image) => image,
            Err(err) => return Err(self.record(EngineError::Generation(err.to_string()))),
        };

        let output = GeneratedImage {
            image,
            seed,
            prompt: prompt.to_string(),
        };
        let (width, height) = (output.image.width(), output.image.height());
        if let Err(err) = output.save_with_seed(out_path) {
            return Err(self.record(EngineError::SaveOutput {
                op: Op::Txt2Img,
                source: err,
            }));
        }

        tracing::info!("Saved output to {}", out_path.display());
        Ok(Generation { seed, width, height })
    }

    /// Re-render the image at `in_path` under a text prompt and write the
    /// result to `out_path`.
    ///
    /// An empty input or output path fails with [`EngineError::BadArgs`]
    /// before anything is read. Zero width or height in `params` inherits the
    /// source image's dimensions.
    pub fn img2img_to_file(
        &mut self,
        prompt: &str,
        in_path: impl AsRef<Path>,
        params: &GenParams,
        out_path: impl AsRef<Path>,
    ) -> Result<Generation> {
        let in_path = in_path.as_ref();
        let out_path = out_path.as_ref();
        if in_path.as_os_str().is_empty() || out_path.as_os_str().is_empty() {
            return Err(self.record(EngineError::BadArgs));
        }

        let seed = resolve_seed(params.seed);

        let source = match image::open(in_path) {
            Ok(source) => source.to_rgb8(),
            Err(err) => return Err(self.record(EngineError::LoadInput(err))),
        };

        let request = ResolvedRequest::new(params, seed)
            .inherit_dimensions((source.width(), source.height()));
        tracing::info!(
            "Transforming {} into {}x{} image with seed {}",
            in_path.display(),
            request.width,
            request.height,
            seed
        );

        let transformed = self.backend.transform(prompt, &source, &request);
        drop(source);

        let image = match transformed {
            Ok(image) => image,
            Err(err) => return Err(self.record(EngineError::Transform(err.to_string()))),
        };

        let output = GeneratedImage {
            image,
            seed,
            prompt: prompt.to_string(),
        };
        let (width, height) = (output.image.width(), output.image.height());
        if let Err(err) = output.save_with_seed(out_path) {
            return Err(self.record(EngineError::SaveOutput {
                op: Op::Img2Img,
                source: err,
            }));
        }

        tracing::info!("Saved output to {}", out_path.display());
        Ok(Generation { seed, width, height })
    }

    /// Overwrite the last-error slot with `err`'s text, truncating oversized
    /// messages, and hand the error back for returning.
    fn record(&mut self, err: EngineError) -> EngineError {
        let text = err.to_string();
        self.last_error.clear();
        if text.len() > MAX_ERROR_LEN {
            let mut cut = MAX_ERROR_LEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            self.last_error.push_str(&text[..cut]);
            self.last_error.push_str(TRUNCATION_MARK);
        } else {
            self.last_error.push_str(&text);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use image::RgbImage;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use std::rc::Rc;

    thread_local! {
        static LIVE_SESSIONS: Cell<i64> = const { Cell::new(0) };
    }

    struct CountingBackend;

    impl Drop for CountingBackend {
        fn drop(&mut self) {
            LIVE_SESSIONS.with(|live| live.set(live.get() - 1));
        }
    }

    impl ModelBackend for CountingBackend {
        fn load_dir(_model_dir: &Path) -> anyhow::Result<Self> {
            LIVE_SESSIONS.with(|live| live.set(live.get() + 1));
            Ok(CountingBackend)
        }

        fn set_mmap(&mut self, _enabled: bool) {}

        fn generate(&mut self, _: &str, request: &ResolvedRequest) -> anyhow::Result<RgbImage> {
            Ok(RgbImage::new(request.width, request.height))
        }

        fn transform(
            &mut self,
            _: &str,
            _: &RgbImage,
            request: &ResolvedRequest,
        ) -> anyhow::Result<RgbImage> {
            Ok(RgbImage::new(request.width, request.height))
        }
    }

    /// Scriptable backend: records the requests it sees and fails on demand.
    #[derive(Default)]
    struct StubBackend {
        seen: Rc<RefCell<Vec<ResolvedRequest>>>,
        generate_error: Option<String>,
        transform_error: Option<String>,
    }

    impl ModelBackend for StubBackend {
        fn load_dir(_model_dir: &Path) -> anyhow::Result<Self> {
            Ok(StubBackend::default())
        }

        fn set_mmap(&mut self, _enabled: bool) {}

        fn generate(&mut self, _: &str, request: &ResolvedRequest) -> anyhow::Result<RgbImage> {
            self.seen.borrow_mut().push(request.clone());
            if let Some(message) = &self.generate_error {
                return Err(anyhow!("{}", message));
            }
            Ok(RgbImage::new(request.width, request.height))
        }

        fn transform(
            &mut self,
            _: &str,
            _: &RgbImage,
            request: &ResolvedRequest,
        ) -> anyhow::Result<RgbImage> {
            self.seen.borrow_mut().push(request.clone());
            if let Some(message) = &self.transform_error {
                return Err(anyhow!("{}", message));
            }
            Ok(RgbImage::new(request.width, request.height))
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fluxgen-engine-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_test_input(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("input.png");
        RgbImage::new(width, height).save(&path).unwrap();
        path
    }

    #[test]
    fn test_create_then_drop_releases_session_once() {
        let engine = Engine::<CountingBackend>::create("anywhere", false).unwrap();
        LIVE_SESSIONS.with(|live| assert_eq!(live.get(), 1));
        drop(engine);
        LIVE_SESSIONS.with(|live| assert_eq!(live.get(), 0));
    }

    #[test]
    fn test_empty_prompt_never_reaches_backend() {
        let backend = StubBackend::default();
        let seen = backend.seen.clone();
        let mut engine = Engine::with_backend(backend);

        let err = engine
            .txt2img_to_file("", &GenParams::default(), "/tmp/never.png")
            .unwrap_err();
        assert_eq!(err.status(), 2);
        assert_eq!(engine.last_error(), "bad args");
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_empty_paths_are_bad_args() {
        let mut engine = Engine::with_backend(StubBackend::default());
        let err = engine
            .txt2img_to_file("a cat", &GenParams::default(), "")
            .unwrap_err();
        assert_eq!(err.status(), 2);

        let err = engine
            .img2img_to_file("a cat", "", &GenParams::default(), "/tmp/out.png")
            .unwrap_err();
        assert_eq!(err.status(), 2);
    }

    #[test]
    fn test_img2img_does_not_require_prompt() {
        let dir = scratch("no-prompt");
        let input = write_test_input(&dir, 32, 24);
        let mut engine = Engine::with_backend(StubBackend::default());

        let generation = engine
            .img2img_to_file("", &input, &GenParams::default(), dir.join("out.png"))
            .unwrap();
        assert_eq!(generation.width, 512);
        assert_eq!(generation.height, 512);
    }

    #[test]
    fn test_resolved_seed_reaches_backend() {
        let backend = StubBackend::default();
        let seen = backend.seen.clone();
        let mut engine = Engine::with_backend(backend);

        let dir = scratch("seed");
        let params = GenParams {
            seed: Some(42),
            ..GenParams::default()
        };
        let generation = engine
            .txt2img_to_file("a cat", &params, dir.join("out.png"))
            .unwrap();
        assert_eq!(generation.seed, 42);
        assert_eq!(seen.borrow()[0].seed, 42);
    }

    #[test]
    fn test_img2img_inherits_source_dimensions() {
        let backend = StubBackend::default();
        let seen = backend.seen.clone();
        let mut engine = Engine::with_backend(backend);

        let dir = scratch("inherit");
        let input = write_test_input(&dir, 48, 36);
        let params = GenParams {
            width: 0,
            height: 0,
            ..GenParams::default()
        };
        engine
            .img2img_to_file("a cat", &input, &params, dir.join("out.png"))
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen[0].width, 48);
        assert_eq!(seen[0].height, 36);
    }

    #[test]
    fn test_backend_failure_text_is_recorded_verbatim() {
        let mut engine = Engine::with_backend(StubBackend {
            generate_error: Some("tensor shape mismatch".into()),
            ..StubBackend::default()
        });

        let err = engine
            .txt2img_to_file("a cat", &GenParams::default(), "/tmp/out.png")
            .unwrap_err();
        assert_eq!(err.status(), 3);
        assert_eq!(engine.last_error(), "tensor shape mismatch");
    }

    #[test]
    fn test_transform_failure_is_status_four() {
        let dir = scratch("transform-fail");
        let input = write_test_input(&dir, 16, 16);
        let mut engine = Engine::with_backend(StubBackend {
            transform_error: Some("out of memory".into()),
            ..StubBackend::default()
        });

        let err = engine
            .img2img_to_file("a cat", &input, &GenParams::default(), dir.join("out.png"))
            .unwrap_err();
        assert_eq!(err.status(), 4);
        assert_eq!(engine.last_error(), "out of memory");
    }

    #[test]
    fn test_missing_input_is_load_failure() {
        let mut engine = Engine::with_backend(StubBackend::default());
        let err = engine
            .img2img_to_file(
                "a cat",
                "/nonexistent/input.png",
                &GenParams::default(),
                "/tmp/out.png",
            )
            .unwrap_err();
        assert_eq!(err.status(), 3);
        assert_eq!(engine.last_error(), "failed to load input image");
    }

    #[test]
    fn test_save_failure_statuses_are_positional() {
        let dir = scratch("save-fail");
        let input = write_test_input(&dir, 16, 16);
        let unwritable = "/nonexistent-dir/out.png";

        let mut engine = Engine::with_backend(StubBackend::default());
        let err = engine
            .txt2img_to_file("a cat", &GenParams::default(), unwritable)
            .unwrap_err();
        assert_eq!(err.status(), 4);
        assert_eq!(engine.last_error(), "failed to save output");

        let err = engine
            .img2img_to_file("a cat", &input, &GenParams::default(), unwritable)
            .unwrap_err();
        assert_eq!(err.status(), 5);
        assert_eq!(engine.last_error(), "failed to save output");
    }

    #[test]
    fn test_stale_error_survives_success() {
        let dir = scratch("stale");
        let mut engine = Engine::with_backend(StubBackend::default());
        assert_eq!(engine.last_error(), "");

        engine
            .txt2img_to_file("", &GenParams::default(), dir.join("out.png"))
            .unwrap_err();
        assert_eq!(engine.last_error(), "bad args");

        engine
            .txt2img_to_file("a cat", &GenParams::default(), dir.join("out.png"))
            .unwrap();
        assert_eq!(engine.last_error(), "bad args");
    }

    #[test]
    fn test_oversized_error_is_truncated_and_marked() {
        let mut engine = Engine::with_backend(StubBackend {
            generate_error: Some("x".repeat(5000)),
            ..StubBackend::default()
        });

        engine
            .txt2img_to_file("a cat", &GenParams::default(), "/tmp/out.png")
            .unwrap_err();
        let recorded = engine.last_error();
        assert_eq!(recorded.len(), MAX_ERROR_LEN + TRUNCATION_MARK.len());
        assert!(recorded.ends_with(TRUNCATION_MARK));
    }
}
