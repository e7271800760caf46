//! External collaborators behind capability traits.
//!
//! Every blocking or fallible dependency of the pipeline — blob storage,
//! network fetches, OCR, the refinement LLM — is a trait with a single
//! "attempt" operation returning a result-or-failure value. Callers can
//! never treat a best-effort service as a hard dependency: each call site
//! receives an explicit `Result` (or an `Option` of the service itself)
//! and decides its own degradation path.
//!
//! Default implementations:
//!
//! | Trait             | Implementation        | Backing                    |
//! |-------------------|-----------------------|----------------------------|
//! | [`ArtifactStore`] | [`FsStore`]           | directory of files         |
//! | [`NetworkFetcher`]| [`HttpFetcher`]       | reqwest                    |
//! | [`OcrEngine`]     | [`TesseractOcr`]      | `tesseract` CLI            |
//! | [`LlmService`]    | [`OpenAiCompatClient`]| OpenAI-style chat endpoint |

pub mod fetch;
pub mod llm;
pub mod ocr;
pub mod store;

pub use fetch::{FetchError, HttpFetcher, NetworkFetcher};
pub use llm::{LlmError, LlmService, OpenAiCompatClient};
pub use ocr::{OcrEngine, OcrError, TesseractOcr};
pub use store::{ArtifactStore, FsStore, MemoryStore};
