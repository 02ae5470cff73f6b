// Application layer - Use case interactors and stream orchestration

pub mod container;
pub mod inspect_interactor;
pub mod multi_stream;
pub mod scan_interactor;
pub mod stream_runner;

// Re-export interactors
pub use container::{AppContainer, DefaultAppContainer, SourceLocator, SyntheticOptions};
pub use inspect_interactor::{InspectInteractor, InspectRequest, ReportFormat};
pub use multi_stream::{MultiStreamRecorder, StreamJob, StreamOutcome};
pub use scan_interactor::{ScanInteractor, ScanReport, ScanRequest};
pub use stream_runner::{stop_channel, RunSummary, StopHandle, StopSignal, StreamRunner};
