pub mod alerts;
pub mod catalog;
pub mod clip;
pub mod config;
pub mod preload;
pub mod sink;

pub use alerts::{AlertError, AlertResult, TelegramNotifier};
pub use catalog::{
    parse_min_date, CatalogClient, CatalogError, CatalogPool, CatalogResult, CatalogService,
    CatalogSettings, Clip, ClipsPage, GetClipsParams, HelixClient, Pagination, RateGate,
};
pub use clip::{
    ClipDownloader, ClipFetcher, ClipHandle, DownloadError, DownloadResult, DurationProber,
    FfprobeProber, ProbeError, ProbeResult, ReadySignal,
};
pub use config::{Config, ConfigError, ConfigResult, StreamSection};
pub use preload::PreloadPool;
pub use sink::{
    EncoderRunner, FfmpegEncoder, Muxer, MuxerInput, PresentationOffset, SinkError, SinkResult,
    StreamingSink,
};
