pub mod app;

pub use app::AppConfig;
pub use app::Environment;
pub use app::RefreshConfig;
pub use app::ServerConfig;
pub use app::UpstreamConfig;
