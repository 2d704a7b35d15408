mod arena;
mod config;
mod engine;
mod params;
mod record;
mod route;
mod show;
mod tables;
mod utils;
mod wheel;

pub use config::ConfigSource;
pub use engine::timer::{spawn_timers, TimerHandle};
pub use engine::{DampEngine, DampError, DampOutcome};
pub use params::{DampParams, EngineTuning};
pub use record::RouteEvent;
pub use route::{Family, PathAttributes, PeerSort, RouteId, RouteMapEval, RouteStore};
pub use show::{DampConfigInfo, FlappedRoute};
