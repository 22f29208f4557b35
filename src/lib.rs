//! fuzzstate: entity-state tracking and request shaping between a
//! property-based API fuzzer and a live REST service.

#[path = "runtime/bridge.rs"]
mod bridge;
#[path = "model/case.rs"]
mod case;
#[path = "runtime/clock.rs"]
mod clock;
#[path = "platform/config.rs"]
mod config;
#[path = "platform/duration.rs"]
mod duration;
#[path = "model/entity.rs"]
mod entity;
#[path = "platform/envinfo.rs"]
mod envinfo;
#[path = "platform/error.rs"]
mod error;
#[path = "model/logview.rs"]
mod logview;
#[path = "runtime/names.rs"]
mod names;
#[path = "model/payload.rs"]
mod payload;
#[path = "model/policy.rs"]
mod policy;
#[path = "runtime/service.rs"]
mod service;
#[path = "runtime/session.rs"]
mod session;
#[path = "runtime/stats.rs"]
mod stats;
#[path = "runtime/tracefile.rs"]
mod tracefile;

pub use bridge::*;
pub use case::*;
pub use clock::*;
pub use config::*;
pub use duration::*;
pub use entity::*;
pub use envinfo::*;
pub use error::*;
pub use logview::*;
pub use names::*;
pub use payload::*;
pub use policy::*;
pub use service::*;
pub use session::*;
pub use stats::*;
pub use tracefile::*;
