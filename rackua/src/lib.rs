mod body;
mod bridge;
mod config;
mod decode;
mod error;
mod marshal;
mod probe;
mod types;
mod vm;
mod worker;

pub use bridge::Bridge;
pub use config::VmConfig;
pub use error::{CallError, LoadError, ProtocolError, RenderedError};
pub use marshal::INPUT_KEY;
pub use types::{KeyValue, RequestEnvironment, Response, ResponseBody, ResponseOwned};
pub use worker::{Worker, WorkerConfig, WorkerError};

// Guest values surface as `mlua::Value`; re-export the runtime so embedders
// can work with them without pinning their own copy.
pub use mlua;
