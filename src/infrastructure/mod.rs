// Infrastructure implementations for arborist: script runtimes, subprocess
// supervision, configuration and the worker pool.

pub mod concurrency;
pub mod config;
pub mod lua_runtime;
pub mod process;
pub mod r_marshal;
pub mod r_runtime;
pub mod sandbox;

pub use config::EngineConfig;
pub use lua_runtime::LuaRuntime;
pub use r_runtime::RRuntime;
pub use sandbox::Sandbox;
