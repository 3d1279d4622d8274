//! Native runtime: an embedded Lua 5.4 interpreter.
//!
//! Each session owns a fresh interpreter with only the base, table, string,
//! math and utf8 libraries loaded. Inputs become globals and outputs are
//! read back from globals. Tree objects are exposed as userdata with
//! read-only methods; JSON values become tables.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::prelude::*;
use mlua::{HookTriggers, LuaOptions, MetaMethod, StdLib, UserData, UserDataMethods, Value, VmState};
use tracing::{debug, warn};

use crate::domain::ape_tree::ApeTree;
use crate::domain::data::Data;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::graph_tree::GraphTree;
use crate::domain::mode::ExecutionMode;
use crate::formats::newick;
use crate::ports::ScriptRuntime;

/// Instructions between deadline checks.
const HOOK_INTERVAL: u32 = 10_000;

/// Base-library functions removed from every session: protected calls can
/// swallow the deadline error and the loaders reach the filesystem.
const REMOVED_GLOBALS: &[&str] = &["pcall", "xpcall", "dofile", "loadfile"];

/// Opaque byte string. Lua strings are read back as text, so binary values
/// travel in this wrapper instead.
#[derive(Debug, Clone)]
struct Blob(Vec<u8>);

impl UserData for Blob {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("len", |_, this, ()| Ok(this.0.len()));
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.0.len()));
    }
}

impl UserData for GraphTree {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("vertex_count", |_, this, ()| Ok(this.vertex_count()));
        methods.add_method("edge_count", |_, this, ()| Ok(this.edge_count()));
        methods.add_method("tip_count", |_, this, ()| Ok(this.leaf_names().len()));
        methods.add_method("tip_labels", |_, this, ()| {
            Ok(this.leaf_names().into_iter().map(str::to_string).collect::<Vec<_>>())
        });
        methods.add_method("to_newick", |_, this, ()| {
            let clade = this.to_clade().map_err(LuaError::external)?;
            Ok(newick::write(&clade))
        });
    }
}

impl UserData for ApeTree {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("tip_count", |_, this, ()| Ok(this.tip_count()));
        methods.add_method("node_count", |_, this, ()| Ok(this.n_node));
        methods.add_method("edge_count", |_, this, ()| Ok(this.edge.len()));
        methods.add_method("tip_labels", |_, this, ()| Ok(this.tip_label.clone()));
        methods.add_method("is_rooted", |_, this, ()| Ok(this.is_rooted()));
        methods.add_method("to_newick", |_, this, ()| {
            let clade = this.to_clade().map_err(LuaError::external)?;
            Ok(newick::write(&clade))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

pub struct LuaRuntime {
    lua: Lua,
    timeout: Option<Duration>,
    timed_out: Arc<AtomicBool>,
}

impl LuaRuntime {
    pub fn new(timeout: Option<Duration>) -> EngineResult<Self> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(|e| EngineError::RuntimeUnavailable {
            mode: ExecutionMode::Native,
            reason: e.to_string(),
        })?;
        for name in REMOVED_GLOBALS {
            lua.globals()
                .set(*name, Value::Nil)
                .map_err(|e| EngineError::RuntimeUnavailable {
                    mode: ExecutionMode::Native,
                    reason: e.to_string(),
                })?;
        }
        debug!("Started Lua session");
        Ok(Self {
            lua,
            timeout,
            timed_out: Arc::new(AtomicBool::new(false)),
        })
    }

    fn marshal_err(name: &str, e: impl std::fmt::Display) -> EngineError {
        EngineError::Marshal {
            mode: ExecutionMode::Native,
            name: name.to_string(),
            reason: e.to_string(),
        }
    }

    fn to_lua(&self, value: Data) -> LuaResult<Value> {
        match value {
            Data::Text(s) => self.lua.create_string(&s).map(Value::String),
            Data::Json(v) => self.lua.to_value(&v),
            Data::Bytes(b) => self.lua.create_userdata(Blob(b)).map(Value::UserData),
            Data::GraphTree(g) => self.lua.create_userdata(g).map(Value::UserData),
            Data::ApeTree(t) => self.lua.create_userdata(t).map(Value::UserData),
        }
    }

    fn from_lua(&self, value: Value) -> Result<Data, String> {
        match value {
            Value::String(s) => Ok(Data::Text(s.to_str().map_err(|e| e.to_string())?.to_string())),
            Value::UserData(ud) => {
                if let Ok(graph) = ud.borrow::<GraphTree>() {
                    Ok(Data::GraphTree(GraphTree::clone(&graph)))
                } else if let Ok(tree) = ud.borrow::<ApeTree>() {
                    Ok(Data::ApeTree(ApeTree::clone(&tree)))
                } else if let Ok(blob) = ud.borrow::<Blob>() {
                    Ok(Data::Bytes(blob.0.clone()))
                } else {
                    Err("unrecognized userdata".to_string())
                }
            }
            Value::Function(_) | Value::Thread(_) => Err(format!("cannot export a Lua {}", value.type_name())),
            other => self
                .lua
                .from_value::<serde_json::Value>(other)
                .map(Data::Json)
                .map_err(|e| e.to_string()),
        }
    }
}

impl ScriptRuntime for LuaRuntime {
    fn bind(&mut self, name: &str, value: Data) -> EngineResult<()> {
        let value = self.to_lua(value).map_err(|e| Self::marshal_err(name, e))?;
        self.lua
            .globals()
            .set(name, value)
            .map_err(|e| Self::marshal_err(name, e))
    }

    fn evaluate(&mut self, script: &str) -> EngineResult<()> {
        self.timed_out.store(false, Ordering::SeqCst);
        // A deadline past the end of representable time is no deadline.
        if let Some(deadline) = self.timeout.and_then(|limit| Instant::now().checked_add(limit)) {
            let timed_out = Arc::clone(&self.timed_out);
            self.lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
                move |_lua, _debug| {
                    if Instant::now() >= deadline {
                        timed_out.store(true, Ordering::SeqCst);
                        return Err(LuaError::RuntimeError("execution deadline exceeded".to_string()));
                    }
                    Ok(VmState::Continue)
                },
            );
        }

        let result = self.lua.load(script).set_name("analysis").exec();
        self.lua.remove_hook();

        // The flag wins over the result: a script that caught the deadline
        // error and finished normally still timed out.
        if self.timed_out.load(Ordering::SeqCst) {
            let timeout = self.timeout.unwrap_or_default();
            warn!("Lua script exceeded {:?}", timeout);
            return Err(EngineError::ScriptTimeout {
                mode: ExecutionMode::Native,
                timeout,
            });
        }
        result.map_err(|e| EngineError::ScriptExecution {
            mode: ExecutionMode::Native,
            diagnostic: e.to_string(),
        })
    }

    fn read(&mut self, name: &str) -> EngineResult<Data> {
        let value: Value = self
            .lua
            .globals()
            .get(name)
            .map_err(|e| Self::marshal_err(name, e))?;
        if value.is_nil() {
            return Err(EngineError::MissingOutput(name.to_string()));
        }
        self.from_lua(value).map_err(|reason| Self::marshal_err(name, reason))
    }
}
