//! Conversion Graph
//!
//! Converters are directed edges between `(type, format)` nodes. Paths are
//! found breadth-first; among equally short paths the one using the
//! earliest registered converters wins.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::debug;

use crate::domain::data::Data;
use crate::domain::error::{EngineError, EngineResult};

type ConvertFn = dyn Fn(&Data) -> anyhow::Result<Data> + Send + Sync;

/// One registered transformation.
#[derive(Clone)]
pub struct Converter {
    pub data_type: String,
    pub from: String,
    pub to: String,
    func: Arc<ConvertFn>,
}

impl Converter {
    /// Apply this converter, tagging any failure with its type and formats.
    pub fn apply(&self, data: &Data) -> EngineResult<Data> {
        (self.func)(data).map_err(|e| {
            EngineError::conversion(&self.data_type, &self.from, &self.to, format!("{:#}", e))
        })
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Converter({}: {} -> {})", self.data_type, self.from, self.to)
    }
}

#[derive(Clone, Default, Debug)]
pub struct ConverterRegistry {
    converters: Vec<Converter>,
    canonical: HashMap<String, String>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in format.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::formats::register_tree_formats(&mut registry);
        registry
    }

    /// The process-wide default registry, populated on first use.
    pub fn global() -> &'static ConverterRegistry {
        static GLOBAL: OnceLock<ConverterRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ConverterRegistry::with_defaults)
    }

    /// Register a converter. Registering the same `(type, from, to)` again
    /// replaces the function but keeps its original position.
    pub fn register<F>(&mut self, data_type: &str, from: &str, to: &str, func: F)
    where
        F: Fn(&Data) -> anyhow::Result<Data> + Send + Sync + 'static,
    {
        let converter = Converter {
            data_type: data_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            func: Arc::new(func),
        };
        match self
            .converters
            .iter_mut()
            .find(|c| c.data_type == data_type && c.from == from && c.to == to)
        {
            Some(slot) => {
                debug!("Replacing converter {}: {} -> {}", data_type, from, to);
                *slot = converter;
            }
            None => self.converters.push(converter),
        }
    }

    /// Declare the pivot format of a type.
    pub fn set_canonical(&mut self, data_type: &str, format: &str) {
        self.canonical.insert(data_type.to_string(), format.to_string());
    }

    pub fn canonical_format(&self, data_type: &str) -> Option<&str> {
        self.canonical.get(data_type).map(String::as_str)
    }

    pub fn converters(&self) -> &[Converter] {
        &self.converters
    }

    /// Every format of a type that appears on some converter, in order of
    /// first appearance.
    pub fn formats(&self, data_type: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in self.converters.iter().filter(|c| c.data_type == data_type) {
            for f in [c.from.as_str(), c.to.as_str()] {
                if !out.contains(&f) {
                    out.push(f);
                }
            }
        }
        out
    }

    pub fn types(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in &self.converters {
            if !out.contains(&c.data_type.as_str()) {
                out.push(&c.data_type);
            }
        }
        out
    }

    /// Shortest chain of converters from `from` to `to`. Same format means
    /// the empty chain.
    pub fn resolve_path(&self, data_type: &str, from: &str, to: &str) -> EngineResult<Vec<&Converter>> {
        if from == to {
            return Ok(Vec::new());
        }

        // format -> index of the converter that first reached it
        let mut reached_by: HashMap<&str, Option<usize>> = HashMap::new();
        let mut queue = VecDeque::new();
        reached_by.insert(from, None);
        queue.push_back(from);

        while let Some(format) = queue.pop_front() {
            for (idx, c) in self.converters.iter().enumerate() {
                if c.data_type != data_type || c.from != format {
                    continue;
                }
                if reached_by.contains_key(c.to.as_str()) {
                    continue;
                }
                reached_by.insert(&c.to, Some(idx));
                if c.to == to {
                    let path = self.walk_back(&reached_by, to);
                    debug!(
                        "Resolved {} {} -> {} in {} step(s)",
                        data_type,
                        from,
                        to,
                        path.len()
                    );
                    return Ok(path);
                }
                queue.push_back(&c.to);
            }
        }

        Err(EngineError::unsupported(data_type, from, to))
    }

    fn walk_back(&self, reached_by: &HashMap<&str, Option<usize>>, to: &str) -> Vec<&Converter> {
        let mut path = Vec::new();
        let mut cursor = to;
        while let Some(Some(idx)) = reached_by.get(cursor) {
            let c = &self.converters[*idx];
            path.push(c);
            cursor = &c.from;
        }
        path.reverse();
        path
    }

    /// Resolve a path and run the data through it.
    pub fn convert(&self, data_type: &str, from: &str, to: &str, data: &Data) -> EngineResult<Data> {
        let path = self.resolve_path(data_type, from, to)?;
        let mut current = data.clone();
        for converter in path {
            current = converter.apply(&current)?;
        }
        Ok(current)
    }
}

/// A registry that can still grow after startup. Requests work on an
/// immutable snapshot; registrations are serialized by their own lock and
/// publish a new snapshot.
#[derive(Debug)]
pub struct SharedRegistry {
    current: RwLock<Arc<ConverterRegistry>>,
    writer: Mutex<()>,
}

impl SharedRegistry {
    pub fn new(registry: ConverterRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<ConverterRegistry> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn register<F>(&self, data_type: &str, from: &str, to: &str, func: F)
    where
        F: Fn(&Data) -> anyhow::Result<Data> + Send + Sync + 'static,
    {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (*self.snapshot()).clone();
        next.register(data_type, from, to, func);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    fn tag(label: &'static str) -> impl Fn(&Data) -> anyhow::Result<Data> + Send + Sync {
        move |data: &Data| {
            let text = data.as_text().unwrap_or_default();
            Ok(Data::Text(format!("{}>{}", text, label)))
        }
    }

    fn registry() -> ConverterRegistry {
        let mut r = ConverterRegistry::new();
        r.register("table", "csv", "rows", tag("csv-rows"));
        r.register("table", "rows", "csv", tag("rows-csv"));
        r.register("table", "tsv", "rows", tag("tsv-rows"));
        r.register("table", "rows", "tsv", tag("rows-tsv"));
        r.register("table", "rows", "json", tag("rows-json"));
        r.register("table", "csv", "matrix", tag("csv-matrix"));
        r.register("table", "matrix", "json", tag("matrix-json"));
        r.register("other", "csv", "secret", tag("unrelated"));
        r
    }

    fn steps(path: &[&Converter]) -> Vec<String> {
        path.iter().map(|c| format!("{}->{}", c.from, c.to)).collect()
    }

    #[test]
    fn test_identity_path_is_empty() {
        let r = registry();
        assert!(r.resolve_path("table", "csv", "csv").unwrap().is_empty());
        assert!(r.resolve_path("unknown", "x", "x").unwrap().is_empty());
    }

    #[test]
    fn test_multi_hop_through_pivot() {
        let r = registry();
        let path = r.resolve_path("table", "csv", "tsv").unwrap();
        assert_eq!(steps(&path), vec!["csv->rows", "rows->tsv"]);
    }

    #[test]
    fn test_tie_broken_by_registration_order() {
        // csv->rows->json and csv->matrix->json are both two hops; rows was registered first.
        let r = registry();
        let path = r.resolve_path("table", "csv", "json").unwrap();
        assert_eq!(steps(&path), vec!["csv->rows", "rows->json"]);
    }

    #[test]
    fn test_shortest_path_wins_over_registration_order() {
        let mut r = registry();
        r.register("table", "csv", "json", tag("direct"));
        let path = r.resolve_path("table", "csv", "json").unwrap();
        assert_eq!(steps(&path), vec!["csv->json"]);
    }

    #[test]
    fn test_unsupported_stays_within_type() {
        let r = registry();
        let err = r.resolve_path("table", "csv", "secret").unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnsupportedConversion { ref data_type, ref from, ref to }
                if data_type == "table" && from == "csv" && to == "secret"
        ));
    }

    #[test]
    fn test_convert_applies_in_order() {
        let r = registry();
        let out = r.convert("table", "tsv", "csv", &Data::from("x")).unwrap();
        assert_eq!(out, Data::from("x>tsv-rows>rows-csv"));
    }

    #[test]
    fn test_failure_names_failing_hop() {
        let mut r = registry();
        r.register("table", "rows", "csv", |_: &Data| -> anyhow::Result<Data> { bail!("bad row") });
        let err = r.convert("table", "tsv", "csv", &Data::from("x")).unwrap_err();
        match err {
            EngineError::Conversion { from, to, reason, .. } => {
                assert_eq!(from, "rows");
                assert_eq!(to, "csv");
                assert!(reason.contains("bad row"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_formats_listing() {
        let r = registry();
        assert_eq!(r.formats("table"), vec!["csv", "rows", "tsv", "json", "matrix"]);
        assert_eq!(r.types(), vec!["table", "other"]);
    }

    #[test]
    fn test_shared_registry_publishes_new_snapshot() {
        let shared = SharedRegistry::new(registry());
        let before = shared.snapshot();
        shared.register("table", "json", "yaml", tag("json-yaml"));
        assert!(before.resolve_path("table", "csv", "yaml").is_err());
        assert_eq!(shared.snapshot().resolve_path("table", "csv", "yaml").unwrap().len(), 3);
    }
}
