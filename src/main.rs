// Command-line entry point for arborist.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arborist::domain::ape_tree::ApeTree;
use arborist::domain::graph_tree::GraphTree;
use arborist::formats::{APETREE, NESTED, TREESTORE, VTKTREE};
use arborist::infrastructure::EngineConfig;
use arborist::{AnalysisSpec, Binding, Data, Engine, ExecutionMode, Inputs, OutputRequest, OutputRequests};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an analysis definition (JSON) against input files
    Run {
        /// Analysis definition file
        #[arg(short, long)]
        analysis: PathBuf,

        /// Input binding, NAME=FORMAT:PATH (repeatable)
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// Requested output format, NAME=FORMAT (repeatable)
        #[arg(short, long = "output")]
        outputs: Vec<String>,

        /// Script timeout in seconds; overrides the configuration
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Convert a value between two formats of a type
    Convert {
        /// Data type
        #[arg(short = 't', long = "type", default_value = "tree")]
        data_type: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Input file; stdin when absent
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file; stdout when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List registered formats and converters
    Formats {
        #[arg(short = 't', long = "type")]
        data_type: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("ARBORIST_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("Cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let engine = Engine::new(config);

    match cli.command {
        Command::Run {
            analysis,
            inputs,
            outputs,
            timeout,
        } => run(&engine, &analysis, &inputs, &outputs, timeout),
        Command::Convert {
            data_type,
            from,
            to,
            input,
            output,
        } => {
            let bytes = read_source(input.as_deref())?;
            let binding = Binding::new(&from, decode(&from, bytes)?);
            let converted = engine.convert(&data_type, &binding, &OutputRequest::new(&to))?;
            write_sink(output.as_deref(), &encode(&converted.data)?)
        }
        Command::Formats { data_type } => {
            let registry = engine.registry();
            let types: Vec<&str> = match &data_type {
                Some(t) => vec![t.as_str()],
                None => registry.types(),
            };
            for t in types {
                let canonical = registry.canonical_format(t).unwrap_or("-");
                println!("{} (canonical: {})", t, canonical);
                for format in registry.formats(t) {
                    println!("    {}", format);
                }
                for c in registry.converters().iter().filter(|c| c.data_type == t) {
                    println!("    {} -> {}", c.from, c.to);
                }
            }
            println!("runtimes:");
            for mode in ExecutionMode::all() {
                println!("    {} ({}): {}", mode.tag(), mode.name(), mode.install_instructions());
            }
            Ok(())
        }
    }
}

fn run(engine: &Engine, analysis: &Path, inputs: &[String], outputs: &[String], timeout: Option<f64>) -> Result<()> {
    let text = fs::read_to_string(analysis).with_context(|| format!("Cannot read {}", analysis.display()))?;
    let spec = AnalysisSpec::from_json(&text)?;

    let mut bindings = Inputs::new();
    for arg in inputs {
        let (name, rest) = split_assignment(arg)?;
        let (format, path) = rest
            .split_once(':')
            .ok_or_else(|| anyhow!("input '{}' must look like NAME=FORMAT:PATH", arg))?;
        let bytes = read_source(Some(Path::new(path)))?;
        bindings.insert(name.to_string(), Binding::new(format, decode(format, bytes)?));
    }

    let mut requests = OutputRequests::new();
    for arg in outputs {
        let (name, format) = split_assignment(arg)?;
        requests.insert(name.to_string(), OutputRequest::new(format));
    }

    let timeout = timeout
        .map(|secs| Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid --timeout {}: {}", secs, e)))
        .transpose()?;
    let result = engine.run_with_timeout(&spec, &bindings, &requests, timeout)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn split_assignment(arg: &str) -> Result<(&str, &str)> {
    match arg.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok((name, value)),
        _ => bail!("expected NAME=VALUE, got '{}'", arg),
    }
}

fn read_source(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(p) => fs::read(p).with_context(|| format!("Cannot read {}", p.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).context("Cannot read stdin")?;
            Ok(buf)
        }
    }
}

fn write_sink(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(p) => fs::write(p, bytes).with_context(|| format!("Cannot write {}", p.display())),
        None => {
            io::stdout().write_all(bytes).context("Cannot write stdout")?;
            Ok(())
        }
    }
}

/// Interpret file contents according to the format's carrier.
fn decode(format: &str, bytes: Vec<u8>) -> Result<Data> {
    Ok(match format {
        TREESTORE => Data::Bytes(bytes),
        NESTED => Data::Json(serde_json::from_slice(&bytes).context("Invalid JSON")?),
        VTKTREE => Data::GraphTree(serde_json::from_slice::<GraphTree>(&bytes).context("Invalid graph tree JSON")?),
        APETREE => Data::ApeTree(serde_json::from_slice::<ApeTree>(&bytes).context("Invalid phylo JSON")?),
        _ => Data::Text(String::from_utf8(bytes).context("Input is not UTF-8 text")?),
    })
}

fn encode(data: &Data) -> Result<Vec<u8>> {
    Ok(match data {
        Data::Text(s) => s.clone().into_bytes(),
        Data::Bytes(b) => b.clone(),
        other => {
            let mut json = serde_json::to_vec_pretty(other)?;
            json.push(b'\n');
            json
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("a=newick:tree.nwk").unwrap(), ("a", "newick:tree.nwk"));
        assert!(split_assignment("a").is_err());
        assert!(split_assignment("=newick").is_err());
    }

    #[test]
    fn test_decode_by_format() {
        assert_eq!(decode("newick", b"(a,b);".to_vec()).unwrap(), Data::from("(a,b);"));
        assert_eq!(decode(TREESTORE, vec![1, 2]).unwrap(), Data::Bytes(vec![1, 2]));
        assert!(matches!(decode(NESTED, b"{}".to_vec()).unwrap(), Data::Json(_)));
        assert!(decode(NESTED, b"not json".to_vec()).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["arborist", "convert", "--from", "newick", "--to", "nexus"]);
        assert!(matches!(cli.command, Command::Convert { ref data_type, .. } if data_type == "tree"));
    }
}
