//! Marshalling between engine values and R.
//!
//! Inputs are written into the driver as R source literals. After the
//! analysis runs, the driver dumps every visible global into a line
//! protocol that [`parse_dump`] reads back:
//!
//! ```text
//! @port "b"
//! @kind phylo
//! @nnode 2
//! @edge 4 5 2
//! @tip "ahli"
//! @end
//! ```
//!
//! Other kinds are `character`, `numeric`, `logical`, `raw` (one `@value`
//! line per element) and `unsupported <class>`.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use crate::domain::ape_tree::ApeTree;
use crate::domain::data::Data;

// ============================================================================
// Engine -> R
// ============================================================================

/// R source for a double-quoted string literal.
pub fn r_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn r_number(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "Inf" } else { "-Inf" }.to_string()
    } else {
        format!("{:?}", x)
    }
}

fn r_vector<T>(items: &[T], render: impl Fn(&T) -> String) -> String {
    let rendered: Vec<String> = items.iter().map(render).collect();
    format!("c({})", rendered.join(", "))
}

fn phylo_literal(tree: &ApeTree) -> String {
    let parents: Vec<usize> = tree.edge.iter().map(|(p, _)| *p).collect();
    let children: Vec<usize> = tree.edge.iter().map(|(_, c)| *c).collect();
    let mut ids = parents;
    ids.extend(children);

    let mut fields = vec![format!(
        "edge = matrix({}, ncol = 2L)",
        r_vector(&ids, |i| format!("{}L", i))
    )];
    if let Some(lengths) = &tree.edge_length {
        fields.push(format!("edge.length = {}", r_vector(lengths, |x| r_number(*x))));
    }
    fields.push(format!("tip.label = {}", r_vector(&tree.tip_label, |s| r_string(s))));
    fields.push(format!("Nnode = {}L", tree.n_node));
    if let Some(labels) = &tree.node_label {
        fields.push(format!("node.label = {}", r_vector(labels, |s| r_string(s))));
    }
    format!("structure(list({}), class = \"phylo\")", fields.join(", "))
}

fn json_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.as_f64().map(r_number).unwrap_or_else(|| "NA_real_".to_string()),
        Value::String(s) => r_string(s),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(json_literal).collect();
            format!("list({})", rendered.join(", "))
        }
        Value::Object(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{} = {}", r_string(k), json_literal(v)))
                .collect();
            format!("list({})", rendered.join(", "))
        }
    }
}

/// R source that evaluates to `data`.
pub fn to_r_literal(data: &Data) -> Result<String> {
    Ok(match data {
        Data::Text(s) => r_string(s),
        Data::Json(v) => json_literal(v),
        Data::Bytes(b) => format!("as.raw({})", r_vector(b, |x| format!("0x{:02x}", x))),
        Data::ApeTree(tree) => phylo_literal(tree),
        Data::GraphTree(_) => bail!("graph trees have no R representation; declare the port as r.apetree"),
    })
}

/// Statements that dump every visible global of the session to `path`.
pub fn dump_statements(path: &str) -> String {
    format!(
        r#"local({{
  out <- file({path}, open = "w", encoding = "UTF-8")
  on.exit(close(out))
  emit <- function(...) writeLines(paste0(...), out, useBytes = TRUE)
  quoted <- function(x) encodeString(x, quote = '"')
  for (name in ls(envir = globalenv())) {{
    value <- get(name, envir = globalenv())
    emit("@port ", quoted(name))
    if (inherits(value, "phylo")) {{
      emit("@kind phylo")
      emit("@nnode ", sprintf("%d", as.integer(value$Nnode)))
      lengths <- if (is.null(value$edge.length)) rep(NA_real_, nrow(value$edge)) else value$edge.length
      for (i in seq_len(nrow(value$edge))) {{
        emit("@edge ", sprintf("%d %d ", as.integer(value$edge[i, 1]), as.integer(value$edge[i, 2])), sprintf("%.17g", lengths[i]))
      }}
      for (tip in value$tip.label) emit("@tip ", quoted(tip))
      if (!is.null(value$node.label)) for (label in value$node.label) emit("@nodelabel ", quoted(label))
    }} else if (is.character(value)) {{
      emit("@kind character")
      for (v in value) emit("@value ", quoted(v))
    }} else if (is.numeric(value)) {{
      emit("@kind numeric")
      for (v in value) emit("@value ", sprintf("%.17g", as.double(v)))
    }} else if (is.logical(value)) {{
      emit("@kind logical")
      for (v in value) emit("@value ", if (is.na(v)) "NA" else if (v) "TRUE" else "FALSE")
    }} else if (is.raw(value)) {{
      emit("@kind raw")
      emit("@value ", paste(as.character(value), collapse = ""))
    }} else {{
      emit("@kind unsupported ", class(value)[1])
    }}
    emit("@end")
  }}
}})
"#,
        path = r_string(path)
    )
}

// ============================================================================
// R -> Engine
// ============================================================================

/// One global as reported by the dump.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    Phylo(ApeTree),
    Character(Vec<Option<String>>),
    Numeric(Vec<Option<f64>>),
    Logical(Vec<Option<bool>>),
    Raw(Vec<u8>),
    Unsupported(String),
}

impl RValue {
    /// Length-one character vectors become text, other vectors JSON.
    pub fn into_data(self) -> Result<Data> {
        match self {
            RValue::Phylo(tree) => Ok(Data::ApeTree(tree)),
            RValue::Character(mut values) if values.len() == 1 => match values.remove(0) {
                Some(s) => Ok(Data::Text(s)),
                None => bail!("value is NA"),
            },
            RValue::Character(values) => Ok(Data::Json(Value::Array(
                values.into_iter().map(|v| v.map(Value::String).unwrap_or(Value::Null)).collect(),
            ))),
            RValue::Numeric(values) => Ok(Data::Json(scalar_or_array(values, |x| {
                serde_json::Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
            }))),
            RValue::Logical(values) => Ok(Data::Json(scalar_or_array(values, Value::Bool))),
            RValue::Raw(bytes) => Ok(Data::Bytes(bytes)),
            RValue::Unsupported(class) => bail!("R values of class '{}' cannot be exported", class),
        }
    }
}

fn scalar_or_array<T>(values: Vec<Option<T>>, convert: impl Fn(T) -> Value) -> Value {
    let mut items: Vec<Value> = values
        .into_iter()
        .map(|v| v.map(&convert).unwrap_or(Value::Null))
        .collect();
    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

#[derive(Default)]
struct PhyloBuilder {
    n_node: usize,
    edge: Vec<(usize, usize)>,
    lengths: Vec<Option<f64>>,
    tips: Vec<String>,
    node_labels: Option<Vec<String>>,
}

impl PhyloBuilder {
    fn finish(self) -> Result<ApeTree> {
        let edge_length = if self.lengths.iter().all(Option::is_none) {
            None
        } else {
            let lengths: Option<Vec<f64>> = self.lengths.into_iter().collect();
            Some(lengths.ok_or_else(|| anyhow!("edge.length contains NA"))?)
        };
        Ok(ApeTree {
            edge: self.edge,
            edge_length,
            tip_label: self.tips,
            n_node: self.n_node,
            node_label: self.node_labels,
        })
    }
}

enum Pending {
    Phylo(PhyloBuilder),
    Character(Vec<Option<String>>),
    Numeric(Vec<Option<f64>>),
    Logical(Vec<Option<bool>>),
    Raw(Vec<u8>),
    Unsupported(String),
}

impl Pending {
    fn finish(self) -> Result<RValue> {
        Ok(match self {
            Pending::Phylo(b) => RValue::Phylo(b.finish()?),
            Pending::Character(v) => RValue::Character(v),
            Pending::Numeric(v) => RValue::Numeric(v),
            Pending::Logical(v) => RValue::Logical(v),
            Pending::Raw(v) => RValue::Raw(v),
            Pending::Unsupported(c) => RValue::Unsupported(c),
        })
    }
}

/// Parse the dump the driver writes after the analysis.
pub fn parse_dump(text: &str) -> Result<HashMap<String, RValue>> {
    let mut values = HashMap::new();
    let mut port: Option<String> = None;
    let mut pending: Option<Pending> = None;

    for (index, line) in text.lines().enumerate() {
        let lineno = index + 1;
        let (tag, rest) = line.split_once(' ').unwrap_or((line, ""));
        let context = || format!("dump line {}: {}", lineno, line);
        match tag {
            "@port" => {
                if port.is_some() {
                    bail!("dump line {}: port started before @end", lineno);
                }
                port = Some(unquote(rest).with_context(context)?);
            }
            "@kind" => {
                let (kind, class) = rest.split_once(' ').unwrap_or((rest, ""));
                pending = Some(match kind {
                    "phylo" => Pending::Phylo(PhyloBuilder::default()),
                    "character" => Pending::Character(Vec::new()),
                    "numeric" => Pending::Numeric(Vec::new()),
                    "logical" => Pending::Logical(Vec::new()),
                    "raw" => Pending::Raw(Vec::new()),
                    "unsupported" => Pending::Unsupported(class.to_string()),
                    other => bail!("dump line {}: unknown kind '{}'", lineno, other),
                });
            }
            "@end" => {
                let name = port.take().ok_or_else(|| anyhow!("dump line {}: @end without @port", lineno))?;
                let value = pending
                    .take()
                    .ok_or_else(|| anyhow!("dump line {}: port '{}' has no kind", lineno, name))?;
                values.insert(name, value.finish().with_context(context)?);
            }
            _ => match pending.as_mut() {
                Some(p) => apply_line(p, tag, rest).with_context(context)?,
                None => bail!("dump line {}: '{}' outside a port", lineno, tag),
            },
        }
    }

    if let Some(name) = port {
        bail!("dump ended inside port '{}'", name);
    }
    Ok(values)
}

fn apply_line(pending: &mut Pending, tag: &str, rest: &str) -> Result<()> {
    match (pending, tag) {
        (Pending::Phylo(b), "@nnode") => b.n_node = rest.trim().parse()?,
        (Pending::Phylo(b), "@edge") => {
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let [parent, child, length] = fields.as_slice() else {
                bail!("expected 'parent child length'");
            };
            b.edge.push((parent.parse()?, child.parse()?));
            b.lengths.push(parse_double(length)?);
        }
        (Pending::Phylo(b), "@tip") => b.tips.push(unquote(rest)?),
        (Pending::Phylo(b), "@nodelabel") => {
            let label = if rest == "NA" { String::new() } else { unquote(rest)? };
            b.node_labels.get_or_insert_with(Vec::new).push(label);
        }
        (Pending::Character(v), "@value") => v.push(if rest == "NA" { None } else { Some(unquote(rest)?) }),
        (Pending::Numeric(v), "@value") => v.push(parse_double(rest)?),
        (Pending::Logical(v), "@value") => v.push(match rest {
            "TRUE" => Some(true),
            "FALSE" => Some(false),
            "NA" => None,
            other => bail!("invalid logical '{}'", other),
        }),
        (Pending::Raw(v), "@value") => *v = decode_hex(rest.trim())?,
        (_, other) => bail!("unexpected '{}'", other),
    }
    Ok(())
}

fn parse_double(token: &str) -> Result<Option<f64>> {
    Ok(match token.trim() {
        "NA" => None,
        "NaN" => Some(f64::NAN),
        "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => Some(other.parse().map_err(|_| anyhow!("invalid number '{}'", other))?),
    })
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        bail!("odd-length hex string");
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            let pair = text.get(i..i + 2).ok_or_else(|| anyhow!("invalid hex string"))?;
            u8::from_str_radix(pair, 16).map_err(|_| anyhow!("invalid hex byte '{}'", pair))
        })
        .collect()
}

/// Undo `encodeString(x, quote = '"')`.
fn unquote(token: &str) -> Result<String> {
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| anyhow!("expected a quoted string, got {}", token))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = chars.next().ok_or_else(|| anyhow!("dangling backslash"))?;
        match escaped {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '"' | '\'' => out.push(escaped),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(code_point(&hex)?);
            }
            'u' | 'U' => {
                let rest = chars.as_str();
                let (hex, consumed) = if let Some(braced) = rest.strip_prefix('{') {
                    let end = braced.find('}').ok_or_else(|| anyhow!("unterminated \\u{{ escape"))?;
                    (braced[..end].to_string(), end + 2)
                } else {
                    let width = if escaped == 'u' { 4 } else { 8 };
                    let hex: String = rest.chars().take_while(|c| c.is_ascii_hexdigit()).take(width).collect();
                    let len = hex.len();
                    (hex, len)
                };
                out.push(code_point(&hex)?);
                for _ in 0..consumed {
                    chars.next();
                }
            }
            other => bail!("unknown escape '\\{}'", other),
        }
    }
    Ok(out)
}

fn code_point(hex: &str) -> Result<char> {
    let value = u32::from_str_radix(hex, 16).map_err(|_| anyhow!("invalid escape digits '{}'", hex))?;
    char::from_u32(value).ok_or_else(|| anyhow!("invalid code point {:x}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Clade;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn anoles() -> ApeTree {
        ApeTree::from_clade(&Clade::internal(
            None,
            vec![
                Clade::internal(Some(2.0), vec![Clade::leaf("ahli", 0.0), Clade::leaf("allogus", 1.0)]),
                Clade::leaf("rubribarbus", 3.0),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(r_string("plain"), "\"plain\"");
        assert_eq!(r_string("a\"b\\c\nd"), "\"a\\\"b\\\\c\\nd\"");
        assert_eq!(r_string("\u{1}"), "\"\\u{1}\"");
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(r_number(2.0), "2.0");
        assert_eq!(r_number(0.1), "0.1");
        assert_eq!(r_number(f64::INFINITY), "Inf");
        assert_eq!(r_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_phylo_literal() {
        let literal = to_r_literal(&Data::ApeTree(anoles())).unwrap();
        assert_eq!(
            literal,
            "structure(list(edge = matrix(c(4L, 5L, 5L, 4L, 5L, 1L, 2L, 3L), ncol = 2L), \
             edge.length = c(2.0, 0.0, 1.0, 3.0), \
             tip.label = c(\"ahli\", \"allogus\", \"rubribarbus\"), Nnode = 2L), class = \"phylo\")"
        );
    }

    #[test]
    fn test_other_literals() {
        assert_eq!(to_r_literal(&Data::Bytes(vec![0, 255])).unwrap(), "as.raw(c(0x00, 0xff))");
        assert_eq!(
            to_r_literal(&Data::Json(json!({"k": [1, true, null]}))).unwrap(),
            "list(\"k\" = list(1.0, TRUE, NULL))"
        );
        assert!(to_r_literal(&Data::GraphTree(Default::default())).is_err());
    }

    #[test]
    fn test_parse_phylo_dump() {
        let dump = "@port \"b\"\n@kind phylo\n@nnode 2\n\
                    @edge 4 5 2\n@edge 5 1 0\n@edge 5 2 1\n@edge 4 3 3\n\
                    @tip \"ahli\"\n@tip \"allogus\"\n@tip \"rubribarbus\"\n@end\n";
        let mut values = parse_dump(dump).unwrap();
        let value = values.remove("b").unwrap();
        assert_eq!(value, RValue::Phylo(anoles()));
    }

    #[test]
    fn test_parse_vectors() {
        let dump = "@port \"s\"\n@kind character\n@value \"tab\\there \\\"q\\\" \\u00e9\"\n@end\n\
                    @port \"xs\"\n@kind numeric\n@value 1\n@value NA\n@value 0.10000000000000001\n@end\n\
                    @port \"flag\"\n@kind logical\n@value TRUE\n@end\n\
                    @port \"blob\"\n@kind raw\n@value 00ff10\n@end\n\
                    @port \"f\"\n@kind unsupported function\n@end\n";
        let mut values = parse_dump(dump).unwrap();
        assert_eq!(
            values.remove("s").unwrap().into_data().unwrap(),
            Data::from("tab\there \"q\" é")
        );
        assert_eq!(
            values.remove("xs").unwrap().into_data().unwrap(),
            Data::Json(json!([1.0, null, 0.1]))
        );
        assert_eq!(values.remove("flag").unwrap().into_data().unwrap(), Data::Json(json!(true)));
        assert_eq!(values.remove("blob").unwrap().into_data().unwrap(), Data::Bytes(vec![0, 255, 16]));
        assert!(values.remove("f").unwrap().into_data().is_err());
    }

    #[test]
    fn test_malformed_dumps() {
        assert!(parse_dump("@port \"a\"\n@kind numeric\n").is_err());
        assert!(parse_dump("@kind numeric\n@end\n").is_err());
        assert!(parse_dump("@port \"a\"\n@kind phylo\n@edge 1 2\n@end\n").is_err());
        assert!(parse_dump("@port a\n@end\n").is_err());
    }
}
