//! Nexus
//!
//! Reads the `TAXA` and `TREES` blocks: taxon labels, the `TRANSLATE` table
//! and the first `TREE` statement, whose Newick body refers to taxa through
//! translate tokens. Writing regenerates both blocks: declared taxa keep
//! their order and leaves missing from them are appended in leaf order.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};

use crate::domain::data::Data;
use crate::domain::tree::{Clade, NestedTree};
use crate::formats::newick;
use crate::formats::{nested_data, nested_tree};

const HEADER: &str = "#NEXUS";
const GENERATED_NOTE: &str = "[Generated by arborist]";
const DEFAULT_TREE_NAME: &str = "UNTITLED";

/// A parsed Nexus document reduced to what the canonical tree needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NexusTree {
    pub taxa: Vec<String>,
    pub name: String,
    pub rooted: bool,
    pub clade: Clade,
}

pub fn parse(text: &str) -> Result<NexusTree> {
    let body = text.trim_start();
    let rest = match (body.get(..HEADER.len()), body.get(HEADER.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(HEADER) => rest,
        _ => bail!("missing #NEXUS header"),
    };

    let mut block: Option<String> = None;
    let mut taxa: Vec<String> = Vec::new();
    let mut declared_ntax: Option<usize> = None;
    let mut translate: HashMap<String, String> = HashMap::new();
    let mut tree_stmt: Option<String> = None;

    for command in split_commands(rest)? {
        let words = tokens(&command)?;
        let Some(keyword) = words.first().map(|w| w.to_ascii_uppercase()) else {
            continue;
        };
        match (keyword.as_str(), block.as_deref()) {
            ("BEGIN", _) => {
                block = words.get(1).map(|w| w.to_ascii_uppercase());
            }
            ("END" | "ENDBLOCK", _) => block = None,
            ("DIMENSIONS", Some("TAXA")) => {
                declared_ntax = Some(parse_ntax(&words)?);
            }
            ("TAXLABELS", Some("TAXA")) => {
                taxa = words[1..].to_vec();
            }
            ("TRANSLATE", Some("TREES")) => {
                translate = parse_translate(&words[1..])?;
            }
            ("TREE" | "UTREE", Some("TREES")) => {
                if tree_stmt.is_none() {
                    tree_stmt = Some(command.clone());
                }
            }
            _ => {}
        }
    }

    if let Some(ntax) = declared_ntax {
        if !taxa.is_empty() && ntax != taxa.len() {
            bail!("DIMENSIONS declares {} taxa but TAXLABELS lists {}", ntax, taxa.len());
        }
    }

    let stmt = tree_stmt.ok_or_else(|| anyhow!("no TREE statement in a TREES block"))?;
    let (name, rooted, newick_body) = split_tree_statement(&stmt)?;

    let resolve = |token: &str| -> Result<String> {
        if let Some(label) = translate.get(token) {
            return Ok(label.clone());
        }
        if taxa.iter().any(|t| t == token) {
            return Ok(token.to_string());
        }
        if translate.is_empty() {
            if let Ok(idx) = token.parse::<usize>() {
                if idx >= 1 && idx <= taxa.len() {
                    return Ok(taxa[idx - 1].clone());
                }
            }
            if taxa.is_empty() {
                return Ok(token.to_string());
            }
        }
        bail!("unresolved translate-table reference '{}'", token)
    };
    let clade = newick::parse_with(&format!("{};", newick_body), resolve)
        .context("invalid tree body")?;

    Ok(NexusTree {
        taxa,
        name,
        rooted,
        clade,
    })
}

pub fn write(tree: &NexusTree) -> Result<String> {
    let mut taxa: Vec<&str> = Vec::new();
    for name in tree.taxa.iter().map(String::as_str).chain(tree.clade.leaf_names()) {
        if name.is_empty() {
            bail!("every taxon needs a name to be written as Nexus");
        }
        if !taxa.contains(&name) {
            taxa.push(name);
        }
    }
    let numbers: HashMap<&str, usize> = taxa.iter().enumerate().map(|(i, t)| (*t, i + 1)).collect();

    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(GENERATED_NOTE);
    out.push_str("\n\n");

    out.push_str("BEGIN TAXA;\n");
    out.push_str(&format!("    DIMENSIONS NTAX = {};\n", taxa.len()));
    out.push_str("    TAXLABELS\n");
    for taxon in &taxa {
        out.push_str(&format!("        {}\n", newick::quote_label(taxon)));
    }
    out.push_str("    ;\n");
    out.push_str("END;\n");

    out.push_str("BEGIN TREES;\n");
    out.push_str("    TRANSLATE\n");
    for (i, taxon) in taxa.iter().enumerate() {
        let sep = if i + 1 == taxa.len() { "" } else { "," };
        out.push_str(&format!("        {}   {}{}\n", i + 1, newick::quote_label(taxon), sep));
    }
    out.push_str("    ;\n");
    let body = newick::write_with(&tree.clade, |name| {
        numbers
            .get(name)
            .map(|n| n.to_string())
            .unwrap_or_else(|| name.to_string())
    });
    let flag = if tree.rooted { "[&R]" } else { "[&U]" };
    out.push_str(&format!(
        "    TREE * {} = {} {}\n",
        newick::quote_label(&tree.name),
        flag,
        body
    ));
    out.push_str("END;\n");
    Ok(out)
}

/// Split into `;`-terminated commands. Quotes are kept, bracket comments
/// are dropped unless they start with `&`.
fn split_commands(text: &str) -> Result<Vec<String>> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                current.push(c);
                loop {
                    match chars.next() {
                        None => bail!("unterminated quoted token"),
                        Some('\'') => {
                            current.push('\'');
                            if chars.peek() == Some(&'\'') {
                                current.push('\'');
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        Some(other) => current.push(other),
                    }
                }
            }
            '[' => {
                let mut comment = String::from("[");
                let mut closed = false;
                for inner in chars.by_ref() {
                    comment.push(inner);
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    bail!("unterminated comment");
                }
                if comment.starts_with("[&") {
                    current.push_str(&comment);
                } else {
                    current.push(' ');
                }
            }
            ';' => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    commands.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        bail!("unterminated command '{}'", current.trim());
    }
    Ok(commands)
}

/// Whitespace-separated words; `,` and `=` stand alone; quotes unwrap.
fn tokens(command: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut chars = command.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == ',' || c == '=' {
            out.push(c.to_string());
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut word = String::new();
            loop {
                match chars.next() {
                    None => bail!("unterminated quoted token"),
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        word.push('\'');
                        chars.next();
                    }
                    Some('\'') => break,
                    Some(other) => word.push(other),
                }
            }
            out.push(word);
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == ',' || c == '=' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            out.push(word);
        }
    }
    Ok(out)
}

fn parse_ntax(words: &[String]) -> Result<usize> {
    for (i, word) in words.iter().enumerate() {
        if word.eq_ignore_ascii_case("NTAX") {
            let value = match words.get(i + 1).map(String::as_str) {
                Some("=") => words.get(i + 2),
                _ => None,
            };
            return value
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow!("malformed NTAX in DIMENSIONS"));
        }
    }
    bail!("DIMENSIONS without NTAX")
}

fn parse_translate(words: &[String]) -> Result<HashMap<String, String>> {
    let mut table = HashMap::new();
    for entry in words.split(|w| w == ",") {
        match entry {
            [] => {}
            [token, label] => {
                if table.insert(token.clone(), label.clone()).is_some() {
                    bail!("translate token '{}' is defined twice", token);
                }
            }
            other => bail!("malformed TRANSLATE entry '{}'", other.join(" ")),
        }
    }
    Ok(table)
}

/// `TREE [*] name = [&R|&U] body` -> (name, rooted, body)
fn split_tree_statement(stmt: &str) -> Result<(String, bool, String)> {
    let eq = find_outside_quotes(stmt, '=').ok_or_else(|| anyhow!("TREE statement without '='"))?;
    let head = tokens(&stmt[..eq])?;
    let name = head
        .iter()
        .skip(1)
        .find(|w| w.as_str() != "*")
        .cloned()
        .unwrap_or_else(|| DEFAULT_TREE_NAME.to_string());

    let mut rest = stmt[eq + 1..].trim_start();
    let mut rooted = true;
    while rest.starts_with("[&") {
        let close = rest.find(']').ok_or_else(|| anyhow!("unterminated tree flag"))?;
        let flag = &rest[2..close];
        if flag.eq_ignore_ascii_case("U") {
            rooted = false;
        } else if flag.eq_ignore_ascii_case("R") {
            rooted = true;
        }
        rest = rest[close + 1..].trim_start();
    }
    Ok((name, rooted, rest.to_string()))
}

fn find_outside_quotes(text: &str, target: char) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        if c == '\'' {
            quoted = !quoted;
        } else if c == target && !quoted {
            return Some(i);
        }
    }
    None
}

/// nexus -> nested
pub fn to_nested(data: &Data) -> Result<Data> {
    let text = data
        .as_text()
        .ok_or_else(|| anyhow!("expected Nexus text, got {}", data.kind()))?;
    let parsed = parse(text)?;
    let mut tree = NestedTree::from_clade(&parsed.clade);
    if !parsed.rooted {
        tree.rooted = Some(false);
    }
    Ok(nested_data(&tree))
}

/// nested -> nexus
pub fn from_nested(data: &Data) -> Result<Data> {
    let tree = nested_tree(data)?;
    let clade = tree.to_clade();
    let nexus = NexusTree {
        taxa: clade.leaf_names().iter().map(|s| s.to_string()).collect(),
        name: DEFAULT_TREE_NAME.to_string(),
        rooted: tree.is_rooted(),
        clade,
    };
    Ok(Data::Text(write(&nexus)?))
}
