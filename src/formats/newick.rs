//! Newick
//!
//! `tree := subtree ";"`, `subtree := leaf | internal`,
//! `leaf := name? (":" length)?`,
//! `internal := "(" subtree ("," subtree)* ")" name? (":" length)?`.
//!
//! Labels may be single-quoted (`''` escapes a quote); `[...]` comments are
//! skipped. Lengths print in Rust's shortest round-trip decimal form, so
//! integral values come out bare (`2`, never `2.0`).

use anyhow::{anyhow, bail, Result};

use crate::domain::data::Data;
use crate::domain::tree::{check_depth, Clade};
use crate::formats::{nested_data, nested_tree};

const SPECIAL: &[char] = &['(', ')', '[', ']', '\'', ':', ';', ','];

/// Parse a Newick string.
pub fn parse(text: &str) -> Result<Clade> {
    parse_with(text, |label| Ok(label.to_string()))
}

/// Parse a Newick string, passing every leaf label through `leaf_label`.
pub fn parse_with<F>(text: &str, leaf_label: F) -> Result<Clade>
where
    F: Fn(&str) -> Result<String>,
{
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        leaf_label: &leaf_label,
    };
    parser.skip_blank();
    let mut root = parser.subtree(0)?;
    parser.skip_blank();
    if !parser.eat(';') {
        bail!("expected ';' at offset {}", parser.pos);
    }
    parser.skip_blank();
    if parser.pos != parser.chars.len() {
        bail!("unexpected text after ';' at offset {}", parser.pos);
    }
    // The root has no incoming edge.
    root.length = None;
    Ok(root)
}

/// Serialize a topology as Newick.
pub fn write(clade: &Clade) -> String {
    write_with(clade, |label| label.to_string())
}

/// Serialize, passing every leaf label through `leaf_label`.
pub fn write_with<F>(clade: &Clade, leaf_label: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut out = String::new();
    write_clade(clade, true, &leaf_label, &mut out);
    out.push(';');
    out
}

/// Minimal decimal form of a branch length.
pub fn format_length(length: f64) -> String {
    if length == 0.0 {
        // Also folds -0 into 0.
        "0".to_string()
    } else {
        format!("{}", length)
    }
}

pub fn quote_label(label: &str) -> String {
    if label.chars().any(|c| c.is_whitespace() || SPECIAL.contains(&c)) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

fn write_clade(clade: &Clade, is_root: bool, leaf_label: &dyn Fn(&str) -> String, out: &mut String) {
    if clade.is_leaf() {
        out.push_str(&quote_label(&leaf_label(&clade.name)));
    } else {
        out.push('(');
        for (i, child) in clade.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_clade(child, false, leaf_label, out);
        }
        out.push(')');
        out.push_str(&quote_label(&clade.name));
    }
    if !is_root {
        if let Some(length) = clade.length {
            out.push(':');
            out.push_str(&format_length(length));
        }
    }
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    leaf_label: &'a dyn Fn(&str) -> Result<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skip whitespace and bracketed comments.
    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('[') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == ']' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn subtree(&mut self, depth: usize) -> Result<Clade> {
        check_depth(depth).map_err(|e| anyhow!("{} at offset {}", e, self.pos))?;
        self.skip_blank();
        let mut children = Vec::new();
        if self.eat('(') {
            loop {
                children.push(self.subtree(depth + 1)?);
                self.skip_blank();
                if self.eat(',') {
                    continue;
                }
                if self.eat(')') {
                    break;
                }
                return Err(match self.peek() {
                    Some(';') | None => anyhow!(
                        "unbalanced parentheses: clade opened before offset {} is never closed",
                        self.pos
                    ),
                    Some(c) => anyhow!("expected ',' or ')' but found '{}' at offset {}", c, self.pos),
                });
            }
        }

        self.skip_blank();
        let label = self.label()?;
        let name = if children.is_empty() {
            (self.leaf_label)(&label)?
        } else {
            label
        };

        self.skip_blank();
        let length = if self.eat(':') {
            self.skip_blank();
            Some(self.length()?)
        } else {
            None
        };

        Ok(Clade {
            name,
            length,
            children,
        })
    }

    fn label(&mut self) -> Result<String> {
        let mut out = String::new();
        if self.eat('\'') {
            loop {
                match self.peek() {
                    None => bail!("unterminated quoted label"),
                    Some('\'') => {
                        self.pos += 1;
                        if self.eat('\'') {
                            out.push('\'');
                        } else {
                            return Ok(out);
                        }
                    }
                    Some(c) => {
                        out.push(c);
                        self.pos += 1;
                    }
                }
            }
        }
        while let Some(c) = self.peek() {
            if c.is_whitespace() || SPECIAL.contains(&c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        Ok(out)
    }

    fn length(&mut self) -> Result<f64> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        if token.is_empty() {
            bail!("missing branch length at offset {}", start);
        }
        let value: f64 = token
            .parse()
            .map_err(|_| anyhow!("invalid branch length '{}' at offset {}", token, start))?;
        if value < 0.0 {
            bail!("negative branch length {} at offset {}", token, start);
        }
        Ok(value)
    }
}

/// newick -> nested
pub fn to_nested(data: &Data) -> Result<Data> {
    let text = data
        .as_text()
        .ok_or_else(|| anyhow!("expected Newick text, got {}", data.kind()))?;
    let clade = parse(text)?;
    Ok(nested_data(&crate::domain::tree::NestedTree::from_clade(&clade)))
}

/// nested -> newick
pub fn from_nested(data: &Data) -> Result<Data> {
    let tree = nested_tree(data)?;
    Ok(Data::Text(write(&tree.to_clade())))
}
