//! Block-wise three-way body merge.
//!
//! Bodies are split into blocks delimited by top-level ATX heading lines
//! (heading lines inside fenced code are not boundaries); the text before
//! the first heading forms the preamble block. Each block merges
//! independently: agreement passes through, a one-sided change wins, and a
//! both-sided change either resolves via the prefix-containment heuristic
//! (one side's content is a strict prefix of the other, ignoring trailing
//! whitespace — take the longer version, which handles append-mostly
//! journals) or becomes an unresolved hunk.

use std::collections::{HashMap, HashSet};

/// An unresolved pair of competing contents within merged output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// Byte offset of the hunk region (including markers) in the merged
    /// output.
    pub start: usize,
    /// Byte offset one past the hunk region.
    pub end: usize,
    /// The source side's content (empty when the source deleted the block).
    pub source: String,
    /// The destination side's content (empty when the destination deleted
    /// the block).
    pub dest: String,
}

/// Merge `source` and `dest` bodies against `base`, labeling hunk markers
/// with the two vault ids. Returns the merged body and its hunks.
#[must_use]
pub fn merge_bodies(
    base: &str,
    source: &str,
    dest: &str,
    source_label: &str,
    dest_label: &str,
) -> (String, Vec<Hunk>) {
    let base_doc = split_blocks(base);
    let source_doc = split_blocks(source);
    let dest_doc = split_blocks(dest);

    let source_map: HashMap<&BlockKey, &Block> =
        source_doc.blocks.iter().map(|b| (&b.key, b)).collect();
    let dest_map: HashMap<&BlockKey, &Block> =
        dest_doc.blocks.iter().map(|b| (&b.key, b)).collect();
    let base_keys: HashSet<&BlockKey> = base_doc.blocks.iter().map(|b| &b.key).collect();

    let mut pieces: Vec<Piece> = Vec::new();

    // Preamble: always merged positionally, treating absence as empty.
    pieces.push(three_way(
        &base_doc.preamble,
        &source_doc.preamble,
        &dest_doc.preamble,
    ));

    // Blocks present in base, in base order.
    for block in &base_doc.blocks {
        let s = source_map.get(&block.key).copied();
        let d = dest_map.get(&block.key).copied();
        match (s, d) {
            (None, None) => {}
            (Some(s), Some(d)) => pieces.push(three_way(&block.text, &s.text, &d.text)),
            (Some(s), None) => {
                if s.text != block.text {
                    pieces.push(Piece::Conflict {
                        source: s.text.clone(),
                        dest: String::new(),
                    });
                }
            }
            (None, Some(d)) => {
                if d.text != block.text {
                    pieces.push(Piece::Conflict {
                        source: String::new(),
                        dest: d.text.clone(),
                    });
                }
            }
        }
    }

    // Blocks added on the source side, in source order; added-in-both
    // collapse when identical.
    for block in &source_doc.blocks {
        if base_keys.contains(&block.key) {
            continue;
        }
        match dest_map.get(&block.key) {
            Some(d) if d.text == block.text => pieces.push(Piece::Text(block.text.clone())),
            Some(d) => pieces.push(match prefix_resolution(&block.text, &d.text) {
                Some(longer) => Piece::Text(longer.to_owned()),
                None => Piece::Conflict {
                    source: block.text.clone(),
                    dest: d.text.clone(),
                },
            }),
            None => pieces.push(Piece::Text(block.text.clone())),
        }
    }

    // Blocks added on the destination side only, in destination order.
    for block in &dest_doc.blocks {
        if base_keys.contains(&block.key) || source_map.contains_key(&block.key) {
            continue;
        }
        pieces.push(Piece::Text(block.text.clone()));
    }

    render(pieces, source_label, dest_label)
}

// ---------------------------------------------------------------------------
// Block model
// ---------------------------------------------------------------------------

/// A headed block's identity: the heading line plus its occurrence index
/// (so repeated headings stay distinct).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BlockKey {
    heading: String,
    occurrence: usize,
}

#[derive(Clone, Debug)]
struct Block {
    key: BlockKey,
    text: String,
}

#[derive(Clone, Debug, Default)]
struct SplitBody {
    preamble: String,
    blocks: Vec<Block>,
}

/// Split a body at top-level heading lines, preserving each block's text
/// verbatim (concatenating preamble and blocks reproduces the input).
fn split_blocks(body: &str) -> SplitBody {
    let mut out = SplitBody::default();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut current: Option<Block> = None;
    let mut in_fence = false;

    for line in split_lines_inclusive(body) {
        let stripped = line.trim_end_matches('\n');
        if stripped.starts_with("```") || stripped.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if !in_fence && is_atx_heading(stripped) {
            if let Some(block) = current.take() {
                out.blocks.push(block);
            }
            let occurrence = *counts
                .entry(stripped.to_owned())
                .and_modify(|c| *c += 1)
                .or_insert(0);
            current = Some(Block {
                key: BlockKey {
                    heading: stripped.to_owned(),
                    occurrence,
                },
                text: line.to_owned(),
            });
        } else if let Some(block) = &mut current {
            block.text.push_str(line);
        } else {
            out.preamble.push_str(line);
        }
    }
    if let Some(block) = current {
        out.blocks.push(block);
    }
    out
}

fn split_lines_inclusive(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n')
}

fn is_atx_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

// ---------------------------------------------------------------------------
// Per-block resolution
// ---------------------------------------------------------------------------

enum Piece {
    Text(String),
    Conflict { source: String, dest: String },
}

fn three_way(base: &str, source: &str, dest: &str) -> Piece {
    if source == dest {
        return Piece::Text(source.to_owned());
    }
    if source == base {
        return Piece::Text(dest.to_owned());
    }
    if dest == base {
        return Piece::Text(source.to_owned());
    }
    match prefix_resolution(source, dest) {
        Some(longer) => Piece::Text(longer.to_owned()),
        None => Piece::Conflict {
            source: source.to_owned(),
            dest: dest.to_owned(),
        },
    }
}

/// The prefix containment heuristic: ignoring trailing whitespace, if one
/// side is a strict prefix of the other, return the longer side.
fn prefix_resolution<'a>(source: &'a str, dest: &'a str) -> Option<&'a str> {
    let s = source.trim_end();
    let d = dest.trim_end();
    if s == d {
        return Some(if source.len() >= dest.len() { source } else { dest });
    }
    if d.starts_with(s) {
        Some(dest)
    } else if s.starts_with(d) {
        Some(source)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(pieces: Vec<Piece>, source_label: &str, dest_label: &str) -> (String, Vec<Hunk>) {
    let mut out = String::new();
    let mut hunks = Vec::new();

    for piece in pieces {
        match piece {
            Piece::Text(text) => out.push_str(&text),
            Piece::Conflict { source, dest } => {
                let start = out.len();
                out.push_str("<<<<<<< ");
                out.push_str(source_label);
                out.push('\n');
                push_block(&mut out, &source);
                out.push_str("=======\n");
                push_block(&mut out, &dest);
                out.push_str(">>>>>>> ");
                out.push_str(dest_label);
                out.push('\n');
                let end = out.len();
                hunks.push(Hunk {
                    start,
                    end,
                    source,
                    dest,
                });
            }
        }
    }
    (out, hunks)
}

fn push_block(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
