//! Batch model-table parsing.
//!
//! One line per model: a short name, the model's base sector in hex, then any
//! number of `sector:label` animation pairs and an optional `blink:offset`
//! field. Space-delimited, `#` starts a comment line.
//!
//! ```text
//! hero   a10  a80:a a90:b blink:1f40
//! # sidekick has no animations ripped yet
//! npc01  b20
//! ```

use std::path::Path;

use anyhow::{anyhow, bail, Context};

/// Names are truncated to this on disc, so longer ones would collide.
pub const MAX_NAME_LEN: usize = 7;

/// One extraction job from the model table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    pub model_sector: u64,
    /// `(sector, label)` per animation set, in table order.
    pub animations: Vec<(u64, char)>,
    pub blink_offset: Option<u32>,
}

pub fn parse_model_table(path: &Path) -> anyhow::Result<Vec<TableEntry>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening model table {}", path.display()))?;
    let entries = parse_table_reader(file)
        .with_context(|| format!("parsing model table {}", path.display()))?;
    Ok(entries)
}

fn parse_table_reader<R: std::io::Read>(source: R) -> anyhow::Result<Vec<TableEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(source);

    let mut entries = vec![];
    for result in reader.records() {
        let record = result.context("reading table record")?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        // Runs of spaces produce empty fields with a single-byte delimiter.
        let fields: Vec<&str> = record.iter().filter(|f| !f.is_empty()).collect();
        if fields.is_empty() {
            continue;
        }
        entries.push(parse_entry(&fields).with_context(|| format!("table line {}", line))?);
    }
    Ok(entries)
}

fn parse_entry(fields: &[&str]) -> anyhow::Result<TableEntry> {
    let name = fields[0];
    if name.len() > MAX_NAME_LEN {
        bail!("name '{}' exceeds {} bytes", name, MAX_NAME_LEN);
    }
    let model_sector = fields
        .get(1)
        .ok_or_else(|| anyhow!("entry '{}' has no model sector", name))
        .and_then(|s| parse_hex(s))
        .with_context(|| format!("entry '{}' model sector", name))?;

    let mut animations = vec![];
    let mut blink_offset = None;
    for field in &fields[2..] {
        let (left, right) = field
            .split_once(':')
            .ok_or_else(|| anyhow!("expected 'sector:label' or 'blink:offset', got '{}'", field))?;
        if left == "blink" {
            if blink_offset.is_some() {
                bail!("entry '{}' has more than one blink offset", name);
            }
            let value =
                parse_hex(right).with_context(|| format!("entry '{}' blink offset", name))?;
            blink_offset = Some(u32::try_from(value).with_context(|| {
                format!(
                    "entry '{}' blink offset {:#x} does not fit in 32 bits",
                    name, value
                )
            })?);
            continue;
        }
        let sector =
            parse_hex(left).with_context(|| format!("entry '{}' animation sector", name))?;
        let mut labels = right.chars();
        let label = match (labels.next(), labels.next()) {
            (Some(c), None) if c.is_ascii_lowercase() => c,
            _ => bail!("animation label must be one lowercase letter, got '{}'", right),
        };
        animations.push((sector, label));
    }

    Ok(TableEntry {
        name: name.to_string(),
        model_sector,
        animations,
        blink_offset,
    })
}

fn parse_hex(s: &str) -> anyhow::Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("'{}' is not a hex number", s))
}
