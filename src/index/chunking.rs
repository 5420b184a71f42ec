use crate::model::SchemaChunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

// Split preference, strongest first: blank line, line break, word break.
const BREAK_SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Splits `text` into ordered chunks of at most `chunk_size` characters where
/// each chunk repeats at most `overlap` trailing characters of its
/// predecessor. Chunks are exact substrings, so the source can be rebuilt
/// from them.
pub fn split_schema_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<SchemaChunk> {
    let chars = text.chars().collect::<Vec<char>>();
    if chars.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let total = chars.len();

    let mut chunks = Vec::<SchemaChunk>::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            preferred_break(&chars, start + overlap + 1, hard_end).unwrap_or(hard_end)
        };

        chunks.push(SchemaChunk {
            ordinal: chunks.len(),
            start,
            text: chars[start..end].iter().collect(),
        });

        if end == total {
            break;
        }

        start = overlap_start(&chars, end - overlap, end);
    }

    chunks
}

/// Rebuilds the source text from chunks produced by [`split_schema_text`].
#[cfg(test)]
pub fn reconstruct_text(chunks: &[SchemaChunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end());
    }

    out
}

/// Last position in `(lower, upper]` that sits just after a separator.
fn preferred_break(chars: &[char], lower: usize, upper: usize) -> Option<usize> {
    if lower > upper {
        return None;
    }

    for separator in BREAK_SEPARATORS {
        let pattern = separator.chars().collect::<Vec<char>>();
        let width = pattern.len();
        let mut cut = upper;
        while cut >= lower.max(width) {
            if chars[cut - width..cut] == pattern[..] {
                return Some(cut);
            }
            cut -= 1;
        }
    }

    None
}

/// Earliest line start (then word start) in `[lower, end)`; keeps the overlap
/// from beginning mid-identifier.
fn overlap_start(chars: &[char], lower: usize, end: usize) -> usize {
    for boundary in ['\n', ' '] {
        if let Some(position) = (lower.max(1)..end).find(|&position| chars[position - 1] == boundary)
        {
            return position;
        }
    }
    lower
}
