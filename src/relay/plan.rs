//! Partitions one message into the ordered sends a destination receives.
//!
//! Order of the produced batches:
//! 1. the first batch: first text chunk, first `max_files` files, first `max_embeds` embeds
//! 2. one text-only batch per remaining text chunk
//! 3. files-only batches for the remaining files
//! 4. embeds-only batches for the remaining embeds
//!
//! Chunks made only of whitespace are not sent: the platform rejects them as
//! empty messages.

use tracing::debug;

use crate::relay::embed::BuiltEmbed;
use crate::relay::fetch::FetchedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_text: usize,
    pub max_files: usize,
    pub max_embeds: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_text: 2000,
            max_files: 10,
            max_embeds: 10,
        }
    }
}

/// One outbound send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub text: Option<String>,
    pub files: Vec<FetchedFile>,
    pub embeds: Vec<BuiltEmbed>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.files.is_empty() && self.embeds.is_empty()
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Pure length split: boundaries fall exactly every `max_chars` characters and
/// the chunks concatenate back to `text`. Empty input yields no chunks.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

pub fn plan_batches(
    content: &str,
    files: &[FetchedFile],
    embeds: &[BuiltEmbed],
    limits: Limits,
) -> Vec<Batch> {
    let max_files = limits.max_files.max(1);
    let max_embeds = limits.max_embeds.max(1);

    let mut chunks = split_text(content, limits.max_text)
        .into_iter()
        .enumerate()
        .filter_map(|(index, chunk)| {
            if chunk.trim().is_empty() {
                debug!(chunk = index, chars = chunk.chars().count(), "Skipping blank text chunk");
                None
            } else {
                Some(chunk)
            }
        });
    let mut file_groups = files.chunks(max_files);
    let mut embed_groups = embeds.chunks(max_embeds);

    let first = Batch {
        text: chunks.next(),
        files: file_groups.next().map(<[_]>::to_vec).unwrap_or_default(),
        embeds: embed_groups.next().map(<[_]>::to_vec).unwrap_or_default(),
    };
    if first.is_empty() {
        return Vec::new();
    }

    let mut batches = vec![first];
    batches.extend(chunks.map(|chunk| Batch {
        text: Some(chunk),
        ..Default::default()
    }));
    batches.extend(file_groups.map(|group| Batch {
        files: group.to_vec(),
        ..Default::default()
    }));
    batches.extend(embed_groups.map(|group| Batch {
        embeds: group.to_vec(),
        ..Default::default()
    }));

    batches
}
