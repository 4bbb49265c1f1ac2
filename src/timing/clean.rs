use super::{round_us, TimingConfig};
use crate::segment::{Segment, SegmentStore, Stage, WordTimestamp};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

fn leading_punct() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\s,.;:!?\-]+").expect("Invalid regex"))
}

fn space_before_punct() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+([,.;:!?])").expect("Invalid regex"))
}

fn trailing_punct() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s,;:]+$").expect("Invalid regex"))
}

/// Collapse whitespace and tidy punctuation at the edges.
pub fn normalize_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = leading_punct().replace(&collapsed, "");
    let text = space_before_punct().replace_all(&text, "$1");
    trailing_punct().replace(&text, "").into_owned()
}

/// Number of whitespace tokens containing at least one alphanumeric character.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .count()
}

/// Merge undersized segments, split oversized ones and normalize text.
///
/// Running the cleaner on its own output changes nothing but the generation.
pub fn clean_segments(store: SegmentStore, config: &TimingConfig) -> SegmentStore {
    let mut store = store;
    let input_len = store.len();

    for seg in store.segments.iter_mut() {
        normalize_segment(seg);
        seg.refresh_duration();
    }

    let merges = merge_undersized(&mut store.segments, config);

    let mut segments = Vec::with_capacity(store.len());
    let mut splits = 0;
    for seg in store.segments.drain(..).filter(|s| !s.removed) {
        let before = segments.len();
        split_recursive(seg, config, &mut segments);
        splits += segments.len() - before - 1;
    }

    for (index, seg) in segments.iter_mut().enumerate() {
        seg.id = index as u32;
        seg.needs_merge = false;
        seg.start_time = round_us(seg.start_time);
        seg.end_time = round_us(seg.end_time);
        seg.refresh_duration();
        normalize_segment(seg);
    }
    store.segments = segments;

    info!(
        "Cleaned {} segments into {} ({} merges, {} splits)",
        input_len,
        store.len(),
        merges,
        splits
    );

    store.advance(Stage::Cleaned)
}

fn normalize_segment(seg: &mut Segment) {
    seg.original_text = normalize_text(&seg.original_text);
    if !seg.translated_text.is_empty() {
        seg.translated_text = normalize_text(&seg.translated_text);
    }
}

fn is_undersized(seg: &Segment, config: &TimingConfig) -> bool {
    seg.needs_merge
        || seg.original_duration < config.min_duration
        || word_count(&seg.original_text) < config.min_words
}

fn join_text(first: &str, second: &str) -> String {
    normalize_text(&format!("{} {}", first, second))
}

/// Fold undersized segments into their shorter neighbour. Returns the merge count.
fn merge_undersized(segments: &mut [Segment], config: &TimingConfig) -> usize {
    let mut merges = 0;

    loop {
        let active: Vec<usize> = (0..segments.len()).filter(|&i| !segments[i].removed).collect();
        if active.len() <= 1 {
            break;
        }

        let Some(pos) = active.iter().position(|&i| is_undersized(&segments[i], config)) else {
            break;
        };

        let victim = active[pos];
        let prev = pos.checked_sub(1).map(|p| active[p]);
        let next = active.get(pos + 1).copied();

        let target = match (prev, next) {
            (Some(p), Some(n)) => {
                if segments[n].original_duration < segments[p].original_duration {
                    n
                } else {
                    p
                }
            }
            (Some(p), None) => p,
            (None, Some(n)) => n,
            (None, None) => break,
        };

        let absorbed = segments[victim].clone();
        debug!(
            "Merging segment {} ({:.3}s, {} words) into segment {}",
            absorbed.id,
            absorbed.original_duration,
            word_count(&absorbed.original_text),
            segments[target].id
        );

        let survivor = &mut segments[target];
        if target < victim {
            survivor.original_text = join_text(&survivor.original_text, &absorbed.original_text);
            survivor.translated_text = join_text(&survivor.translated_text, &absorbed.translated_text);
            survivor.words.extend(absorbed.words.iter().cloned());
        } else {
            survivor.original_text = join_text(&absorbed.original_text, &survivor.original_text);
            survivor.translated_text = join_text(&absorbed.translated_text, &survivor.translated_text);
            let mut words = absorbed.words.clone();
            words.append(&mut survivor.words);
            survivor.words = words;
        }
        survivor.start_time = survivor.start_time.min(absorbed.start_time);
        survivor.end_time = survivor.end_time.max(absorbed.end_time);
        survivor.refresh_duration();
        survivor.needs_merge = false;
        survivor.merged_from.push(absorbed.id);
        survivor.merged_from.extend(absorbed.merged_from.iter().copied());

        let victim_seg = &mut segments[victim];
        victim_seg.removed = true;
        victim_seg.needs_merge = false;
        merges += 1;
    }

    merges
}

fn is_oversized(seg: &Segment, config: &TimingConfig) -> bool {
    word_count(&seg.original_text) > config.max_words || seg.span() > config.max_duration
}

fn split_recursive(seg: Segment, config: &TimingConfig, out: &mut Vec<Segment>) {
    if !is_oversized(&seg, config) {
        out.push(seg);
        return;
    }

    match best_split(&seg, config) {
        Some((first, second)) => {
            debug!(
                "Split segment {} at {:.3}s",
                seg.id, first.end_time
            );
            split_recursive(first, config, out);
            split_recursive(second, config, out);
        }
        None => {
            debug!("Segment {} is oversized but has no valid split point", seg.id);
            out.push(seg);
        }
    }
}

/// Split at the word boundary closest to the temporal midpoint whose halves
/// both pass the merge thresholds.
fn best_split(seg: &Segment, config: &TimingConfig) -> Option<(Segment, Segment)> {
    if seg.words.len() < 2 {
        return None;
    }

    let midpoint = (seg.start_time + seg.end_time) / 2.0;
    let mut candidates: Vec<(usize, f64)> = (1..seg.words.len())
        .map(|k| (k, seg.words[k].start.clamp(seg.start_time, seg.end_time)))
        .collect();
    candidates.sort_by(|a, b| {
        (a.1 - midpoint)
            .abs()
            .total_cmp(&(b.1 - midpoint).abs())
            .then(a.0.cmp(&b.0))
    });

    candidates.into_iter().find_map(|(k, boundary)| {
        let (first, second) = split_at(seg, k, round_us(boundary));
        let acceptable = |s: &Segment| {
            s.span() >= config.min_duration && word_count(&s.original_text) >= config.min_words
        };
        (acceptable(&first) && acceptable(&second)).then_some((first, second))
    })
}

fn split_at(seg: &Segment, k: usize, boundary: f64) -> (Segment, Segment) {
    let tokens: Vec<&str> = seg.original_text.split_whitespace().collect();
    let (head_text, tail_text) = if tokens.len() == seg.words.len() {
        (tokens[..k].join(" "), tokens[k..].join(" "))
    } else {
        (words_text(&seg.words[..k]), words_text(&seg.words[k..]))
    };

    let mut first = seg.clone();
    first.end_time = boundary;
    first.original_text = normalize_text(&head_text);
    first.words = seg.words[..k].to_vec();
    first.refresh_duration();

    let mut second = seg.clone();
    second.start_time = boundary;
    second.original_text = normalize_text(&tail_text);
    second.words = seg.words[k..].to_vec();
    second.merged_from.clear();
    second.refresh_duration();

    // A translation cannot be split by word timing; it stays with the first half.
    second.translated_text.clear();

    (first, second)
}

fn words_text(words: &[WordTimestamp]) -> String {
    words
        .iter()
        .map(|w| w.word.trim())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_for(text: &str, start: f64, end: f64) -> Vec<WordTimestamp> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let step = (end - start) / tokens.len() as f64;
        tokens
            .iter()
            .enumerate()
            .map(|(i, w)| WordTimestamp {
                word: w.to_string(),
                start: start + step * i as f64,
                end: start + step * (i + 1) as f64,
            })
            .collect()
    }

    fn seg(id: u32, start: f64, end: f64, text: &str) -> Segment {
        Segment::new(id, start, end, text).with_words(words_for(text, start, end))
    }

    fn texts(store: &SegmentStore) -> Vec<&str> {
        store.segments.iter().map(|s| s.original_text.as_str()).collect()
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hello   world  "), "hello world");
        assert_eq!(normalize_text(", and then ."), "and then.");
        assert_eq!(normalize_text("wait , what ?"), "wait, what?");
        assert_eq!(normalize_text("so we go,"), "so we go");
        assert_eq!(normalize_text("list: a; b;"), "list: a; b");
        assert_eq!(normalize_text("... indeed!"), "indeed!");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_normalize_is_stable() {
        for text in ["- , hi , ;", "one  two .", "ok !?", " : x : "] {
            let once = normalize_text(text);
            assert_eq!(normalize_text(&once), once);
        }
    }

    #[test]
    fn test_word_count_ignores_punctuation_tokens() {
        assert_eq!(word_count("Hello - world !"), 2);
        assert_eq!(word_count("It's 5 o'clock"), 3);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_merge_into_shorter_neighbour() {
        let store = SegmentStore::new(vec![
            seg(0, 0.0, 5.0, "This is the first sentence here"),
            seg(1, 5.0, 5.3, "um"),
            seg(2, 5.3, 7.0, "And a short second one"),
        ]);

        let cleaned = clean_segments(store, &TimingConfig::default());

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned.segments[1].original_text, "um And a short second one");
        assert_eq!(cleaned.segments[1].start_time, 5.0);
        assert_eq!(cleaned.segments[1].merged_from, vec![1]);
        assert_eq!(cleaned.segments[1].id, 1);
        assert_eq!(cleaned.stage, Stage::Cleaned);
    }

    #[test]
    fn test_merge_tie_goes_to_previous() {
        let store = SegmentStore::new(vec![
            seg(0, 0.0, 2.0, "first words here"),
            seg(1, 2.0, 2.2, "uh"),
            seg(2, 2.2, 4.2, "last words here"),
        ]);

        let cleaned = clean_segments(store, &TimingConfig::default());

        assert_eq!(texts(&cleaned), vec!["first words here uh", "last words here"]);
        assert_eq!(cleaned.segments[0].end_time, 2.2);
    }

    #[test]
    fn test_flagged_segment_is_merged() {
        let mut flagged = seg(1, 3.0, 3.5, "quite enough words");
        flagged.needs_merge = true;
        let store = SegmentStore::new(vec![
            seg(0, 0.0, 3.0, "a first segment"),
            flagged,
            seg(2, 3.5, 9.0, "a third segment"),
        ]);

        let cleaned = clean_segments(store, &TimingConfig::default());
        assert_eq!(cleaned.len(), 2);
        assert!(cleaned.segments.iter().all(|s| !s.needs_merge && !s.removed));
    }

    #[test]
    fn test_single_undersized_segment_is_kept() {
        let store = SegmentStore::new(vec![seg(0, 0.0, 0.2, "hi")]);
        let cleaned = clean_segments(store, &TimingConfig::default());
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn test_split_long_segment_near_midpoint() {
        let config = TimingConfig {
            max_words: 6,
            ..Default::default()
        };
        let text = "one two three four five six seven eight";
        let store = SegmentStore::new(vec![seg(0, 0.0, 8.0, text)]);

        let cleaned = clean_segments(store, &config);

        assert_eq!(texts(&cleaned), vec!["one two three four", "five six seven eight"]);
        assert_eq!(cleaned.segments[0].end_time, 4.0);
        assert_eq!(cleaned.segments[1].start_time, 4.0);
        assert_eq!(cleaned.segments[1].id, 1);
    }

    #[test]
    fn test_split_by_duration_recurses() {
        let config = TimingConfig {
            max_duration: 3.0,
            ..Default::default()
        };
        let text = "a b c d e f g h i j k l";
        let store = SegmentStore::new(vec![seg(0, 0.0, 12.0, text)]);

        let cleaned = clean_segments(store, &config);

        assert!(cleaned.len() >= 4);
        assert!(cleaned.segments.iter().all(|s| s.span() <= 3.0));
        for pair in cleaned.segments.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
    }

    #[test]
    fn test_segment_without_words_is_not_split() {
        let config = TimingConfig {
            max_duration: 3.0,
            ..Default::default()
        };
        let store = SegmentStore::new(vec![Segment::new(0, 0.0, 10.0, "a long monologue without timing")]);

        let cleaned = clean_segments(store, &config);
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let config = TimingConfig {
            max_words: 5,
            max_duration: 6.0,
            ..Default::default()
        };
        let store = SegmentStore::new(vec![
            seg(0, 0.0, 0.3, ", so"),
            seg(1, 0.3, 4.0, "we went to the market ,"),
            seg(2, 4.0, 4.1, "and"),
            seg(3, 4.1, 14.0, "then we bought apples pears plums and a lot of cheese today"),
            seg(4, 14.0, 16.0, "Done ."),
        ]);

        let once = clean_segments(store, &config);
        let twice = clean_segments(once.clone(), &config);

        assert_eq!(once.segments, twice.segments);
        assert_eq!(twice.generation, once.generation + 1);
    }

    #[test]
    fn test_ids_are_dense_and_ordered() {
        let store = SegmentStore::new(vec![
            seg(7, 0.0, 2.0, "first segment text"),
            seg(9, 2.0, 2.1, "x"),
            seg(12, 2.1, 5.0, "third segment text"),
        ]);

        let cleaned = clean_segments(store, &TimingConfig::default());
        let ids: Vec<u32> = cleaned.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, (0..cleaned.len() as u32).collect::<Vec<_>>());
        for pair in cleaned.segments.windows(2) {
            assert!(pair[0].start_time <= pair[1].start_time);
        }
    }
}
