//! 按行切分文本，并保证每个片段的token数不超过上限
use std::sync::Arc;

use tiktoken_rs::{cl100k_base, CoreBPE};

use super::Error;

/// 按行打包文本片段。超长的行在单词边界处截断，
/// 新片段以前一片段末尾的若干单词开头。
pub struct LineSplitter {
    tokenizer: Arc<CoreBPE>,
    max_segment_tokens: usize,
    max_overlap_tokens: usize,
}

// 切分的最小单元：一段文本，以及它与前文之间的分隔符
struct Unit {
    text: String,
    separator: &'static str,
}

impl LineSplitter {
    pub fn new(max_segment_tokens: usize, max_overlap_tokens: usize) -> Result<Self, Error> {
        let tokenizer = cl100k_base().map_err(|e| Error::Tokenizer(e.to_string()))?;
        Ok(Self::with_tokenizer(
            Arc::new(tokenizer),
            max_segment_tokens,
            max_overlap_tokens,
        ))
    }

    pub fn with_tokenizer(
        tokenizer: Arc<CoreBPE>,
        max_segment_tokens: usize,
        max_overlap_tokens: usize,
    ) -> Self {
        Self {
            tokenizer,
            max_segment_tokens: max_segment_tokens.max(1),
            max_overlap_tokens,
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.encode_with_special_tokens(text).len()
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let units = self.units(text);
        let mut segments: Vec<String> = Vec::new();
        let mut current = String::new();

        for unit in units {
            if current.is_empty() {
                current = unit.text;
                continue;
            }
            let candidate = format!("{current}{}{}", unit.separator, unit.text);
            if self.count_tokens(&candidate) <= self.max_segment_tokens {
                current = candidate;
                continue;
            }

            // 当前片段已满，以重叠部分开启新片段
            let overlap = self.overlap_of(&current, &unit);
            segments.push(std::mem::take(&mut current));
            current = match overlap {
                Some(o) => format!("{o}{}{}", unit.separator, unit.text),
                None => unit.text,
            };
        }
        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }

    // 取前一片段末尾的单词作为重叠，且加上新单元后仍不超过上限
    fn overlap_of(&self, previous: &str, unit: &Unit) -> Option<String> {
        if self.max_overlap_tokens == 0 {
            return None;
        }
        let words: Vec<&str> = previous.split_whitespace().collect();
        let mut best: Option<String> = None;
        for start in (0..words.len()).rev() {
            let overlap = words[start..].join(" ");
            if self.count_tokens(&overlap) > self.max_overlap_tokens {
                break;
            }
            let candidate = format!("{overlap}{}{}", unit.separator, unit.text);
            if self.count_tokens(&candidate) > self.max_segment_tokens {
                break;
            }
            best = Some(overlap);
        }
        best
    }

    fn units(&self, text: &str) -> Vec<Unit> {
        let mut units = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if self.count_tokens(line) <= self.max_segment_tokens {
                units.push(Unit {
                    text: line.to_string(),
                    separator: "\n",
                });
                continue;
            }
            let mut separator = "\n";
            for piece in self.split_long_line(line) {
                units.push(Unit {
                    text: piece,
                    separator,
                });
                separator = " ";
            }
        }
        units
    }

    // 在单词边界截断超长的行。单个超长单词按字符截断。
    fn split_long_line(&self, line: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        for word in line.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if self.count_tokens(&candidate) <= self.max_segment_tokens {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if self.count_tokens(word) <= self.max_segment_tokens {
                current = word.to_string();
            } else {
                let mut chunks = self.split_word(word);
                current = chunks.pop().unwrap_or_default();
                pieces.extend(chunks);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn split_word(&self, word: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for c in word.chars() {
            current.push(c);
            if self.count_tokens(&current) > self.max_segment_tokens {
                current.pop();
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current.push(c);
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::LineSplitter;

    #[test]
    fn test_empty_text() {
        let splitter = LineSplitter::new(20, 5).unwrap();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("  \n\n \t ").is_empty());
    }

    #[test]
    fn test_short_text_single_segment() {
        let splitter = LineSplitter::new(50, 5).unwrap();
        let segments = splitter.split("The quick brown fox.\nJumps over the lazy dog.");
        assert_eq!(
            segments,
            vec!["The quick brown fox.\nJumps over the lazy dog.".to_string()]
        );
    }

    #[test]
    fn test_segments_respect_limit() {
        let splitter = LineSplitter::new(12, 5).unwrap();
        let text = (0..40)
            .map(|i| format!("Line number {i} talks about apples and pears."))
            .collect::<Vec<_>>()
            .join("\n");
        let segments = splitter.split(&text);
        assert!(segments.len() > 1);
        for s in &segments {
            assert!(splitter.count_tokens(s) <= 12, "segment too long: {s}");
        }
    }

    #[test]
    fn test_long_line_cut_at_words() {
        let splitter = LineSplitter::new(8, 0).unwrap();
        let line = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma tau";
        let segments = splitter.split(line);
        assert!(segments.len() > 1);
        for s in &segments {
            assert!(splitter.count_tokens(s) <= 8);
        }
        // 不重叠时，拼接结果与原文单词一致
        let words: Vec<String> = segments
            .iter()
            .flat_map(|s| s.split_whitespace().map(String::from))
            .collect();
        assert_eq!(words.join(" "), line);
    }

    #[test]
    fn test_overlap_from_previous_segment() {
        let splitter = LineSplitter::new(16, 5).unwrap();
        let text = (0..20)
            .map(|i| format!("sentence {i} ends here"))
            .collect::<Vec<_>>()
            .join("\n");
        let segments = splitter.split(&text);
        assert!(segments.len() > 1);
        for pair in segments.windows(2) {
            let prev: Vec<&str> = pair[0].split_whitespace().collect();
            let next: Vec<&str> = pair[1].split_whitespace().collect();
            // 新片段开头的若干单词等于前一片段末尾的单词，且不超过重叠上限
            let shared = (1..=prev.len().min(next.len()))
                .filter(|k| prev[prev.len() - k..] == next[..*k])
                .filter(|k| splitter.count_tokens(&next[..*k].join(" ")) <= 5)
                .max();
            assert!(shared.is_some(), "{:?} does not overlap {:?}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_giant_word() {
        let splitter = LineSplitter::new(4, 2).unwrap();
        let word = "x".repeat(200);
        for s in splitter.split(&word) {
            assert!(splitter.count_tokens(&s) <= 4);
        }
    }
}
