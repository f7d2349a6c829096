//! 基于检索结果生成问答提示词
use handlebars::Handlebars;
use serde::Serialize;
use std::fmt;
use tiktoken_rs::CoreBPE;

use crate::core::{EmbeddingMatch, META_FILE_NAME};

pub const DEFAULT_MATCH_INSTRUCTION: &str = "Answer the question using only the information below.
If the information is not sufficient, say that you do not know.

Information:
{{informations}}

Sources: {{file_names_sources}}

Question: {{question}}";

pub const DEFAULT_MISMATCH_INSTRUCTION: &str =
    "No document related to the question was found. Answer from general knowledge and tell the user that no source supports the answer.

Question: {{question}}";

#[derive(Debug, Clone, PartialEq)]
pub struct Error(String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prompt error: {}", self.0)
    }
}
impl std::error::Error for Error {}

/// 模板变量
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct PromptVariables {
    pub question: String,
    pub informations: String,
    pub file_names_sources: String,
}

impl PromptVariables {
    /// 由检索结果汇总模板变量。informations的token数不超过max_tokens，
    /// 第一条结果本身超出上限时截取其开头部分。
    pub fn from_matches(
        question: &str,
        matches: &[EmbeddingMatch],
        max_tokens: Option<(usize, &CoreBPE)>,
    ) -> Self {
        let mut informations = String::new();
        let mut sources: Vec<&str> = Vec::new();
        for m in matches {
            let mut candidate = if informations.is_empty() {
                m.segment.text.clone()
            } else {
                format!("{informations}\n\n{}", m.segment.text)
            };
            if let Some((limit, bpe)) = max_tokens {
                if bpe.encode_with_special_tokens(&candidate).len() > limit {
                    if !informations.is_empty() {
                        tracing::debug!("Context cut at {} of {} matches", sources.len(), matches.len());
                        break;
                    }
                    candidate = truncate_tokens(bpe, &candidate, limit);
                }
            }
            informations = candidate;
            if let Some(name) = m.segment.metadata(META_FILE_NAME) {
                if !sources.contains(&name) {
                    sources.push(name);
                }
            }
        }
        Self {
            question: question.to_string(),
            informations,
            file_names_sources: sources.join(", "),
        }
    }
}

// 截取前limit个token。截断处落在多字节字符中间时继续回退。
fn truncate_tokens(bpe: &CoreBPE, text: &str, limit: usize) -> String {
    let tokens = bpe.encode_with_special_tokens(text);
    (0..=limit.min(tokens.len()))
        .rev()
        .find_map(|end| bpe.decode(tokens[..end].to_vec()).ok())
        .unwrap_or_default()
}

/// 渲染模板。为空的模板使用默认内容。
pub fn render(template: &str, fallback: &str, variables: &PromptVariables) -> Result<String, Error> {
    let template = match template.trim() {
        "" => fallback,
        _ => template,
    };
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .render_template(template, variables)
        .map_err(|e| Error(e.to_string()))
}

/// 按是否命中选择数据集的指令模板
pub fn render_instruction(
    match_instruction: &str,
    mismatch_instruction: &str,
    variables: &PromptVariables,
) -> Result<String, Error> {
    if variables.informations.is_empty() {
        render(mismatch_instruction, DEFAULT_MISMATCH_INSTRUCTION, variables)
    } else {
        render(match_instruction, DEFAULT_MATCH_INSTRUCTION, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TextSegment, META_FILE_NAME};

    fn matched(text: &str, file: &str, score: f64) -> EmbeddingMatch {
        EmbeddingMatch {
            score,
            id: text.to_string(),
            segment: TextSegment::new(text).with_metadata(META_FILE_NAME, file),
        }
    }

    #[test]
    fn test_variables_from_matches() {
        let matches = vec![
            matched("Paris is in France.", "geo.pdf", 0.9),
            matched("Lyon is in France too.", "geo.pdf", 0.8),
            matched("The Seine crosses Paris.", "rivers.txt", 0.7),
        ];
        let vars = PromptVariables::from_matches("Where is Paris?", &matches, None);
        assert_eq!(
            vars.informations,
            "Paris is in France.\n\nLyon is in France too.\n\nThe Seine crosses Paris."
        );
        assert_eq!(vars.file_names_sources, "geo.pdf, rivers.txt");
    }

    #[test]
    fn test_informations_capped_by_tokens() {
        let bpe = tiktoken_rs::cl100k_base().unwrap();
        let matches = vec![
            matched("one two three", "a", 0.9),
            matched("four five six seven eight nine ten", "b", 0.8),
        ];
        let vars = PromptVariables::from_matches("q", &matches, Some((5, &bpe)));
        assert_eq!(vars.informations, "one two three");
        assert_eq!(vars.file_names_sources, "a");
    }

    #[test]
    fn test_oversized_first_match_truncated() {
        let bpe = tiktoken_rs::cl100k_base().unwrap();
        let matches = vec![
            matched("alpha beta gamma delta epsilon zeta eta theta", "greek.txt", 0.9),
            matched("iota", "more.txt", 0.8),
        ];
        let vars = PromptVariables::from_matches("q", &matches, Some((3, &bpe)));
        assert_eq!(vars.informations, "alpha beta gamma");
        assert_eq!(vars.file_names_sources, "greek.txt");

        let out = render_instruction("hit {{informations}}", "miss", &vars).unwrap();
        assert_eq!(out, "hit alpha beta gamma");
    }

    #[test]
    fn test_render_no_escape() {
        let vars = PromptVariables {
            question: "Is 1 < 2 & 3 > 2?".to_string(),
            ..Default::default()
        };
        let out = render("Q: {{question}}", DEFAULT_MATCH_INSTRUCTION, &vars).unwrap();
        assert_eq!(out, "Q: Is 1 < 2 & 3 > 2?");
    }

    #[test]
    fn test_instruction_selection() {
        let mut vars = PromptVariables {
            question: "why?".to_string(),
            ..Default::default()
        };
        let out = render_instruction("hit {{informations}}", "miss {{question}}", &vars).unwrap();
        assert_eq!(out, "miss why?");

        vars.informations = "because".to_string();
        let out = render_instruction("hit {{informations}}", "miss {{question}}", &vars).unwrap();
        assert_eq!(out, "hit because");

        // 空模板使用默认内容
        let out = render_instruction("  ", "", &vars).unwrap();
        assert!(out.contains("because"));
        assert!(out.contains("Question: why?"));
    }
}
