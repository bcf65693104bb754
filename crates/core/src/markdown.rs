//! The one piece of external-format knowledge in the core: translates an
//! LLM or template-generated markdown body into the document provider's
//! block model. Kept intentionally small — headings, bullet and numbered
//! lists, blockquotes, fenced code, and a paragraph fallback.
use crate::providers::docs::DocBlock;

pub fn markdown_to_blocks(markdown: &str) -> Vec<DocBlock> {
    let mut blocks = Vec::new();
    let mut lines = markdown.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();

        if trimmed.trim().is_empty() {
            continue;
        }

        if let Some(fence_lang) = trimmed.trim_start().strip_prefix("```") {
            let language = if fence_lang.is_empty() {
                None
            } else {
                Some(fence_lang.to_string())
            };
            let mut code = String::new();
            for code_line in lines.by_ref() {
                if code_line.trim_start().starts_with("```") {
                    break;
                }
                if !code.is_empty() {
                    code.push('\n');
                }
                code.push_str(code_line);
            }
            blocks.push(DocBlock::Code {
                text: code,
                language,
            });
            continue;
        }

        let stripped = trimmed.trim_start();
        if let Some(heading) = parse_heading(stripped) {
            blocks.push(heading);
        } else if let Some(text) = stripped
            .strip_prefix("- ")
            .or_else(|| stripped.strip_prefix("* "))
        {
            blocks.push(DocBlock::BulletItem {
                text: text.to_string(),
            });
        } else if let Some(text) = strip_numbered_item(stripped) {
            blocks.push(DocBlock::NumberedItem { text });
        } else if let Some(text) = stripped.strip_prefix("> ") {
            blocks.push(DocBlock::Quote {
                text: text.to_string(),
            });
        } else {
            blocks.push(DocBlock::Paragraph {
                text: trimmed.to_string(),
            });
        }
    }

    blocks
}

fn parse_heading(line: &str) -> Option<DocBlock> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = line[hashes..].trim_start();
    if rest.is_empty() {
        return None;
    }
    Some(DocBlock::Heading {
        level: hashes as u8,
        text: rest.to_string(),
    })
}

fn strip_numbered_item(line: &str) -> Option<String> {
    let dot = line.find(". ")?;
    if line[..dot].chars().all(|c| c.is_ascii_digit()) && !line[..dot].is_empty() {
        Some(line[dot + 2..].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_headings_and_paragraphs() {
        let blocks = markdown_to_blocks("# Title\n\nSome body text.\n");
        assert_eq!(
            blocks,
            vec![
                DocBlock::Heading {
                    level: 1,
                    text: "Title".to_string()
                },
                DocBlock::Paragraph {
                    text: "Some body text.".to_string()
                },
            ]
        );
    }

    #[test]
    fn translates_lists() {
        let blocks = markdown_to_blocks("- first\n- second\n1. one\n2. two\n");
        assert_eq!(
            blocks,
            vec![
                DocBlock::BulletItem {
                    text: "first".to_string()
                },
                DocBlock::BulletItem {
                    text: "second".to_string()
                },
                DocBlock::NumberedItem {
                    text: "one".to_string()
                },
                DocBlock::NumberedItem {
                    text: "two".to_string()
                },
            ]
        );
    }

    #[test]
    fn translates_fenced_code() {
        let blocks = markdown_to_blocks("```rust\nfn main() {}\n```\n");
        assert_eq!(
            blocks,
            vec![DocBlock::Code {
                text: "fn main() {}".to_string(),
                language: Some("rust".to_string()),
            }]
        );
    }

    #[test]
    fn falls_back_to_paragraph_for_quotes() {
        let blocks = markdown_to_blocks("> a quoted line\n");
        assert_eq!(
            blocks,
            vec![DocBlock::Quote {
                text: "a quoted line".to_string()
            }]
        );
    }
}
