use crate::domain::resource::RichText;
use crate::domain::{SqlValue, TableTree};

use super::{Frame, Step, Walk, CONTROL};

impl<'a> Walk<'a> {
    /// Adds a `words` column to `tbl` and one span-table row per span.
    pub(super) fn rich_text(&mut self, frame: &Frame<'a>, rt: &RichText, tbl: &mut TableTree) -> Step<()> {
        if !frame.ignore_validation {
            self.check_rich_text(frame, rt)?;
        }
        if frame.ignore_db {
            return Ok(());
        }

        tbl.safe_add("words", rt.words());
        let table = self.span_table();
        // `span` counts across paragraphs so rows sort into document order.
        let mut overall: i64 = 0;
        for (p, para) in rt.paragraphs().iter().enumerate() {
            for span in &para.spans {
                let mut row = TableTree::new(table.clone());
                row.safe_add("p", p as i64);
                row.safe_add("span", overall);
                row.safe_add("kind", para.kind.as_str());
                row.safe_add("text", span.text.as_str());
                if let Some(link) = span.link.as_deref().filter(|l| !l.is_empty()) {
                    row.safe_add("link", link);
                }
                for style in &span.format {
                    row.safe_add(style.to_lowercase(), SqlValue::Bool(true));
                }
                overall += 1;
                tbl.children.push(row);
            }
        }
        Ok(())
    }

    fn check_rich_text(&self, frame: &Frame<'a>, rt: &RichText) -> Step<()> {
        let f = frame.field()?;
        let src = &frame.src;
        let cfg = &self.config().rich_text;

        if rt.is_empty() {
            if f.optional {
                return Ok(());
            }
            return Err(frame.reject(format!("No paragraphs for non-optional field {src:?}.")));
        }

        let mut total: i64 = 0;
        for (p, para) in rt.paragraphs().iter().enumerate() {
            if !cfg.paragraph_kinds.iter().any(|k| *k == para.kind) {
                return Err(frame.reject(format!("Paragraph {p} has invalid kind {:?} at {src:?}.", para.kind)));
            }
            if para.spans.is_empty() {
                return Err(frame.reject(format!("Paragraph {p} has no spans at {src:?}.")));
            }
            let empty_on_purpose = para.is_intentionally_empty();

            let mut runes = 0usize;
            for (s, span) in para.spans.iter().enumerate() {
                for style in &span.format {
                    if !cfg.inline_styles.iter().any(|k| k.eq_ignore_ascii_case(style)) {
                        return Err(frame.reject(format!("Format {style:?} in p {p}, span {s} is invalid at {src:?}.")));
                    }
                }
                if span.text.is_empty() {
                    return Err(frame.reject(format!("Text in p {p}, span {s} is empty at {src:?}.")));
                }
                if !empty_on_purpose && CONTROL.is_match(&span.text) {
                    return Err(frame.reject(format!(
                        "Text in p {p}, span {s} contains control character at {src:?}."
                    )));
                }
                if let Some(link) = &span.link {
                    if CONTROL.is_match(link) {
                        return Err(frame.reject(format!(
                            "Link in p {p}, span {s} contains control character at {src:?}."
                        )));
                    }
                }
                if !empty_on_purpose {
                    runes += span.text.chars().count();
                }
            }
            if cfg.max_paragraph > 0 && runes > cfg.max_paragraph {
                return Err(frame.reject(format!("Paragraph {p} exceeds rune limit at {src:?}.")));
            }
            total += runes as i64;
        }

        if total < f.min {
            return Err(frame.reject(format!("Overall rune minimum not met at {src:?}.")));
        }
        if f.max > 0 && total > f.max {
            return Err(frame.reject(format!("Overall rune maximum exceeded at {src:?}.")));
        }
        Ok(())
    }
}
