//! Numbered document context for RAG prompts and the citations that point back into it.

use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;

use onyx_tokens::{TokenCounter, trim_to_budget};

use crate::RetrievedPassage;

static CITATION: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\[D(\d+)\]").expect("Citation pattern must compile."));

/// Renders passages as `[D1]`, `[D2]`, ... excerpts that together fit `budget` tokens.
///
/// Passages keep their order. Each excerpt is trimmed to what is left of the budget, and rendering
/// stops once nothing is left. Returns the context text and how many passages it numbers.
pub fn format_context(
	counter: &dyn TokenCounter,
	passages: &[RetrievedPassage],
	budget: usize,
) -> (String, usize) {
	let mut out = String::new();
	let mut remaining = budget;
	let mut numbered = 0;

	for (idx, passage) in passages.iter().enumerate() {
		let header = format!("[D{}] {}\n", idx + 1, passage.metadata.semantic_identifier);
		let header_tokens = counter.count(&header);

		if remaining <= header_tokens {
			break;
		}

		let body = trim_to_budget(counter, &passage.content, remaining - header_tokens);

		if body.is_empty() {
			break;
		}

		let excerpt = format!("{header}{body}\n\n");

		// Joining excerpts can shift counts at the seams, so the rendered total is re-checked.
		if counter.count(&format!("{out}{excerpt}")) > budget {
			break;
		}

		out.push_str(&excerpt);

		remaining = budget.saturating_sub(counter.count(&out));
		numbered += 1;
	}

	(out.trim_end().to_string(), numbered)
}

/// Passages referenced as `[Dn]` in `answer`, in citation-number order.
pub fn cited_passages(answer: &str, passages: &[RetrievedPassage]) -> Vec<RetrievedPassage> {
	let numbers: BTreeSet<usize> = CITATION
		.captures_iter(answer)
		.filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
		.collect();

	numbers
		.into_iter()
		.filter_map(|n| n.checked_sub(1).and_then(|idx| passages.get(idx)).cloned())
		.collect()
}
