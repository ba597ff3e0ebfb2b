pub use tokenizers::Tokenizer;
use unicode_segmentation::UnicodeSegmentation;

pub type TokenizerError = tokenizers::Error;

/// Counts prompt tokens for one model family.
pub trait TokenCounter
where
	Self: Send + Sync,
{
	fn count(&self, text: &str) -> usize;

	/// Returns a prefix of `text` holding at most `max_tokens` tokens.
	fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

/// Counts Unicode word-boundary segments, whitespace excluded.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordCounter;
impl TokenCounter for WordCounter {
	fn count(&self, text: &str) -> usize {
		text.split_word_bounds().filter(|segment| !segment.trim().is_empty()).count()
	}

	fn truncate(&self, text: &str, max_tokens: usize) -> String {
		let mut seen = 0_usize;
		let mut end = 0_usize;

		for (idx, segment) in text.split_word_bound_indices() {
			if segment.trim().is_empty() {
				continue;
			}
			if seen == max_tokens {
				break;
			}

			seen += 1;
			end = idx + segment.len();
		}

		text[..end].to_string()
	}
}

/// Counts tokens with a Hugging Face tokenizer.
pub struct HfCounter {
	tokenizer: Tokenizer,
}
impl HfCounter {
	pub fn new(tokenizer: Tokenizer) -> Self {
		Self { tokenizer }
	}

	pub fn from_pretrained(repo: &str) -> Result<Self, TokenizerError> {
		Ok(Self::new(Tokenizer::from_pretrained(repo, None)?))
	}
}
impl TokenCounter for HfCounter {
	fn count(&self, text: &str) -> usize {
		match self.tokenizer.encode(text, false) {
			Ok(encoding) => encoding.len(),
			Err(err) => {
				tracing::error!(error = %err, "Tokenizer failed to encode text; counting words instead.");

				WordCounter.count(text)
			},
		}
	}

	fn truncate(&self, text: &str, max_tokens: usize) -> String {
		if max_tokens == 0 {
			return String::new();
		}

		let encoding = match self.tokenizer.encode(text, false) {
			Ok(encoding) => encoding,
			Err(err) => {
				tracing::error!(error = %err, "Tokenizer failed to encode text; truncating by words.");

				return WordCounter.truncate(text, max_tokens);
			},
		};
		let offsets = encoding.get_offsets();

		if offsets.len() <= max_tokens {
			return text.to_string();
		}

		let mut end = offsets[max_tokens - 1].1.min(text.len());

		while end > 0 && !text.is_char_boundary(end) {
			end -= 1;
		}

		text[..end].to_string()
	}
}

/// Tokens left for variable context once `reserved` text and the completion are accounted for.
pub fn available_budget(
	counter: &dyn TokenCounter,
	max_input_tokens: u32,
	reserved: &str,
	output_reserve: u32,
) -> usize {
	(max_input_tokens as usize)
		.saturating_sub(output_reserve as usize)
		.saturating_sub(counter.count(reserved))
}

/// Trims `text` until it fits `budget` tokens under `counter`.
///
/// Tokenizers do not always re-encode a decoded prefix to the same length, so the result is
/// re-counted and shrunk until it fits.
pub fn trim_to_budget(counter: &dyn TokenCounter, text: &str, budget: usize) -> String {
	if budget == 0 {
		return String::new();
	}
	if counter.count(text) <= budget {
		return text.to_string();
	}

	let mut limit = budget;

	loop {
		let trimmed = counter.truncate(text, limit);

		if limit == 0 || counter.count(&trimmed) <= budget {
			return trimmed;
		}

		limit = limit.saturating_sub((limit / 10).max(1));
	}
}
