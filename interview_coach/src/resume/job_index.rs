use super::JobSearch;
use std::collections::HashMap;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of",
    "on", "or", "our", "the", "to", "we", "with", "you", "your",
];

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

fn norm(terms: &HashMap<String, f32>) -> f32 {
    terms.values().map(|count| count * count).sum::<f32>().sqrt()
}

/// Term-frequency vectors over the job descriptions, ranked by cosine
/// similarity to the query.
#[derive(Debug, Default)]
pub struct KeywordJobIndex {
    documents: Vec<(HashMap<String, f32>, f32)>,
}

impl KeywordJobIndex {
    pub fn new<'a>(descriptions: impl IntoIterator<Item = &'a str>) -> Self {
        let documents = descriptions
            .into_iter()
            .map(|text| {
                let terms = term_frequencies(text);
                let norm = norm(&terms);
                (terms, norm)
            })
            .collect();
        Self { documents }
    }

    fn similarity(
        query: &HashMap<String, f32>,
        query_norm: f32,
        (terms, doc_norm): &(HashMap<String, f32>, f32),
    ) -> f32 {
        if query_norm == 0.0 || *doc_norm == 0.0 {
            return 0.0;
        }
        let dot: f32 = query
            .iter()
            .filter_map(|(term, count)| terms.get(term).map(|other| count * other))
            .sum();
        dot / (query_norm * doc_norm)
    }
}

impl JobSearch for KeywordJobIndex {
    /// Indices of the `top_k` most similar descriptions, best first. Equal
    /// scores keep catalog order.
    fn search(&self, query: &str, top_k: usize) -> Vec<usize> {
        let query_terms = term_frequencies(query);
        let query_norm = norm(&query_terms);

        let mut scored: Vec<(usize, f32)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(i, document)| (i, Self::similarity(&query_terms, query_norm, document)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        scored.into_iter().take(top_k).map(|(i, _)| i).collect()
    }
}
