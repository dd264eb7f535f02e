use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thoughtloop_model::Message;

use super::Memory;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("valid token regex"));

/// A message log with TF-IDF similarity search over message contents.
#[derive(Clone, Debug, Default)]
pub struct VectorMemory {
    messages: Vec<Message>,
}

impl VectorMemory {
    /// Creates an empty memory.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contents of the `top_k` messages most similar to `query`,
    /// most similar first.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<String> {
        self.ranked(query)
            .into_iter()
            .take(top_k)
            .map(|idx| self.messages[idx].text().into_owned())
            .collect()
    }

    /// Returns message indices ordered by descending similarity. Equal
    /// scores keep insertion order.
    fn ranked(&self, query: &str) -> Vec<usize> {
        if self.messages.is_empty() {
            return Vec::new();
        }
        let mut documents: Vec<Vec<String>> = self
            .messages
            .iter()
            .map(|message| tokenize(&message.text()))
            .collect();
        documents.push(tokenize(query));

        let vectors = tfidf_vectors(&documents);
        let Some((query_vector, corpus_vectors)) = vectors.split_last() else {
            return Vec::new();
        };
        let scores: Vec<f64> = corpus_vectors
            .iter()
            .map(|vector| cosine(query_vector, vector))
            .collect();

        let mut indices: Vec<usize> = (0..scores.len()).collect();
        indices.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));
        indices
    }
}

impl Memory for VectorMemory {
    #[inline]
    fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[inline]
    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[inline]
    fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Returns the `limit` messages most similar to `query`.
    fn recall(&self, query: &str, limit: usize) -> Vec<Message> {
        let mut picked: Vec<usize> =
            self.ranked(query).into_iter().take(limit).collect();
        picked.sort_unstable();
        picked
            .into_iter()
            .map(|idx| self.messages[idx].clone())
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_owned())
        .collect()
}

type SparseVector = HashMap<String, f64>;

/// Computes L2-normalized TF-IDF vectors with smoothed IDF, fitted on all
/// `documents`.
fn tfidf_vectors(documents: &[Vec<String>]) -> Vec<SparseVector> {
    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for document in documents {
        let mut seen: Vec<&str> = document.iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *document_frequency.entry(term).or_default() += 1;
        }
    }

    let n = documents.len() as f64;
    documents
        .iter()
        .map(|document| {
            let mut vector = SparseVector::new();
            for term in document {
                *vector.entry(term.clone()).or_default() += 1.0;
            }
            for (term, weight) in vector.iter_mut() {
                let df = document_frequency[term.as_str()] as f64;
                *weight *= ((1.0 + n) / (1.0 + df)).ln() + 1.0;
            }
            let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm > 0.0 {
                vector.values_mut().for_each(|w| *w /= norm);
            }
            vector
        })
        .collect()
}

fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    a.iter()
        .filter_map(|(term, wa)| b.get(term).map(|wb| wa * wb))
        .sum()
}

#[cfg(test)]
mod tests {
    use thoughtloop_model::Role;

    use super::*;

    fn memory() -> VectorMemory {
        let mut memory = VectorMemory::new();
        memory.add(Role::User, "I like apples and bananas");
        memory.add(Role::Assistant, "The weather today is sunny");
        memory.add(Role::User, "Rust borrow checker questions");
        memory.add(Role::Assistant, "Bananas are yellow fruit");
        memory
    }

    #[test]
    fn test_search() {
        let memory = memory();
        let results = memory.search("bananas", 2);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.contains("ananas")));
        assert_eq!(memory.search("sunny weather", 1), ["The weather today is sunny"]);
        assert_eq!(memory.search("anything", 10).len(), 4);
    }

    #[test]
    fn test_search_empty() {
        assert!(VectorMemory::new().search("bananas", 3).is_empty());
    }

    #[test]
    fn test_recall_keeps_order() {
        let memory = memory();
        let recalled: Vec<_> = memory
            .recall("yellow bananas", 2)
            .iter()
            .map(|m| m.text().into_owned())
            .collect();
        assert_eq!(
            recalled,
            ["I like apples and bananas", "Bananas are yellow fruit"]
        );
    }
}
