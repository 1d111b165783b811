//! Optional similarity cross-check: cosine similarity between
//! token-frequency vectors of the question and the SQL's natural-language
//! explanation. A soft heuristic gate, never the only validity signal.

use std::collections::HashMap;

use crate::judge::LayerVerdict;

fn token_frequencies(text: &str) -> HashMap<String, f64> {
    let mut freqs = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        *freqs.entry(token).or_insert(0.0) += 1.0;
    }
    freqs
}

pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let fa = token_frequencies(a);
    let fb = token_frequencies(b);
    if fa.is_empty() || fb.is_empty() {
        return 0.0;
    }
    let dot: f64 = fa.iter().map(|(t, w)| w * fb.get(t).copied().unwrap_or(0.0)).sum();
    let norm_a: f64 = fa.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = fb.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn check(question: &str, explanation: &str, threshold: f64) -> LayerVerdict {
    let score = cosine_similarity(question, explanation);
    if score >= threshold {
        LayerVerdict::pass()
    } else {
        LayerVerdict::fail_with_fix(
            format!(
                "the SQL's explanation drifts from the question (similarity {:.2}, threshold {:.2})",
                score, threshold
            ),
            "regenerate SQL whose behavior matches the question's wording more closely",
        )
    }
}
