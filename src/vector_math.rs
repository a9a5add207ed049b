use std::cmp::Ordering;

use crate::core::errors::ApiError;

pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, ApiError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(ApiError::BadRequest(
            "Vectors must not be empty".to_string(),
        ));
    }
    if query.len() != candidate.len() {
        return Err(ApiError::BadRequest(format!(
            "Vector length mismatch: {} != {}",
            query.len(),
            candidate.len()
        )));
    }

    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok(dot / denom)
}

/// Scores every candidate and sorts by descending similarity. Ties keep
/// candidate order.
pub fn rank_descending_by_cosine<'a, I>(
    query: &[f32],
    candidates: I,
) -> Result<Vec<(usize, f32)>, ApiError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scores = Vec::new();
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}
