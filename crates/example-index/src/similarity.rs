/// Euclidean norm, accumulated in `f64` so large finite components cannot overflow.
pub(crate) fn l2(vec: &[f32]) -> f64 {
    vec.iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity with precomputed norms, in [-1, 1]. A zero vector scores 0 against
/// everything.
pub(crate) fn cosine(query: &[f32], norm_q: f64, item: &[f32], norm_i: f64) -> f32 {
    if norm_q == 0.0 || norm_i == 0.0 {
        return 0.0;
    }
    let dot: f64 = query
        .iter()
        .zip(item)
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum();
    // Divide stepwise: the product of two norms near f64::MAX would overflow.
    let sim = (dot / norm_q) / norm_i;
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0) as f32
    } else {
        f32::NEG_INFINITY
    }
}

pub(crate) fn check_embedding(embedding: &[f32]) -> Result<(), String> {
    if embedding.is_empty() {
        return Err("embedding is empty".into());
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(format!("embedding component {pos} is not finite"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        let sim = cosine(&a, l2(&a), &b, l2(&b));
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn huge_components_do_not_overflow() {
        let a = [1e20_f32, 1e20];
        let b = [3e38_f32, 3e38];
        assert!((cosine(&a, l2(&a), &b, l2(&b)) - 1.0).abs() < 1e-6);
        let c = [3e38_f32, -3e38];
        assert!(cosine(&b, l2(&b), &c, l2(&c)).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        assert_eq!(cosine(&a, l2(&a), &b, l2(&b)), 0.0);
    }

    #[test]
    fn rejects_nan_and_empty() {
        assert!(check_embedding(&[]).is_err());
        assert!(check_embedding(&[0.1, f32::NAN]).is_err());
        assert!(check_embedding(&[0.1, f32::INFINITY]).is_err());
        assert!(check_embedding(&[0.1, 0.2]).is_ok());
    }
}
