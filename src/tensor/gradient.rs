/// L2 norm of a gradient buffer.
pub fn gradient_norm(gradient: &[f32]) -> f32 {
    gradient.iter().map(|g| g * g).sum::<f32>().sqrt()
}

/// Rescale `gradient` in place so its L2 norm does not exceed `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_to_norm(gradient: &mut [f32], max_norm: f32) -> f32 {
    let norm = gradient_norm(gradient);
    if max_norm > 0.0 && norm > max_norm {
        let factor = max_norm / norm;
        gradient.iter_mut().for_each(|g| *g *= factor);
    }
    norm
}

/// Plain gradient-descent step: `data -= learning_rate * gradient`.
pub fn apply_gradient(data: &mut [f32], gradient: &[f32], learning_rate: f32) {
    for (value, grad) in data.iter_mut().zip(gradient) {
        *value -= learning_rate * grad;
    }
}

/// Root-mean-square of per-item gradient norms.
pub fn rms_norm(norms: &[f32]) -> f32 {
    if norms.is_empty() {
        return 0.0;
    }
    (norms.iter().map(|n| n * n).sum::<f32>() / norms.len() as f32).sqrt()
}
