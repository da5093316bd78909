use std::time::Instant;

#[inline]
pub fn now_us(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse of [`sigmoid`]; `p` must be in (0, 1).
#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logit_inverts_sigmoid() {
        for x in [-4.0, -0.45, 0.0, 0.3, 2.5] {
            assert!((logit(sigmoid(x)) - x).abs() < 1e-12);
        }
        assert_eq!(sigmoid(0.0), 0.5);
    }
}
