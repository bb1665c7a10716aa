//! Precomputed Hann window table (spec §4.6), grounded in
//! `rf-viz::spectrogram::WindowFunction::generate`.

use kfx_core::WIN;

/// `0.5 * (1 - cos(2*pi*n / (N-1)))` over `[0, WIN)`.
pub fn hann_table() -> Vec<f32> {
    (0..WIN)
        .map(|n| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (WIN - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_table_endpoints_are_near_zero() {
        let table = hann_table();
        assert_eq!(table.len(), WIN);
        assert!(table[0] < 1e-6);
        assert!(table[WIN / 2] > 0.99);
    }
}
