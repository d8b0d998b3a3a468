//! Luma statistics over packed YUYV frames.
//!
//! These are post-processing helpers; capture never depends on them.

/// Luma values below this are treated as black (studio-range floor).
pub const BLACK_LUMA_THRESHOLD: u8 = 16;

/// Iterate over the luma samples of a YUYV buffer.
///
/// YUYV packs two pixels per 4 bytes: `[Y0, U, Y1, V]`, so luma is every
/// even-indexed byte.
pub fn luma_samples(yuyv: &[u8]) -> impl Iterator<Item = u8> + '_ {
    yuyv.iter().step_by(2).copied()
}

/// Share of pixels whose luma is below [`BLACK_LUMA_THRESHOLD`].
///
/// # Arguments
///
/// * `yuyv` - Valid bytes of a captured YUYV frame
///
/// # Returns
///
/// A value in `0.0..=1.0`, or `None` if the frame holds no samples.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn black_pixel_ratio(yuyv: &[u8]) -> Option<f64> {
    let mut total = 0u64;
    let mut black = 0u64;
    for luma in luma_samples(yuyv) {
        total += 1;
        if luma < BLACK_LUMA_THRESHOLD {
            black += 1;
        }
    }

    (total > 0).then(|| black as f64 / total as f64)
}

/// Average luma of a YUYV frame, `None` if empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_luma(yuyv: &[u8]) -> Option<f64> {
    let (count, sum) = luma_samples(yuyv).fold((0u64, 0u64), |(count, sum), luma| {
        (count + 1, sum + u64::from(luma))
    });

    (count > 0).then(|| sum as f64 / count as f64)
}
