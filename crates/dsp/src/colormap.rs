//! Intensity to color mapping for spectrogram pixels.

/// Gradient stops from silence to full scale: near black, purple, red,
/// orange, pale yellow.
const STOPS: [(f32, [u8; 3]); 5] = [
    (0.0, [0, 0, 4]),
    (0.25, [87, 16, 110]),
    (0.5, [188, 55, 84]),
    (0.75, [249, 142, 9]),
    (1.0, [252, 255, 164]),
];

/// Map a normalized intensity in `[0, 1]` to an opaque RGBA color.
/// Out-of-range and NaN inputs are clamped.
pub fn intensity_to_rgba(intensity: f32) -> [u8; 4] {
    let t = if intensity.is_nan() {
        0.0
    } else {
        intensity.clamp(0.0, 1.0)
    };

    for pair in STOPS.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            let local = (t - t0) / (t1 - t0);
            return [
                lerp(c0[0], c1[0], local),
                lerp(c0[1], c1[1], local),
                lerp(c0[2], c1[2], local),
                255,
            ];
        }
    }

    let [r, g, b] = STOPS[STOPS.len() - 1].1;
    [r, g, b, 255]
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t)
        .round()
        .clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn luminance(c: [u8; 4]) -> f32 {
        0.2126 * c[0] as f32 + 0.7152 * c[1] as f32 + 0.0722 * c[2] as f32
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(intensity_to_rgba(0.0), [0, 0, 4, 255]);
        assert_eq!(intensity_to_rgba(1.0), [252, 255, 164, 255]);
        assert_eq!(intensity_to_rgba(0.5), [188, 55, 84, 255]);
    }

    #[test]
    fn test_clamps_out_of_range() {
        assert_eq!(intensity_to_rgba(-3.0), intensity_to_rgba(0.0));
        assert_eq!(intensity_to_rgba(42.0), intensity_to_rgba(1.0));
        assert_eq!(intensity_to_rgba(f32::NAN), intensity_to_rgba(0.0));
    }

    #[test]
    fn test_brightness_increases() {
        let mut previous = luminance(intensity_to_rgba(0.0));
        for i in 1..=20 {
            let current = luminance(intensity_to_rgba(i as f32 / 20.0));
            assert!(current >= previous, "not monotonic at step {}", i);
            previous = current;
        }
    }
}
