//! Display unit conversions. Raw-count decoding lives with the device
//! proxies; these helpers only format physical values for people.

const OZ_PER_G: f32 = 0.035_273_962;

#[inline]
pub fn c_to_f(c: f32) -> f32 {
    c * 9.0 / 5.0 + 32.0
}

#[inline]
pub fn f_to_c(f: f32) -> f32 {
    (f - 32.0) * 5.0 / 9.0
}

#[inline]
pub fn g_to_oz(g: f32) -> f32 {
    g * OZ_PER_G
}

#[inline]
pub fn oz_to_g(oz: f32) -> f32 {
    oz / OZ_PER_G
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_fahrenheit_round_trip() {
        for c in [0.0f32, 93.0, 140.0] {
            assert!((f_to_c(c_to_f(c)) - c).abs() < 1e-4);
        }
        assert_eq!(c_to_f(100.0), 212.0);
    }

    #[test]
    fn grams_ounces_round_trip() {
        assert!((g_to_oz(28.349523) - 1.0).abs() < 1e-4);
        assert!((oz_to_g(g_to_oz(30.0)) - 30.0).abs() < 1e-3);
    }
}
